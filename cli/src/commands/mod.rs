pub mod cli;
pub mod serve;
pub mod tail;
pub mod tasks;
pub mod trigger;
