mod pump;
mod scope;
mod writer;

pub use pump::pump_into;
pub use scope::CaptureScope;
pub use writer::LogWriter;
