//! Per-connection Stream Server: replay from the store, then live messages
//! from the registry, framed as server-sent events.

mod frame;
mod session;

pub use frame::{encode_frame, FrameDecoder};
pub use session::{SessionState, StreamSession};
