// ── Domain model ──

pub mod channel;
pub mod event;
pub mod serial;

pub use channel::Channel;
pub use event::{BufferedEvent, Event, EventKind};
pub use serial::SerialNumber;
