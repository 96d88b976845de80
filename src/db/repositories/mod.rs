pub mod chunks;
pub mod recordings;

pub use chunks::{StreamTail, UnsyncedRecording};
