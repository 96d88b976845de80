pub mod buffer;
pub mod controller;
pub mod recovery;
pub mod state;

pub use buffer::{AppendOutcome, StreamBuffer};
pub use controller::{RecordingController, RecordingSnapshot};
pub use recovery::recover_interrupted;
pub use state::{Command, RecordingClock};
