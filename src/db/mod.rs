mod connection;
mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use connection::Database;
pub use models::{
    ActivityType, ChunkData, Coordinate, DataType, IntensityKind, IntensityTarget, Metric,
    NewRecording, PlannedActivity, ProfileSnapshot, Recording, RecordingState, SampleValue,
    StreamChunk, WorkoutStep, WorkoutStructure,
};
pub use repositories::{StreamTail, UnsyncedRecording};
