pub mod chunk;
pub mod recording;

pub use chunk::{ChunkData, Coordinate, DataType, Metric, SampleValue, StreamChunk};
pub use recording::{
    ActivityType, IntensityKind, IntensityTarget, NewRecording, PlannedActivity, ProfileSnapshot,
    Recording, RecordingState, WorkoutStep, WorkoutStructure,
};
