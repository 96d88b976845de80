//! Error types shared by the controller, the session store and the sync reconciler.

use crate::db::{Metric, RecordingState};

/// Errors surfaced by the recording engine.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("cannot {action} a recording that is {state}")]
    InvalidTransition {
        action: &'static str,
        state: RecordingState,
    },

    #[error("sample ignored: recording is {state}")]
    NotRecording { state: RecordingState },

    #[error("out-of-order {metric} sample at {timestamp_ms}ms (last accepted {last_ms}ms)")]
    OutOfOrderSample {
        metric: Metric,
        timestamp_ms: i64,
        last_ms: i64,
    },

    #[error("{metric} sample is not a finite number")]
    NonFiniteSample { metric: Metric },

    #[error("{metric} expects {expected} samples")]
    SampleTypeMismatch {
        metric: Metric,
        expected: &'static str,
    },

    #[error("recording {recording_id} is {state}; chunks can only be committed while recording")]
    StateConflict {
        recording_id: String,
        state: RecordingState,
    },

    #[error("recording {0} is already finished")]
    AlreadyFinished(String),

    #[error("recording not found: {0}")]
    RecordingNotFound(String),

    #[error("chunk {chunk_index} of {metric} already committed for recording {recording_id}")]
    DuplicateChunk {
        recording_id: String,
        metric: Metric,
        chunk_index: u32,
    },

    #[error("recording {recording_id} still has {remaining} unsynced chunks")]
    PendingChunks { recording_id: String, remaining: u64 },

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    /// `sample_accepted` tells whether the sample passed to the failing
    /// append is held for retry (`true`) or was refused and must be resent.
    #[error(
        "commit of {metric} chunk {chunk_index} failed, {}: {source}",
        sample_disposition(.sample_accepted)
    )]
    CommitFailed {
        metric: Metric,
        chunk_index: u32,
        sample_accepted: bool,
        #[source]
        source: Box<RecorderError>,
    },

    #[error("remote sync failed: {message}")]
    Remote { message: String, retryable: bool },

    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl RecorderError {
    /// Data-quality problems with a single sample. The recording keeps going.
    pub fn is_sample_rejection(&self) -> bool {
        matches!(
            self,
            RecorderError::NotRecording { .. }
                | RecorderError::OutOfOrderSample { .. }
                | RecorderError::NonFiniteSample { .. }
                | RecorderError::SampleTypeMismatch { .. }
        )
    }

    /// Failures that leave data on the device and should be retried later.
    pub fn is_retryable(&self) -> bool {
        match self {
            RecorderError::Remote { retryable, .. } => *retryable,
            RecorderError::CommitFailed { .. }
            | RecorderError::Sqlite(_)
            | RecorderError::Storage(_) => true,
            _ => false,
        }
    }
}

fn sample_disposition(accepted: &bool) -> &'static str {
    if *accepted {
        "sample buffered for retry"
    } else {
        "sample not accepted"
    }
}

pub type Result<T> = std::result::Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_rejections_are_not_retryable() {
        let err = RecorderError::OutOfOrderSample {
            metric: Metric::HeartRate,
            timestamp_ms: 10,
            last_ms: 20,
        };
        assert!(err.is_sample_rejection());
        assert!(!err.is_retryable());

        let err = RecorderError::NotRecording {
            state: RecordingState::Paused,
        };
        assert!(err.is_sample_rejection());
        assert_eq!(err.to_string(), "sample ignored: recording is paused");
    }

    #[test]
    fn remote_errors_carry_retry_hint() {
        let err = RecorderError::Remote {
            message: "connection reset".into(),
            retryable: true,
        };
        assert!(err.is_retryable());

        let err = RecorderError::Remote {
            message: "422 unprocessable".into(),
            retryable: false,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn invalid_transition_message_names_state() {
        let err = RecorderError::InvalidTransition {
            action: "pause",
            state: RecordingState::Finished,
        };
        assert_eq!(err.to_string(), "cannot pause a recording that is finished");
    }

    #[test]
    fn commit_failure_says_whether_the_sample_was_kept() {
        let refused = RecorderError::CommitFailed {
            metric: Metric::Power,
            chunk_index: 3,
            sample_accepted: false,
            source: Box::new(RecorderError::Storage(anyhow::anyhow!("disk full"))),
        };
        assert!(refused.is_retryable());
        assert!(refused.to_string().contains("sample not accepted"));

        let nan = RecorderError::NonFiniteSample {
            metric: Metric::Speed,
        };
        assert!(nan.is_sample_rejection());
        assert!(!nan.is_retryable());
    }
}
