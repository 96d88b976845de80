use std::sync::{Arc, Mutex};

use activity_recorder::db::{ActivityType, Database, NewRecording, ProfileSnapshot, Recording, StreamChunk};
use activity_recorder::events::{ChannelEventSink, EngineEvent};
use activity_recorder::sync::RemoteSync;
use activity_recorder::{EngineSettings, RecorderContext, RecorderError, Result};
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

/// On-disk database in a temp dir. Keep the `TempDir` alive for the test.
#[allow(dead_code)]
pub fn test_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let db = Database::new(dir.path().join("recorder.sqlite3")).expect("open database");
    (dir, db)
}

#[allow(dead_code)]
pub fn test_settings(chunk_capacity: usize) -> EngineSettings {
    EngineSettings {
        chunk_capacity,
        commit_retry_backoff_ms: 1,
        ..EngineSettings::default()
    }
}

/// Context over `db` whose events land in the returned receiver.
#[allow(dead_code)]
pub fn test_context(
    db: Database,
    settings: EngineSettings,
) -> (RecorderContext, UnboundedReceiver<EngineEvent>) {
    let (sink, events) = ChannelEventSink::new();
    let ctx = RecorderContext::new(Arc::new(db), Arc::new(sink), settings);
    (ctx, events)
}

#[allow(dead_code)]
pub fn run_with_hr(threshold_hr: u32) -> NewRecording {
    NewRecording::new(
        ActivityType::OutdoorRun,
        ProfileSnapshot {
            weight_kg: Some(70.0),
            ftp: None,
            threshold_hr: Some(threshold_hr),
        },
    )
}

#[allow(dead_code)]
pub fn drain(events: &mut UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// In-memory remote that records what it received and can be told to fail.
#[derive(Default)]
#[allow(dead_code)]
pub struct MockRemote {
    pub recordings: Mutex<Vec<String>>,
    pub chunks: Mutex<Vec<(String, u32)>>,
    /// Number of chunk uploads to accept before failing every later one.
    pub fail_after: Mutex<Option<usize>>,
    pub fail_recordings: Mutex<bool>,
}

#[allow(dead_code)]
impl MockRemote {
    pub fn failing_after(accepted: usize) -> Self {
        let remote = Self::default();
        *remote.fail_after.lock().unwrap() = Some(accepted);
        remote
    }

    pub fn heal(&self) {
        *self.fail_after.lock().unwrap() = None;
        *self.fail_recordings.lock().unwrap() = false;
    }

    pub fn uploaded_chunks(&self) -> Vec<(String, u32)> {
        self.chunks.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteSync for MockRemote {
    async fn upload_recording(&self, recording: &Recording) -> Result<()> {
        if *self.fail_recordings.lock().unwrap() {
            return Err(RecorderError::Remote {
                message: "offline".into(),
                retryable: true,
            });
        }
        self.recordings.lock().unwrap().push(recording.id.clone());
        Ok(())
    }

    async fn upload_chunk(&self, chunk: &StreamChunk) -> Result<()> {
        let mut chunks = self.chunks.lock().unwrap();
        if let Some(limit) = *self.fail_after.lock().unwrap() {
            if chunks.len() >= limit {
                return Err(RecorderError::Remote {
                    message: "connection reset".into(),
                    retryable: true,
                });
            }
        }
        chunks.push((chunk.metric.as_str().to_string(), chunk.chunk_index));
        Ok(())
    }
}
