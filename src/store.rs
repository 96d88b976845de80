//! Persistence contract between the recording pipeline and durable storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{
    Database, Metric, NewRecording, Recording, RecordingState, StreamChunk, StreamTail,
    UnsyncedRecording,
};
use crate::error::Result;

/// Durable, append-only store for recordings and their stream chunks.
///
/// A successful return means the write survives a process crash; a failed
/// or interrupted write leaves nothing readable behind.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_recording(&self, new: NewRecording) -> Result<Recording>;

    async fn get_recording(&self, recording_id: &str) -> Result<Recording>;

    async fn mark_started(&self, recording_id: &str, started_at: DateTime<Utc>) -> Result<()>;

    async fn update_state(
        &self,
        recording_id: &str,
        state: RecordingState,
        active_ms: u64,
        paused_ms: u64,
    ) -> Result<()>;

    async fn commit_chunk(
        &self,
        recording_id: &str,
        metric: Metric,
        chunk: &StreamChunk,
    ) -> Result<()>;

    async fn stream_tail(&self, recording_id: &str, metric: Metric) -> Result<StreamTail>;

    /// Commits `final_chunks` and finishes the recording atomically.
    async fn finish_recording(
        &self,
        recording_id: &str,
        final_chunks: Vec<StreamChunk>,
        ended_at: DateTime<Utc>,
        active_ms: u64,
        paused_ms: u64,
    ) -> Result<()>;

    async fn mark_finished(
        &self,
        recording_id: &str,
        ended_at: DateTime<Utc>,
        active_ms: u64,
        paused_ms: u64,
    ) -> Result<()> {
        self.finish_recording(recording_id, Vec::new(), ended_at, active_ms, paused_ms)
            .await
    }

    async fn list_chunks(
        &self,
        recording_id: &str,
        metric: Option<Metric>,
    ) -> Result<Vec<StreamChunk>>;

    async fn list_unsynced(&self) -> Result<Vec<UnsyncedRecording>>;

    async fn count_unsynced_chunks(&self, recording_id: &str) -> Result<u64>;

    async fn mark_synced(&self, chunk_ids: &[String]) -> Result<()>;

    async fn mark_recording_synced(&self, recording_id: &str) -> Result<()>;

    async fn list_incomplete(&self) -> Result<Vec<Recording>>;

    async fn delete_recording(&self, recording_id: &str) -> Result<()>;
}

#[async_trait]
impl SessionStore for Database {
    async fn create_recording(&self, new: NewRecording) -> Result<Recording> {
        let recording = new.into_recording(Uuid::new_v4().to_string(), Utc::now());
        self.insert_recording(&recording).await?;
        Ok(recording)
    }

    async fn get_recording(&self, recording_id: &str) -> Result<Recording> {
        Database::get_recording(self, recording_id).await
    }

    async fn mark_started(&self, recording_id: &str, started_at: DateTime<Utc>) -> Result<()> {
        Database::mark_started(self, recording_id, started_at).await
    }

    async fn update_state(
        &self,
        recording_id: &str,
        state: RecordingState,
        active_ms: u64,
        paused_ms: u64,
    ) -> Result<()> {
        self.update_recording_state(recording_id, state, active_ms, paused_ms)
            .await
    }

    async fn commit_chunk(
        &self,
        recording_id: &str,
        metric: Metric,
        chunk: &StreamChunk,
    ) -> Result<()> {
        Database::commit_chunk(self, recording_id, metric, chunk).await
    }

    async fn stream_tail(&self, recording_id: &str, metric: Metric) -> Result<StreamTail> {
        Database::stream_tail(self, recording_id, metric).await
    }

    async fn finish_recording(
        &self,
        recording_id: &str,
        final_chunks: Vec<StreamChunk>,
        ended_at: DateTime<Utc>,
        active_ms: u64,
        paused_ms: u64,
    ) -> Result<()> {
        Database::finish_recording(self, recording_id, final_chunks, ended_at, active_ms, paused_ms)
            .await
    }

    async fn list_chunks(
        &self,
        recording_id: &str,
        metric: Option<Metric>,
    ) -> Result<Vec<StreamChunk>> {
        Database::list_chunks(self, recording_id, metric).await
    }

    async fn list_unsynced(&self) -> Result<Vec<UnsyncedRecording>> {
        Database::list_unsynced(self).await
    }

    async fn count_unsynced_chunks(&self, recording_id: &str) -> Result<u64> {
        Database::count_unsynced_chunks(self, recording_id).await
    }

    async fn mark_synced(&self, chunk_ids: &[String]) -> Result<()> {
        self.mark_chunks_synced(chunk_ids).await
    }

    async fn mark_recording_synced(&self, recording_id: &str) -> Result<()> {
        Database::mark_recording_synced(self, recording_id).await
    }

    async fn list_incomplete(&self) -> Result<Vec<Recording>> {
        self.list_incomplete_recordings().await
    }

    async fn delete_recording(&self, recording_id: &str) -> Result<()> {
        Database::delete_recording(self, recording_id).await
    }
}
