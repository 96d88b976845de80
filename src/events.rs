//! Observability events emitted by the engine.
//!
//! The core never logs on its own behalf for these; it hands an
//! [`EngineEvent`] to whatever [`EventSink`] the caller injected.

use log::{info, warn};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::db::{Metric, RecordingState};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EngineEvent {
    #[serde(rename_all = "camelCase")]
    TransitionOccurred {
        recording_id: String,
        from: RecordingState,
        to: RecordingState,
    },
    #[serde(rename_all = "camelCase")]
    ChunkCommitted {
        recording_id: String,
        metric: Metric,
        chunk_index: u32,
        sample_count: u32,
    },
    #[serde(rename_all = "camelCase")]
    SampleRejected {
        recording_id: String,
        metric: Metric,
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    CommitFailed {
        recording_id: String,
        metric: Metric,
        chunk_index: u32,
        attempts: u32,
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    SyncOutcome {
        recording_id: String,
        chunks_synced: usize,
        chunks_pending: usize,
        recording_synced: bool,
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    RecordingRecovered {
        recording_id: String,
        previous: RecordingState,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Writes every event through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: EngineEvent) {
        match &event {
            EngineEvent::TransitionOccurred {
                recording_id,
                from,
                to,
            } => info!("recording {recording_id}: {from} -> {to}"),
            EngineEvent::ChunkCommitted {
                recording_id,
                metric,
                chunk_index,
                sample_count,
            } => info!(
                "recording {recording_id}: committed {metric} chunk {chunk_index} ({sample_count} samples)"
            ),
            EngineEvent::SampleRejected {
                recording_id,
                metric,
                reason,
            } => warn!("recording {recording_id}: rejected {metric} sample: {reason}"),
            EngineEvent::CommitFailed {
                recording_id,
                metric,
                chunk_index,
                attempts,
                error,
            } => warn!(
                "recording {recording_id}: {metric} chunk {chunk_index} not committed after {attempts} attempts: {error}"
            ),
            EngineEvent::SyncOutcome {
                recording_id,
                chunks_synced,
                chunks_pending,
                recording_synced,
                error,
            } => match error {
                Some(error) => warn!(
                    "sync {recording_id}: {chunks_synced} chunks uploaded, {chunks_pending} pending: {error}"
                ),
                None => info!(
                    "sync {recording_id}: {chunks_synced} chunks uploaded, {chunks_pending} pending, recording synced: {recording_synced}"
                ),
            },
            EngineEvent::RecordingRecovered {
                recording_id,
                previous,
            } => warn!("Recovered interrupted recording {recording_id} (was {previous}); marked finished"),
        }
    }
}

/// Forwards events to a channel, for consumers living on another task.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: EngineEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.sender.send(event);
    }
}
