use std::sync::Arc;

use log::{debug, error};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::db::{RecordingState, UnsyncedRecording};
use crate::error::Result;
use crate::events::EngineEvent;
use crate::RecorderContext;

use super::client::RemoteSync;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub recordings_seen: usize,
    pub chunks_synced: usize,
    pub chunks_pending: usize,
    pub recordings_synced: usize,
    pub failures: usize,
}

/// Uploads unsynced chunks and recordings and records acknowledgments.
///
/// Every pass starts from durable state, and every acknowledged chunk is
/// marked synced before the next upload starts, so a pass may be dropped at
/// any await point and the next one picks up where it stopped.
pub struct SyncReconciler {
    ctx: RecorderContext,
    remote: Arc<dyn RemoteSync>,
    running: Mutex<()>,
}

impl SyncReconciler {
    pub fn new(ctx: RecorderContext, remote: Arc<dyn RemoteSync>) -> Self {
        Self {
            ctx,
            remote,
            running: Mutex::new(()),
        }
    }

    /// Runs a pass, waiting for one already in progress to end first.
    pub async fn reconcile(&self) -> Result<SyncReport> {
        let _running = self.running.lock().await;
        self.run_pass().await
    }

    /// Runs a pass unless one is already in progress, in which case `None`.
    pub async fn try_reconcile(&self) -> Result<Option<SyncReport>> {
        let Ok(_running) = self.running.try_lock() else {
            debug!("Sync pass already running; skipping");
            return Ok(None);
        };
        self.run_pass().await.map(Some)
    }

    async fn run_pass(&self) -> Result<SyncReport> {
        let pending = self.ctx.store.list_unsynced().await?;
        let mut report = SyncReport {
            recordings_seen: pending.len(),
            ..Default::default()
        };

        for item in pending {
            self.sync_recording(item, &mut report).await;
        }

        debug!("Sync pass complete: {report:?}");
        Ok(report)
    }

    async fn sync_recording(&self, item: UnsyncedRecording, report: &mut SyncReport) {
        let UnsyncedRecording { recording, chunks } = item;
        let total = chunks.len();
        let mut synced = 0;
        let mut failure = None;

        if let Err(err) = self.remote.upload_recording(&recording).await {
            failure = Some(err);
        } else {
            for chunk in &chunks {
                if let Err(err) = self.remote.upload_chunk(chunk).await {
                    // Later chunks wait so the remote always sees a stream
                    // without holes.
                    failure = Some(err);
                    break;
                }
                if let Err(err) = self.ctx.store.mark_synced(&[chunk.id.clone()]).await {
                    error!("Failed to mark chunk {} synced: {err}", chunk.id);
                    failure = Some(err);
                    break;
                }
                synced += 1;
            }
        }

        let mut recording_synced = false;
        if failure.is_none() && recording.state == RecordingState::Finished {
            match self.ctx.store.count_unsynced_chunks(&recording.id).await {
                Ok(0) => match self.ctx.store.mark_recording_synced(&recording.id).await {
                    Ok(()) => recording_synced = true,
                    Err(err) => failure = Some(err),
                },
                Ok(_) => {}
                Err(err) => failure = Some(err),
            }
        }

        report.chunks_synced += synced;
        report.chunks_pending += total - synced;
        if recording_synced {
            report.recordings_synced += 1;
        }
        if failure.is_some() {
            report.failures += 1;
        }

        self.ctx.events.emit(EngineEvent::SyncOutcome {
            recording_id: recording.id,
            chunks_synced: synced,
            chunks_pending: total - synced,
            recording_synced,
            error: failure.map(|err| err.to_string()),
        });
    }
}
