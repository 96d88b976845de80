use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{info, warn};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::reconciler::SyncReconciler;

/// Runs reconciliation passes in the background: on a fixed interval and
/// whenever [`trigger`](Self::trigger) is called (e.g. connectivity regained).
pub struct SyncController {
    reconciler: Arc<SyncReconciler>,
    wake: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl SyncController {
    pub fn new(reconciler: Arc<SyncReconciler>) -> Self {
        Self {
            reconciler,
            wake: Arc::new(Notify::new()),
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self, interval: Duration) -> Result<()> {
        if self.handle.is_some() {
            bail!("sync loop already active");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(sync_loop(
            Arc::clone(&self.reconciler),
            Arc::clone(&self.wake),
            interval,
            cancel_token.clone(),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Requests a pass as soon as possible.
    pub fn trigger(&self) {
        self.wake.notify_one();
    }

    /// Cancels the loop, abandoning any in-flight upload, and waits for it.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("sync loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

async fn sync_loop(
    reconciler: Arc<SyncReconciler>,
    wake: Arc<Notify>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {}
            _ = wake.notified() => {}
        }

        // Dropping the pass on cancel stops the in-flight request; progress
        // already acknowledged is in the store.
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            result = reconciler.try_reconcile() => match result {
                Ok(Some(report)) if report.failures > 0 => {
                    warn!("Sync pass left {} chunks pending ({} failures)", report.chunks_pending, report.failures);
                }
                Ok(_) => {}
                Err(err) => warn!("Sync pass failed: {err}"),
            },
        }
    }

    info!("sync loop shutting down");
}
