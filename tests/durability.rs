//! Commit retries and crash recovery.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use activity_recorder::db::{
    Database, Metric, NewRecording, Recording, RecordingState, StreamChunk, StreamTail,
    UnsyncedRecording,
};
use activity_recorder::events::EngineEvent;
use activity_recorder::{
    recover_interrupted, AppendOutcome, RecorderContext, RecorderError, RecordingController, Result,
    SessionStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

mod common;

use common::{drain, run_with_hr, test_context, test_db, test_settings};

/// Store whose chunk commits fail while `failures_left` is non-zero.
struct FlakyStore {
    inner: Database,
    failures_left: AtomicUsize,
    commit_calls: AtomicUsize,
}

impl FlakyStore {
    fn new(inner: Database, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
            commit_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn create_recording(&self, new: NewRecording) -> Result<Recording> {
        SessionStore::create_recording(&self.inner, new).await
    }

    async fn get_recording(&self, recording_id: &str) -> Result<Recording> {
        self.inner.get_recording(recording_id).await
    }

    async fn mark_started(&self, recording_id: &str, started_at: DateTime<Utc>) -> Result<()> {
        self.inner.mark_started(recording_id, started_at).await
    }

    async fn update_state(
        &self,
        recording_id: &str,
        state: RecordingState,
        active_ms: u64,
        paused_ms: u64,
    ) -> Result<()> {
        SessionStore::update_state(&self.inner, recording_id, state, active_ms, paused_ms).await
    }

    async fn commit_chunk(
        &self,
        recording_id: &str,
        metric: Metric,
        chunk: &StreamChunk,
    ) -> Result<()> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(anyhow::anyhow!("disk I/O error").into());
        }
        self.inner.commit_chunk(recording_id, metric, chunk).await
    }

    async fn stream_tail(&self, recording_id: &str, metric: Metric) -> Result<StreamTail> {
        self.inner.stream_tail(recording_id, metric).await
    }

    async fn finish_recording(
        &self,
        recording_id: &str,
        final_chunks: Vec<StreamChunk>,
        ended_at: DateTime<Utc>,
        active_ms: u64,
        paused_ms: u64,
    ) -> Result<()> {
        self.inner
            .finish_recording(recording_id, final_chunks, ended_at, active_ms, paused_ms)
            .await
    }

    async fn list_chunks(
        &self,
        recording_id: &str,
        metric: Option<Metric>,
    ) -> Result<Vec<StreamChunk>> {
        self.inner.list_chunks(recording_id, metric).await
    }

    async fn list_unsynced(&self) -> Result<Vec<UnsyncedRecording>> {
        self.inner.list_unsynced().await
    }

    async fn count_unsynced_chunks(&self, recording_id: &str) -> Result<u64> {
        self.inner.count_unsynced_chunks(recording_id).await
    }

    async fn mark_synced(&self, chunk_ids: &[String]) -> Result<()> {
        SessionStore::mark_synced(&self.inner, chunk_ids).await
    }

    async fn mark_recording_synced(&self, recording_id: &str) -> Result<()> {
        self.inner.mark_recording_synced(recording_id).await
    }

    async fn list_incomplete(&self) -> Result<Vec<Recording>> {
        SessionStore::list_incomplete(&self.inner).await
    }

    async fn delete_recording(&self, recording_id: &str) -> Result<()> {
        self.inner.delete_recording(recording_id).await
    }
}

fn flaky_context(db: Database, failures: usize, attempts: u32) -> (RecorderContext, Arc<FlakyStore>) {
    let store = Arc::new(FlakyStore::new(db, failures));
    let mut settings = test_settings(3);
    settings.commit_retry_attempts = attempts;
    let ctx = RecorderContext::with_logging(store.clone(), settings);
    (ctx, store)
}

const T0: i64 = 1_700_000_000_000;

#[tokio::test]
async fn transient_commit_failures_are_retried_in_line() {
    let (_dir, db) = test_db();
    let (ctx, store) = flaky_context(db.clone(), 2, 3);

    let controller = RecordingController::create(ctx, run_with_hr(180)).await.unwrap();
    controller.start().await.unwrap();

    let mut last = AppendOutcome::Buffered;
    for i in 0..3 {
        last = controller
            .append(Metric::HeartRate, 150_i64, T0 + i * 1_000)
            .await
            .unwrap();
    }

    assert_eq!(last, AppendOutcome::Committed { chunk_index: 0 });
    assert_eq!(store.commit_calls.load(Ordering::SeqCst), 3);
    assert_eq!(db.list_chunks(controller.id(), None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn exhausted_retries_keep_the_samples_for_later() {
    let (_dir, db) = test_db();
    let (ctx, _store) = flaky_context(db.clone(), 2, 2);

    let controller = RecordingController::create(ctx, run_with_hr(180)).await.unwrap();
    controller.start().await.unwrap();

    for i in 0..2 {
        controller
            .append(Metric::HeartRate, 150_i64, T0 + i * 1_000)
            .await
            .unwrap();
    }
    let err = controller
        .append(Metric::HeartRate, 150_i64, T0 + 2_000)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RecorderError::CommitFailed {
            metric: Metric::HeartRate,
            chunk_index: 0,
            sample_accepted: true,
            ..
        }
    ));
    assert!(err.is_retryable());

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.pending_samples[&Metric::HeartRate], 3);
    assert!(db.list_chunks(controller.id(), None).await.unwrap().is_empty());

    // The store recovered; the next sample drains the queued chunk first.
    let outcome = controller
        .append(Metric::HeartRate, 151_i64, T0 + 3_000)
        .await
        .unwrap();
    assert_eq!(outcome, AppendOutcome::Committed { chunk_index: 0 });

    controller.finish().await.unwrap();
    let stored = db.list_chunks(controller.id(), None).await.unwrap();
    assert_eq!(
        stored.iter().map(|c| (c.chunk_index, c.sample_count)).collect::<Vec<_>>(),
        vec![(0, 3), (1, 1)]
    );
}

#[tokio::test]
async fn samples_are_refused_while_the_store_stays_down() {
    let (_dir, db) = test_db();
    let (ctx, store) = flaky_context(db.clone(), usize::MAX, 1);

    let controller = RecordingController::create(ctx, run_with_hr(180)).await.unwrap();
    controller.start().await.unwrap();

    for i in 0..2 {
        controller
            .append(Metric::HeartRate, 150_i64, T0 + i * 1_000)
            .await
            .unwrap();
    }
    // Fills the chunk, which then fails to commit. This sample is kept.
    let err = controller
        .append(Metric::HeartRate, 150_i64, T0 + 2_000)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RecorderError::CommitFailed {
            chunk_index: 0,
            sample_accepted: true,
            ..
        }
    ));
    assert_eq!(store.commit_calls.load(Ordering::SeqCst), 1);

    // Every later sample retries the queued chunk once and is refused.
    for i in 3..8 {
        let err = controller
            .append(Metric::HeartRate, 160_i64, T0 + i * 1_000)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RecorderError::CommitFailed {
                chunk_index: 0,
                sample_accepted: false,
                ..
            }
        ));
        assert!(err.to_string().contains("sample not accepted"));
        assert_eq!(
            controller.snapshot().await.pending_samples[&Metric::HeartRate],
            3
        );
    }
    assert_eq!(store.commit_calls.load(Ordering::SeqCst), 6);

    // A refused sample can be resent once the store is back.
    store.failures_left.store(0, Ordering::SeqCst);
    let outcome = controller
        .append(Metric::HeartRate, 160_i64, T0 + 7_000)
        .await
        .unwrap();
    assert_eq!(outcome, AppendOutcome::Committed { chunk_index: 0 });
    assert_eq!(
        controller.snapshot().await.pending_samples[&Metric::HeartRate],
        1
    );

    controller.finish().await.unwrap();
    let stored = db.list_chunks(controller.id(), None).await.unwrap();
    assert_eq!(
        stored
            .iter()
            .map(|c| (c.chunk_index, c.timestamps.clone()))
            .collect::<Vec<_>>(),
        vec![
            (0, vec![T0, T0 + 1_000, T0 + 2_000]),
            (1, vec![T0 + 7_000]),
        ]
    );
}

#[tokio::test]
async fn commit_failures_are_reported_as_events() {
    let (_dir, db) = test_db();
    let store = Arc::new(FlakyStore::new(db, 1));
    let mut settings = test_settings(1);
    settings.commit_retry_attempts = 1;
    let (sink, mut events) = activity_recorder::events::ChannelEventSink::new();
    let ctx = RecorderContext::new(store, Arc::new(sink), settings);

    let controller = RecordingController::create(ctx, run_with_hr(180)).await.unwrap();
    controller.start().await.unwrap();
    assert!(controller
        .append(Metric::HeartRate, 150_i64, T0)
        .await
        .is_err());

    let events = drain(&mut events);
    assert!(events.iter().any(|event| matches!(
        event,
        EngineEvent::CommitFailed {
            chunk_index: 0,
            attempts: 1,
            ..
        }
    )));
    assert!(!events
        .iter()
        .any(|event| matches!(event, EngineEvent::SampleRejected { .. })));
}

#[tokio::test]
async fn interrupted_recordings_are_finished_at_their_last_durable_sample() {
    let (dir, db) = test_db();
    let (ctx, _events) = test_context(db.clone(), test_settings(5));

    let controller = RecordingController::create(ctx.clone(), run_with_hr(180))
        .await
        .unwrap();
    controller.start().await.unwrap();

    let base = Utc::now().timestamp_millis() + 1_000;
    for i in 0..12 {
        controller
            .append(Metric::HeartRate, 150_i64, base + i * 1_000)
            .await
            .unwrap();
    }
    let id = controller.id().to_string();

    // A recording that never started is left alone.
    let idle = RecordingController::create(ctx, run_with_hr(180)).await.unwrap();

    // Crash: the controller and its 2 buffered samples are gone.
    drop(controller);
    drop(db);

    let db = Database::new(dir.path().join("recorder.sqlite3")).unwrap();
    let (ctx, mut events) = test_context(db.clone(), test_settings(5));

    let recovered = recover_interrupted(&ctx).await.unwrap();
    assert_eq!(recovered, vec![id.clone()]);

    let recording = db.get_recording(&id).await.unwrap();
    assert_eq!(recording.state, RecordingState::Finished);
    assert_eq!(
        recording.ended_at.unwrap().timestamp_millis(),
        base + 9_000
    );
    assert_eq!(db.list_chunks(&id, None).await.unwrap().len(), 2);

    assert_eq!(
        db.get_recording(idle.id()).await.unwrap().state,
        RecordingState::Ready
    );
    assert!(matches!(
        drain(&mut events).as_slice(),
        [EngineEvent::RecordingRecovered {
            previous: RecordingState::Recording,
            ..
        }]
    ));

    // Nothing left to recover.
    assert!(recover_interrupted(&ctx).await.unwrap().is_empty());
}
