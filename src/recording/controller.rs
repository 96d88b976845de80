use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock},
    time::Instant,
};

use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use tokio::sync::{watch, Mutex};

use crate::db::{Metric, NewRecording, Recording, RecordingState, SampleValue, StreamChunk};
use crate::error::{RecorderError, Result};
use crate::events::EngineEvent;
use crate::zones::ZoneSummary;
use crate::RecorderContext;

use super::buffer::{AppendOutcome, StreamBuffer};
use super::state::{Command, RecordingClock};

type SharedBuffer = Arc<Mutex<StreamBuffer>>;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSnapshot {
    pub recording_id: String,
    pub state: RecordingState,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub active_ms: u64,
    pub paused_ms: u64,
    pub pending_samples: BTreeMap<Metric, usize>,
    pub next_chunk_index: BTreeMap<Metric, u32>,
}

/// Drives a single recording through `ready -> recording -> paused -> finished`.
///
/// Transitions are serialized by one lock per recording. Sample ingestion
/// only takes the lock of the metric's own buffer, so metrics never wait on
/// each other.
pub struct RecordingController {
    recording_id: String,
    ctx: RecorderContext,
    clock: Mutex<RecordingClock>,
    state_tx: watch::Sender<RecordingState>,
    buffers: RwLock<HashMap<Metric, SharedBuffer>>,
}

impl RecordingController {
    /// Creates a new recording in the `ready` state.
    pub async fn create(ctx: RecorderContext, new: NewRecording) -> Result<Self> {
        let recording = ctx.store.create_recording(new).await?;
        debug!("Created recording {}", recording.id);

        let (state_tx, _) = watch::channel(RecordingState::Ready);
        Ok(Self {
            recording_id: recording.id,
            ctx,
            clock: Mutex::new(RecordingClock::new()),
            state_tx,
            buffers: RwLock::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> &str {
        &self.recording_id
    }

    pub fn state(&self) -> RecordingState {
        *self.state_tx.borrow()
    }

    /// Durable view of the recording.
    pub async fn recording(&self) -> Result<Recording> {
        self.ctx.store.get_recording(&self.recording_id).await
    }

    pub async fn start(&self) -> Result<()> {
        let mut clock = self.clock.lock().await;
        let now = Utc::now();
        let previous = clock.apply(Command::Start, now, Instant::now())?;

        if let Err(err) = self.ctx.store.mark_started(&self.recording_id, now).await {
            clock.revert(previous, Instant::now());
            return Err(err);
        }

        self.publish(previous, clock.state);
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        let mut clock = self.clock.lock().await;
        let previous = clock.apply(Command::Pause, Utc::now(), Instant::now())?;
        self.state_tx.send_replace(clock.state);

        // Wait out appends already past their state check, and optionally
        // persist what they left behind while the store still says recording.
        let mut result = Ok(());
        for buffer in self.buffer_handles() {
            let mut buffer = buffer.lock().await;
            if self.ctx.settings.flush_on_pause {
                if let Err(err) = buffer.flush(&self.ctx).await {
                    result = Err(err);
                    break;
                }
            }
        }

        if result.is_ok() {
            let now = Instant::now();
            result = self
                .ctx
                .store
                .update_state(
                    &self.recording_id,
                    RecordingState::Paused,
                    clock.active_ms_at(now),
                    clock.paused_ms_at(now),
                )
                .await;
        }

        if let Err(err) = result {
            clock.revert(previous, Instant::now());
            self.state_tx.send_replace(previous);
            return Err(err);
        }

        self.publish(previous, clock.state);
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        let mut clock = self.clock.lock().await;
        let previous = clock.apply(Command::Resume, Utc::now(), Instant::now())?;

        let now = Instant::now();
        if let Err(err) = self
            .ctx
            .store
            .update_state(
                &self.recording_id,
                RecordingState::Recording,
                clock.active_ms_at(now),
                clock.paused_ms_at(now),
            )
            .await
        {
            clock.revert(previous, Instant::now());
            return Err(err);
        }

        self.publish(previous, clock.state);
        Ok(())
    }

    /// Flushes every buffer and finishes the recording in one atomic store
    /// write. On failure the recording stays in its previous state with all
    /// samples still buffered, so finish can be retried.
    pub async fn finish(&self) -> Result<Recording> {
        let mut clock = self.clock.lock().await;
        let ended_at = Utc::now();
        let previous = clock.apply(Command::Finish, ended_at, Instant::now())?;
        self.state_tx.send_replace(clock.state);

        let handles: Vec<(Metric, SharedBuffer)> = match self.buffers.read() {
            Ok(map) => map.iter().map(|(m, b)| (*m, Arc::clone(b))).collect(),
            Err(poisoned) => poisoned
                .into_inner()
                .iter()
                .map(|(m, b)| (*m, Arc::clone(b)))
                .collect(),
        };

        let mut guards = Vec::with_capacity(handles.len());
        for (metric, handle) in &handles {
            guards.push((*metric, handle.lock().await));
        }

        let mut taken: Vec<(Metric, Vec<StreamChunk>)> = Vec::with_capacity(guards.len());
        let mut take_error = None;
        for (metric, guard) in guards.iter_mut() {
            match guard.take_pending() {
                Ok(chunks) => taken.push((*metric, chunks)),
                Err(err) => {
                    take_error = Some(err);
                    break;
                }
            }
        }

        let final_chunks: Vec<StreamChunk> = taken
            .iter()
            .flat_map(|(_, chunks)| chunks.iter().cloned())
            .collect();

        let now = Instant::now();
        let result = match take_error {
            Some(err) => Err(err),
            None => {
                self.ctx
                    .store
                    .finish_recording(
                        &self.recording_id,
                        final_chunks.clone(),
                        ended_at,
                        clock.active_ms_at(now),
                        clock.paused_ms_at(now),
                    )
                    .await
            }
        };

        if let Err(err) = result {
            for (metric, chunks) in taken {
                if let Some((_, guard)) = guards.iter_mut().find(|(m, _)| *m == metric) {
                    guard.restore_pending(chunks);
                }
            }
            clock.revert(previous, Instant::now());
            self.state_tx.send_replace(previous);
            return Err(err);
        }

        for chunk in &final_chunks {
            self.ctx.events.emit(EngineEvent::ChunkCommitted {
                recording_id: self.recording_id.clone(),
                metric: chunk.metric,
                chunk_index: chunk.chunk_index,
                sample_count: chunk.sample_count,
            });
        }

        drop(guards);
        match self.buffers.write() {
            Ok(mut map) => map.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }

        self.publish(previous, clock.state);
        drop(clock);

        self.recording().await
    }

    /// Feeds one sensor sample. Rejected samples are reported to the caller
    /// and to the event sink; they never stop the recording.
    pub async fn append(
        &self,
        metric: Metric,
        value: impl Into<SampleValue>,
        timestamp_ms: i64,
    ) -> Result<AppendOutcome> {
        let value = value.into();
        let result = self.append_inner(metric, value, timestamp_ms).await;

        if let Err(err) = &result {
            if err.is_sample_rejection() {
                self.ctx.events.emit(EngineEvent::SampleRejected {
                    recording_id: self.recording_id.clone(),
                    metric,
                    reason: err.to_string(),
                });
            }
        }
        result
    }

    async fn append_inner(
        &self,
        metric: Metric,
        value: SampleValue,
        timestamp_ms: i64,
    ) -> Result<AppendOutcome> {
        let state = self.state();
        if state != RecordingState::Recording {
            return Err(RecorderError::NotRecording { state });
        }

        let buffer = self.buffer_for(metric).await?;
        let mut buffer = buffer.lock().await;
        buffer.append(value, timestamp_ms, &self.ctx).await
    }

    /// Persist point: commits every partial chunk while recording.
    pub async fn flush(&self) -> Result<()> {
        let _clock = self.clock.lock().await;
        let state = self.state();
        if state != RecordingState::Recording {
            return Err(RecorderError::InvalidTransition {
                action: "flush",
                state,
            });
        }

        for buffer in self.buffer_handles() {
            buffer.lock().await.flush(&self.ctx).await?;
        }
        Ok(())
    }

    pub async fn snapshot(&self) -> RecordingSnapshot {
        let clock = self.clock.lock().await.clone();
        let now = Instant::now();

        let mut pending_samples = BTreeMap::new();
        let mut next_chunk_index = BTreeMap::new();
        for buffer in self.buffer_handles() {
            let buffer = buffer.lock().await;
            pending_samples.insert(buffer.metric(), buffer.pending_samples());
            next_chunk_index.insert(buffer.metric(), buffer.next_index());
        }

        RecordingSnapshot {
            recording_id: self.recording_id.clone(),
            state: clock.state,
            started_at: clock.started_at,
            ended_at: clock.ended_at,
            active_ms: clock.active_ms_at(now),
            paused_ms: clock.paused_ms_at(now),
            pending_samples,
            next_chunk_index,
        }
    }

    /// Zone analysis of the committed heart-rate or power stream, using the
    /// profile captured at creation. `None` when the profile has no usable
    /// threshold for that metric.
    pub async fn zone_summary(&self, metric: Metric) -> Result<Option<ZoneSummary>> {
        let recording = self.recording().await?;
        let zones = match metric {
            Metric::HeartRate => recording.profile.heart_rate_zones(),
            Metric::Power => recording.profile.power_zones(),
            _ => None,
        };
        let Some(zones) = zones else {
            return Ok(None);
        };

        let chunks = self
            .ctx
            .store
            .list_chunks(&self.recording_id, Some(metric))
            .await?;
        Ok(Some(ZoneSummary::from_chunks(
            metric,
            &chunks,
            zones,
            self.ctx.settings.sample_interval(),
        )))
    }

    async fn buffer_for(&self, metric: Metric) -> Result<SharedBuffer> {
        if let Some(buffer) = self.lookup_buffer(metric) {
            return Ok(buffer);
        }

        // Continue numbering after anything already in the store.
        let tail = self
            .ctx
            .store
            .stream_tail(&self.recording_id, metric)
            .await?;

        let mut map = match self.buffers.write() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        let buffer = map.entry(metric).or_insert_with(|| {
            debug!("Opening {metric} stream for recording {}", self.recording_id);
            Arc::new(Mutex::new(StreamBuffer::new(
                self.recording_id.clone(),
                metric,
                self.ctx.settings.chunk_capacity,
                tail,
                self.state_tx.subscribe(),
            )))
        });
        Ok(Arc::clone(buffer))
    }

    fn lookup_buffer(&self, metric: Metric) -> Option<SharedBuffer> {
        match self.buffers.read() {
            Ok(map) => map.get(&metric).cloned(),
            Err(poisoned) => poisoned.into_inner().get(&metric).cloned(),
        }
    }

    fn buffer_handles(&self) -> Vec<SharedBuffer> {
        match self.buffers.read() {
            Ok(map) => map.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        }
    }

    fn publish(&self, from: RecordingState, to: RecordingState) {
        self.state_tx.send_replace(to);
        self.ctx.events.emit(EngineEvent::TransitionOccurred {
            recording_id: self.recording_id.clone(),
            from,
            to,
        });
    }
}
