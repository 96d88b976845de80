use std::collections::VecDeque;

use tokio::sync::watch;

use crate::db::{ChunkData, Metric, RecordingState, SampleValue, StreamChunk, StreamTail};
use crate::error::{RecorderError, Result};
use crate::events::EngineEvent;
use crate::RecorderContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Held in the partial chunk.
    Buffered,
    /// Completed a chunk, which is now durable.
    Committed { chunk_index: u32 },
}

/// Accumulates the samples of one metric of one recording and commits them
/// in fixed-capacity chunks.
///
/// Chunks get their `chunk_index` when sealed and are never modified after.
/// A sealed chunk whose commit fails stays queued and is retried before any
/// newer chunk, so indices reach the store in order and nothing is dropped.
/// While that retry keeps failing, new samples are refused rather than
/// queued, so at most one full chunk waits behind a failed commit.
pub struct StreamBuffer {
    recording_id: String,
    metric: Metric,
    capacity: usize,
    state_rx: watch::Receiver<RecordingState>,
    next_index: u32,
    last_timestamp: Option<i64>,
    data: ChunkData,
    timestamps: Vec<i64>,
    sealed: VecDeque<StreamChunk>,
}

impl StreamBuffer {
    pub fn new(
        recording_id: impl Into<String>,
        metric: Metric,
        capacity: usize,
        tail: StreamTail,
        state_rx: watch::Receiver<RecordingState>,
    ) -> Self {
        Self {
            recording_id: recording_id.into(),
            metric,
            capacity: capacity.max(1),
            state_rx,
            next_index: tail.next_index,
            last_timestamp: tail.last_timestamp,
            data: ChunkData::empty(metric.data_type()),
            timestamps: Vec::new(),
            sealed: VecDeque::new(),
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Samples not yet durable: the partial chunk plus any sealed chunks
    /// waiting for a commit retry.
    pub fn pending_samples(&self) -> usize {
        self.timestamps.len()
            + self
                .sealed
                .iter()
                .map(|chunk| chunk.sample_count as usize)
                .sum::<usize>()
    }

    /// Index the next sealed chunk will receive.
    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    pub async fn append(
        &mut self,
        value: SampleValue,
        timestamp_ms: i64,
        ctx: &RecorderContext,
    ) -> Result<AppendOutcome> {
        let state = *self.state_rx.borrow();
        if state != RecordingState::Recording {
            return Err(RecorderError::NotRecording { state });
        }

        if value.data_type() != self.metric.data_type() {
            return Err(RecorderError::SampleTypeMismatch {
                metric: self.metric,
                expected: self.metric.data_type().as_str(),
            });
        }

        if !value.is_finite() {
            return Err(RecorderError::NonFiniteSample {
                metric: self.metric,
            });
        }

        if let Some(last_ms) = self.last_timestamp {
            if timestamp_ms < last_ms {
                return Err(RecorderError::OutOfOrderSample {
                    metric: self.metric,
                    timestamp_ms,
                    last_ms,
                });
            }
        }

        // A chunk left over from a failed commit goes first. If the store is
        // still down the sample is refused, not queued behind it.
        let drained = if self.sealed.is_empty() {
            None
        } else {
            self.commit_sealed(ctx, false).await?
        };

        // Type was checked above, so the push cannot fail.
        self.data.push(value);
        self.timestamps.push(timestamp_ms);
        self.last_timestamp = Some(timestamp_ms);

        if self.timestamps.len() >= self.capacity {
            self.seal()?;
        }

        let committed = if self.sealed.is_empty() {
            drained
        } else {
            self.commit_sealed(ctx, true).await?.or(drained)
        };

        Ok(match committed {
            Some(chunk_index) => AppendOutcome::Committed { chunk_index },
            None => AppendOutcome::Buffered,
        })
    }

    /// Commits the partial chunk regardless of fill level. Returns the index
    /// of the last chunk committed, or `None` when there was nothing to do.
    pub async fn flush(&mut self, ctx: &RecorderContext) -> Result<Option<u32>> {
        self.seal()?;
        self.commit_sealed(ctx, true).await
    }

    /// Seals the partial chunk and hands over every uncommitted chunk, for a
    /// caller that commits them together with the finish.
    pub fn take_pending(&mut self) -> Result<Vec<StreamChunk>> {
        self.seal()?;
        Ok(self.sealed.drain(..).collect())
    }

    /// Puts chunks from [`take_pending`](Self::take_pending) back after the
    /// caller failed to persist them.
    pub fn restore_pending(&mut self, chunks: Vec<StreamChunk>) {
        for chunk in chunks.into_iter().rev() {
            self.sealed.push_front(chunk);
        }
    }

    fn seal(&mut self) -> Result<()> {
        if self.timestamps.is_empty() {
            return Ok(());
        }

        let data = std::mem::replace(&mut self.data, ChunkData::empty(self.metric.data_type()));
        let timestamps = std::mem::take(&mut self.timestamps);
        let chunk =
            StreamChunk::seal(&self.recording_id, self.metric, self.next_index, data, timestamps)?;
        self.next_index += 1;
        self.sealed.push_back(chunk);
        Ok(())
    }

    /// Commits queued chunks oldest first. `sample_accepted` is reported in
    /// the error so the caller knows whether its sample needs resending.
    async fn commit_sealed(
        &mut self,
        ctx: &RecorderContext,
        sample_accepted: bool,
    ) -> Result<Option<u32>> {
        let attempts = ctx.settings.commit_retry_attempts.max(1);
        let mut last_committed = None;

        while let Some(chunk) = self.sealed.front() {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match ctx
                    .store
                    .commit_chunk(&self.recording_id, self.metric, chunk)
                    .await
                {
                    Ok(()) => break,
                    Err(err) if err.is_retryable() && attempt < attempts => {
                        tokio::time::sleep(ctx.settings.commit_backoff() * attempt).await;
                    }
                    Err(err) => {
                        ctx.events.emit(EngineEvent::CommitFailed {
                            recording_id: self.recording_id.clone(),
                            metric: self.metric,
                            chunk_index: chunk.chunk_index,
                            attempts: attempt,
                            error: err.to_string(),
                        });
                        return Err(RecorderError::CommitFailed {
                            metric: self.metric,
                            chunk_index: chunk.chunk_index,
                            sample_accepted,
                            source: Box::new(err),
                        });
                    }
                }
            }

            ctx.events.emit(EngineEvent::ChunkCommitted {
                recording_id: self.recording_id.clone(),
                metric: self.metric,
                chunk_index: chunk.chunk_index,
                sample_count: chunk.sample_count,
            });
            last_committed = Some(chunk.chunk_index);
            self.sealed.pop_front();
        }

        Ok(last_committed)
    }
}
