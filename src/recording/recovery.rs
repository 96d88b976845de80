use chrono::{DateTime, TimeZone, Utc};
use log::warn;

use crate::db::Recording;
use crate::error::Result;
use crate::events::EngineEvent;
use crate::RecorderContext;

/// Finishes recordings that a crash left in `recording` or `paused`.
///
/// Only committed chunks survive a crash, so the recording ends at its last
/// durable sample (or its start when nothing was committed). Returns the ids
/// of the recovered recordings.
pub async fn recover_interrupted(ctx: &RecorderContext) -> Result<Vec<String>> {
    let incomplete = ctx.store.list_incomplete().await?;
    let mut recovered = Vec::with_capacity(incomplete.len());

    for recording in incomplete {
        let chunks = ctx.store.list_chunks(&recording.id, None).await?;
        let last_sample = chunks.iter().map(|chunk| chunk.end_time).max();
        let ended_at = recovered_end(&recording, last_sample);

        let span_ms = recording
            .started_at
            .map(|started| (ended_at - started).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        let active_ms = recording
            .active_ms
            .max(span_ms.saturating_sub(recording.paused_ms));

        warn!(
            "Recovered incomplete recording {}; marking as finished at {}",
            recording.id, ended_at
        );
        ctx.store
            .mark_finished(&recording.id, ended_at, active_ms, recording.paused_ms)
            .await?;

        ctx.events.emit(EngineEvent::RecordingRecovered {
            recording_id: recording.id.clone(),
            previous: recording.state,
        });
        recovered.push(recording.id);
    }

    Ok(recovered)
}

fn recovered_end(recording: &Recording, last_sample_ms: Option<i64>) -> DateTime<Utc> {
    let from_samples = last_sample_ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single());
    let floor = recording.started_at.unwrap_or(recording.created_at);
    match from_samples {
        Some(end) if end >= floor => end,
        _ => floor,
    }
}
