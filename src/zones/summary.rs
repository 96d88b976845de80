use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::{Metric, StreamChunk};

use super::calculator::{average_zone, time_in_zones, ZoneTimes, Zones, ZONE_COUNT};

/// Zone analysis of one metric over the committed chunks of a recording.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZoneSummary {
    pub metric: Metric,
    pub zones: Zones,
    pub sample_count: u64,
    pub average_zone: f64,
    pub times: ZoneTimes,
    pub seconds_in_zones: [f64; ZONE_COUNT],
}

impl ZoneSummary {
    /// Chunks of other metrics are skipped; the rest are read in
    /// `chunk_index` order regardless of the order given.
    pub fn from_chunks(
        metric: Metric,
        chunks: &[StreamChunk],
        zones: Zones,
        sample_interval: Duration,
    ) -> Self {
        let mut relevant: Vec<&StreamChunk> =
            chunks.iter().filter(|chunk| chunk.metric == metric).collect();
        relevant.sort_by_key(|chunk| chunk.chunk_index);

        let samples: Vec<f64> = relevant.iter().flat_map(|chunk| chunk.scalars()).collect();
        let times = time_in_zones(&samples, &zones);
        let durations = times.durations(sample_interval);

        let mut seconds_in_zones = [0.0; ZONE_COUNT];
        for (slot, duration) in seconds_in_zones.iter_mut().zip(durations.iter()) {
            *slot = duration.as_secs_f64();
        }

        Self {
            metric,
            zones,
            sample_count: samples.len() as u64,
            average_zone: average_zone(&samples, &zones),
            times,
            seconds_in_zones,
        }
    }
}
