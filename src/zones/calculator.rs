use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Number of intensity zones.
pub const ZONE_COUNT: usize = 5;

/// Lower bounds of zones 1-5 as fractions of threshold heart rate.
const HR_ZONE_FRACTIONS: [f64; ZONE_COUNT] = [0.68, 0.80, 0.90, 1.00, 1.10];

/// Lower bounds of zones 1-5 as fractions of functional threshold power.
const POWER_ZONE_FRACTIONS: [f64; ZONE_COUNT] = [0.30, 0.55, 0.75, 0.90, 1.05];

/// Inclusive lower bounds of zones 1-5, always strictly increasing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Zones {
    bounds: [u32; ZONE_COUNT],
}

impl Zones {
    pub fn bounds(&self) -> &[u32; ZONE_COUNT] {
        &self.bounds
    }

    /// Lower bound of `zone` (1-5).
    pub fn lower_bound(&self, zone: u8) -> Option<u32> {
        let zone = usize::from(zone);
        (1..=ZONE_COUNT)
            .contains(&zone)
            .then(|| self.bounds[zone - 1])
    }
}

fn scaled(threshold: f64, fractions: &[f64; ZONE_COUNT]) -> Option<Zones> {
    if !threshold.is_finite() || threshold <= 0.0 {
        return None;
    }
    let mut bounds = [0u32; ZONE_COUNT];
    for (bound, fraction) in bounds.iter_mut().zip(fractions) {
        *bound = (threshold * fraction).round() as u32;
    }
    // Rounding collapses neighbouring bounds for tiny thresholds.
    bounds
        .windows(2)
        .all(|pair| pair[0] < pair[1])
        .then_some(Zones { bounds })
}

/// Heart-rate zones scaled from threshold heart rate. `None` when the
/// threshold is too small to give five distinct bounds.
pub fn zones_from_threshold(threshold_hr: f64) -> Option<Zones> {
    scaled(threshold_hr, &HR_ZONE_FRACTIONS)
}

/// Power zones scaled from FTP. `None` when the FTP is too small to give
/// five distinct bounds.
pub fn zones_from_ftp(ftp: f64) -> Option<Zones> {
    scaled(ftp, &POWER_ZONE_FRACTIONS)
}

/// Highest zone whose lower bound `value` reaches, or 0 below zone 1.
pub fn classify(value: f64, zones: &Zones) -> u8 {
    for zone in (1..=ZONE_COUNT).rev() {
        if value >= f64::from(zones.bounds[zone - 1]) {
            return zone as u8;
        }
    }
    0
}

/// Mean zone across `samples`, rounded to one decimal. 0 for no samples.
pub fn average_zone(samples: &[f64], zones: &Zones) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let total: u64 = samples
        .iter()
        .map(|value| u64::from(classify(*value, zones)))
        .sum();
    let mean = total as f64 / samples.len() as f64;
    (mean * 10.0).round() / 10.0
}

/// Sample counts per zone. Samples below zone 1 are counted separately and
/// never attributed to a zone bucket.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ZoneTimes {
    pub below_zone1: u64,
    pub zones: [u64; ZONE_COUNT],
}

impl ZoneTimes {
    pub fn total_samples(&self) -> u64 {
        self.below_zone1 + self.zones.iter().sum::<u64>()
    }

    /// Converts counts into time, one `sample_interval` per sample.
    pub fn durations(&self, sample_interval: Duration) -> [Duration; ZONE_COUNT] {
        let mut out = [Duration::ZERO; ZONE_COUNT];
        for (slot, count) in out.iter_mut().zip(self.zones.iter()) {
            *slot = sample_interval.saturating_mul(u32::try_from(*count).unwrap_or(u32::MAX));
        }
        out
    }
}

pub fn time_in_zones(samples: &[f64], zones: &Zones) -> ZoneTimes {
    let mut times = ZoneTimes::default();
    for value in samples {
        match classify(*value, zones) {
            0 => times.below_zone1 += 1,
            zone => times.zones[usize::from(zone) - 1] += 1,
        }
    }
    times
}
