//! Physiological zone classification. Everything here is pure: identical
//! inputs always give identical outputs.

pub mod calculator;
pub mod summary;

pub use calculator::{
    average_zone, classify, time_in_zones, zones_from_ftp, zones_from_threshold, ZoneTimes, Zones,
    ZONE_COUNT,
};
pub use summary::ZoneSummary;
