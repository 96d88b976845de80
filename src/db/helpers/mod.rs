use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use crate::db::models::{ActivityType, DataType, Metric, RecordingState};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} value {value} is out of range"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_state(value: &str) -> Result<RecordingState> {
    RecordingState::parse(value).ok_or_else(|| anyhow!("unknown recording state {value}"))
}

pub fn parse_activity_type(value: &str) -> Result<ActivityType> {
    ActivityType::parse(value).ok_or_else(|| anyhow!("unknown activity type {value}"))
}

pub fn parse_metric(value: &str) -> Result<Metric> {
    Metric::parse(value).ok_or_else(|| anyhow!("unknown metric {value}"))
}

pub fn parse_data_type(value: &str) -> Result<DataType> {
    DataType::parse(value).ok_or_else(|| anyhow!("unknown data type {value}"))
}
