//! Stream chunk data models.
//!
//! A chunk is an immutable, ordered batch of samples for one metric of one
//! recording. Samples carry epoch-millisecond timestamps; the encoding of the
//! values is fixed per metric (see [`Metric::data_type`]).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RecorderError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    HeartRate,
    Power,
    Cadence,
    Speed,
    Distance,
    Elevation,
    Position,
    Temperature,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::HeartRate => "heart_rate",
            Metric::Power => "power",
            Metric::Cadence => "cadence",
            Metric::Speed => "speed",
            Metric::Distance => "distance",
            Metric::Elevation => "elevation",
            Metric::Position => "position",
            Metric::Temperature => "temperature",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "heart_rate" => Some(Metric::HeartRate),
            "power" => Some(Metric::Power),
            "cadence" => Some(Metric::Cadence),
            "speed" => Some(Metric::Speed),
            "distance" => Some(Metric::Distance),
            "elevation" => Some(Metric::Elevation),
            "position" => Some(Metric::Position),
            "temperature" => Some(Metric::Temperature),
            _ => None,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Metric::HeartRate | Metric::Power | Metric::Cadence => DataType::Integer,
            Metric::Speed | Metric::Distance | Metric::Elevation | Metric::Temperature => {
                DataType::Float
            }
            Metric::Position => DataType::LatLng,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sample encoding of a chunk's `data` column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Integer,
    Float,
    LatLng,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::LatLng => "latlng",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "integer" => Some(DataType::Integer),
            "float" => Some(DataType::Float),
            "latlng" => Some(DataType::LatLng),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue {
    Integer(i64),
    Float(f64),
    LatLng(Coordinate),
}

impl SampleValue {
    pub fn data_type(&self) -> DataType {
        match self {
            SampleValue::Integer(_) => DataType::Integer,
            SampleValue::Float(_) => DataType::Float,
            SampleValue::LatLng(_) => DataType::LatLng,
        }
    }

    /// NaN and infinities have no JSON encoding, so they never enter a chunk.
    pub fn is_finite(&self) -> bool {
        match self {
            SampleValue::Integer(_) => true,
            SampleValue::Float(v) => v.is_finite(),
            SampleValue::LatLng(c) => c.lat.is_finite() && c.lng.is_finite(),
        }
    }
}

impl From<i64> for SampleValue {
    fn from(value: i64) -> Self {
        SampleValue::Integer(value)
    }
}

impl From<f64> for SampleValue {
    fn from(value: f64) -> Self {
        SampleValue::Float(value)
    }
}

impl From<Coordinate> for SampleValue {
    fn from(value: Coordinate) -> Self {
        SampleValue::LatLng(value)
    }
}

/// Typed sample values of one chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ChunkData {
    Integer(Vec<i64>),
    Float(Vec<f64>),
    LatLng(Vec<Coordinate>),
}

impl ChunkData {
    pub fn empty(data_type: DataType) -> Self {
        match data_type {
            DataType::Integer => ChunkData::Integer(Vec::new()),
            DataType::Float => ChunkData::Float(Vec::new()),
            DataType::LatLng => ChunkData::LatLng(Vec::new()),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ChunkData::Integer(_) => DataType::Integer,
            ChunkData::Float(_) => DataType::Float,
            ChunkData::LatLng(_) => DataType::LatLng,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ChunkData::Integer(values) => values.len(),
            ChunkData::Float(values) => values.len(),
            ChunkData::LatLng(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes a value of the matching encoding. Returns `false` on mismatch.
    pub fn push(&mut self, value: SampleValue) -> bool {
        match (self, value) {
            (ChunkData::Integer(values), SampleValue::Integer(v)) => values.push(v),
            (ChunkData::Float(values), SampleValue::Float(v)) => values.push(v),
            (ChunkData::LatLng(values), SampleValue::LatLng(v)) => values.push(v),
            _ => return false,
        }
        true
    }

    pub fn all_finite(&self) -> bool {
        match self {
            ChunkData::Integer(_) => true,
            ChunkData::Float(values) => values.iter().all(|v| v.is_finite()),
            ChunkData::LatLng(values) => values
                .iter()
                .all(|c| c.lat.is_finite() && c.lng.is_finite()),
        }
    }

    /// Scalar view used by zone analytics. Coordinates have none.
    pub fn scalars(&self) -> Vec<f64> {
        match self {
            ChunkData::Integer(values) => values.iter().map(|v| *v as f64).collect(),
            ChunkData::Float(values) => values.clone(),
            ChunkData::LatLng(_) => Vec::new(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|err| RecorderError::Storage(anyhow::anyhow!("failed to encode chunk data: {err}")))
    }

    pub fn from_json(data_type: DataType, raw: &str) -> Result<Self> {
        let decoded = match data_type {
            DataType::Integer => serde_json::from_str(raw).map(ChunkData::Integer),
            DataType::Float => serde_json::from_str(raw).map(ChunkData::Float),
            DataType::LatLng => serde_json::from_str(raw).map(ChunkData::LatLng),
        };
        decoded.map_err(|err| RecorderError::Storage(anyhow::anyhow!("failed to decode chunk data: {err}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    pub id: String,
    pub recording_id: String,
    pub metric: Metric,
    pub data_type: DataType,
    pub chunk_index: u32,
    pub sample_count: u32,
    pub start_time: i64,
    pub end_time: i64,
    pub data: ChunkData,
    pub timestamps: Vec<i64>,
    pub synced: bool,
}

impl StreamChunk {
    /// Builds a sealed chunk from buffered samples. `timestamps` must not be empty.
    pub fn seal(
        recording_id: &str,
        metric: Metric,
        chunk_index: u32,
        data: ChunkData,
        timestamps: Vec<i64>,
    ) -> Result<Self> {
        let (Some(&start_time), Some(&end_time)) = (timestamps.first(), timestamps.last()) else {
            return Err(RecorderError::InvalidChunk("chunk has no samples".into()));
        };
        let chunk = Self {
            id: uuid::Uuid::new_v4().to_string(),
            recording_id: recording_id.to_string(),
            metric,
            data_type: data.data_type(),
            chunk_index,
            sample_count: u32::try_from(timestamps.len())
                .map_err(|_| RecorderError::InvalidChunk("too many samples".into()))?,
            start_time,
            end_time,
            data,
            timestamps,
            synced: false,
        };
        chunk.validate()?;
        Ok(chunk)
    }

    /// Checks the structural invariants every committed chunk must satisfy.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(RecorderError::InvalidChunk(msg));

        if self.sample_count == 0 {
            return invalid(format!("chunk {} is empty", self.chunk_index));
        }
        if self.data.len() != self.sample_count as usize
            || self.timestamps.len() != self.sample_count as usize
        {
            return invalid(format!(
                "sample_count {} does not match data ({}) / timestamps ({})",
                self.sample_count,
                self.data.len(),
                self.timestamps.len()
            ));
        }
        if self.data_type != self.metric.data_type() || self.data.data_type() != self.data_type {
            return invalid(format!(
                "{} chunk must hold {} data",
                self.metric,
                self.metric.data_type().as_str()
            ));
        }
        if !self.data.all_finite() {
            return invalid(format!(
                "{} chunk {} holds a non-finite value",
                self.metric, self.chunk_index
            ));
        }
        if self.timestamps.windows(2).any(|pair| pair[1] < pair[0]) {
            return invalid("timestamps are not non-decreasing".into());
        }
        if self.timestamps.first() != Some(&self.start_time)
            || self.timestamps.last() != Some(&self.end_time)
        {
            return invalid("start/end time do not match timestamps".into());
        }
        Ok(())
    }

    pub fn scalars(&self) -> Vec<f64> {
        self.data.scalars()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_sets_bounds_from_timestamps() {
        let chunk = StreamChunk::seal(
            "rec-1",
            Metric::HeartRate,
            3,
            ChunkData::Integer(vec![120, 121, 125]),
            vec![1_000, 2_000, 3_000],
        )
        .unwrap();

        assert_eq!(chunk.sample_count, 3);
        assert_eq!(chunk.start_time, 1_000);
        assert_eq!(chunk.end_time, 3_000);
        assert_eq!(chunk.data_type, DataType::Integer);
        assert!(!chunk.synced);
    }

    #[test]
    fn seal_rejects_length_mismatch() {
        let err = StreamChunk::seal(
            "rec-1",
            Metric::HeartRate,
            0,
            ChunkData::Integer(vec![120, 121]),
            vec![1_000],
        )
        .unwrap_err();
        assert!(matches!(err, RecorderError::InvalidChunk(_)));
    }

    #[test]
    fn seal_rejects_wrong_encoding_for_metric() {
        let err = StreamChunk::seal(
            "rec-1",
            Metric::Speed,
            0,
            ChunkData::Integer(vec![5]),
            vec![1_000],
        )
        .unwrap_err();
        assert!(matches!(err, RecorderError::InvalidChunk(_)));
    }

    #[test]
    fn seal_rejects_non_finite_values() {
        let err = StreamChunk::seal(
            "rec-1",
            Metric::Speed,
            0,
            ChunkData::Float(vec![3.1, f64::NAN]),
            vec![1_000, 2_000],
        )
        .unwrap_err();
        assert!(matches!(err, RecorderError::InvalidChunk(_)));

        let err = StreamChunk::seal(
            "rec-1",
            Metric::Position,
            0,
            ChunkData::LatLng(vec![Coordinate {
                lat: 51.5,
                lng: f64::INFINITY,
            }]),
            vec![1_000],
        )
        .unwrap_err();
        assert!(matches!(err, RecorderError::InvalidChunk(_)));

        assert!(!SampleValue::Float(f64::NEG_INFINITY).is_finite());
        assert!(SampleValue::Integer(i64::MAX).is_finite());
    }

    #[test]
    fn data_json_is_decoded_by_type() {
        let data = ChunkData::LatLng(vec![Coordinate {
            lat: 37.4,
            lng: -122.1,
        }]);
        let raw = data.to_json().unwrap();
        assert_eq!(ChunkData::from_json(DataType::LatLng, &raw).unwrap(), data);

        let floats = ChunkData::from_json(DataType::Float, "[1, 2.5]").unwrap();
        assert_eq!(floats, ChunkData::Float(vec![1.0, 2.5]));
    }

    #[test]
    fn push_refuses_mismatched_value() {
        let mut data = ChunkData::empty(DataType::Integer);
        assert!(data.push(SampleValue::Integer(140)));
        assert!(!data.push(SampleValue::Float(1.5)));
        assert_eq!(data.len(), 1);
    }
}
