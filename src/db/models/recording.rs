//! Recording-related data models.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::zones::{zones_from_ftp, zones_from_threshold, Zones};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum RecordingState {
    Ready,
    Recording,
    Paused,
    Finished,
}

impl Default for RecordingState {
    fn default() -> Self {
        RecordingState::Ready
    }
}

impl RecordingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingState::Ready => "ready",
            RecordingState::Recording => "recording",
            RecordingState::Paused => "paused",
            RecordingState::Finished => "finished",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ready" => Some(RecordingState::Ready),
            "recording" => Some(RecordingState::Recording),
            "paused" => Some(RecordingState::Paused),
            "finished" => Some(RecordingState::Finished),
            _ => None,
        }
    }
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    OutdoorRun,
    OutdoorBike,
    OutdoorWalk,
    IndoorTreadmill,
    IndoorBikeTrainer,
    IndoorStrength,
    Swim,
    Other,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::OutdoorRun => "outdoor_run",
            ActivityType::OutdoorBike => "outdoor_bike",
            ActivityType::OutdoorWalk => "outdoor_walk",
            ActivityType::IndoorTreadmill => "indoor_treadmill",
            ActivityType::IndoorBikeTrainer => "indoor_bike_trainer",
            ActivityType::IndoorStrength => "indoor_strength",
            ActivityType::Swim => "swim",
            ActivityType::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "outdoor_run" => Some(ActivityType::OutdoorRun),
            "outdoor_bike" => Some(ActivityType::OutdoorBike),
            "outdoor_walk" => Some(ActivityType::OutdoorWalk),
            "indoor_treadmill" => Some(ActivityType::IndoorTreadmill),
            "indoor_bike_trainer" => Some(ActivityType::IndoorBikeTrainer),
            "indoor_strength" => Some(ActivityType::IndoorStrength),
            "swim" => Some(ActivityType::Swim),
            "other" => Some(ActivityType::Other),
            _ => None,
        }
    }
}

/// Athlete profile values frozen when the recording is created, so later
/// profile edits never change historical zone analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSnapshot {
    pub weight_kg: Option<f64>,
    pub ftp: Option<u32>,
    pub threshold_hr: Option<u32>,
}

impl ProfileSnapshot {
    pub fn heart_rate_zones(&self) -> Option<Zones> {
        self.threshold_hr
            .and_then(|hr| zones_from_threshold(f64::from(hr)))
    }

    pub fn power_zones(&self) -> Option<Zones> {
        self.ftp.and_then(|ftp| zones_from_ftp(f64::from(ftp)))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntensityKind {
    PercentThresholdHr,
    PercentFtp,
    Watts,
    Bpm,
    Rpe,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntensityTarget {
    pub kind: IntensityKind,
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutStep {
    pub name: String,
    pub duration_secs: Option<u32>,
    pub distance_m: Option<f64>,
    pub target: Option<IntensityTarget>,
    #[serde(default = "one")]
    pub repeat: u32,
}

fn one() -> u32 {
    1
}

/// Versioned workout plan attached to a planned activity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutStructure {
    pub version: u32,
    pub steps: Vec<WorkoutStep>,
}

impl WorkoutStructure {
    /// Total planned time of all timed steps, honouring repeats.
    pub fn total_duration_secs(&self) -> u64 {
        self.steps
            .iter()
            .filter_map(|step| {
                step.duration_secs
                    .map(|secs| u64::from(secs) * u64::from(step.repeat.max(1)))
            })
            .sum()
    }
}

/// Snapshot of the scheduled plan a recording was launched from. Either the
/// whole snapshot is present or none of it is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlannedActivity {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub structure: WorkoutStructure,
    pub estimated_duration_secs: u32,
    pub estimated_distance_m: Option<f64>,
    pub estimated_training_load: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: String,
    pub activity_type: ActivityType,
    pub state: RecordingState,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub active_ms: u64,
    pub paused_ms: u64,
    pub synced: bool,
    pub profile: ProfileSnapshot,
    pub planned_activity: Option<PlannedActivity>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a recording in the `ready` state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecording {
    pub activity_type: ActivityType,
    #[serde(default)]
    pub profile: ProfileSnapshot,
    pub planned_activity: Option<PlannedActivity>,
}

impl NewRecording {
    pub fn new(activity_type: ActivityType, profile: ProfileSnapshot) -> Self {
        Self {
            activity_type,
            profile,
            planned_activity: None,
        }
    }

    pub fn with_plan(mut self, plan: PlannedActivity) -> Self {
        self.planned_activity = Some(plan);
        self
    }

    pub fn into_recording(self, id: String, created_at: DateTime<Utc>) -> Recording {
        Recording {
            id,
            activity_type: self.activity_type,
            state: RecordingState::Ready,
            started_at: None,
            ended_at: None,
            active_ms: 0,
            paused_ms: 0,
            synced: false,
            profile: self.profile,
            planned_activity: self.planned_activity,
            created_at,
        }
    }
}
