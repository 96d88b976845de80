use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::db::RecordingState;
use crate::error::{RecorderError, Result};

/// Commands the controller accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Pause,
    Resume,
    Finish,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Finish => "finish",
        }
    }
}

/// Target state of `command` from `state`, or an invalid-transition error.
pub fn next_state(state: RecordingState, command: Command) -> Result<RecordingState> {
    use RecordingState::*;

    match (state, command) {
        (Ready, Command::Start) => Ok(Recording),
        (Recording, Command::Pause) => Ok(Paused),
        (Paused, Command::Resume) => Ok(Recording),
        (Recording | Paused, Command::Finish) => Ok(Finished),
        (state, command) => Err(RecorderError::InvalidTransition {
            action: command.as_str(),
            state,
        }),
    }
}

/// State and duration accounting of one recording.
///
/// Active time accumulates only while recording; paused windows are tracked
/// separately so they never count towards the workout duration.
#[derive(Debug, Clone)]
pub struct RecordingClock {
    pub state: RecordingState,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    active_ms_baseline: u64,
    paused_ms_baseline: u64,
    /// Start of the current recording or paused window.
    anchor: Option<Instant>,
}

impl Default for RecordingClock {
    fn default() -> Self {
        Self {
            state: RecordingState::Ready,
            started_at: None,
            ended_at: None,
            active_ms_baseline: 0,
            paused_ms_baseline: 0,
            anchor: None,
        }
    }
}

impl RecordingClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_ms_at(&self, now: Instant) -> u64 {
        match (self.state, self.anchor) {
            (RecordingState::Recording, Some(anchor)) => self
                .active_ms_baseline
                .saturating_add(now.saturating_duration_since(anchor).as_millis() as u64),
            _ => self.active_ms_baseline,
        }
    }

    pub fn paused_ms_at(&self, now: Instant) -> u64 {
        match (self.state, self.anchor) {
            (RecordingState::Paused, Some(anchor)) => self
                .paused_ms_baseline
                .saturating_add(now.saturating_duration_since(anchor).as_millis() as u64),
            _ => self.paused_ms_baseline,
        }
    }

    /// Closes the current window, folding it into the baselines.
    fn settle(&mut self, now: Instant) {
        self.active_ms_baseline = self.active_ms_at(now);
        self.paused_ms_baseline = self.paused_ms_at(now);
        self.anchor = Some(now);
    }

    /// Applies `command`, returning the state left behind.
    pub fn apply(
        &mut self,
        command: Command,
        wall_clock: DateTime<Utc>,
        now: Instant,
    ) -> Result<RecordingState> {
        let target = next_state(self.state, command)?;
        let previous = self.state;

        self.settle(now);
        match command {
            Command::Start => self.started_at = Some(wall_clock),
            Command::Finish => {
                self.ended_at = Some(wall_clock);
                self.anchor = None;
            }
            Command::Pause | Command::Resume => {}
        }
        self.state = target;
        Ok(previous)
    }

    /// Restores a previous state after a transition could not be persisted.
    pub fn revert(&mut self, previous: RecordingState, now: Instant) {
        self.settle(now);
        if previous != RecordingState::Finished {
            self.ended_at = None;
        }
        if previous == RecordingState::Ready {
            self.started_at = None;
            self.anchor = None;
        }
        self.state = previous;
    }
}
