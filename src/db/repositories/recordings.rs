use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_activity_type, parse_datetime, parse_optional_datetime, parse_state, to_i64, to_u64},
    models::{PlannedActivity, ProfileSnapshot, Recording, RecordingState, StreamChunk},
    repositories::chunks::{insert_chunk, unsynced_chunk_count},
};
use crate::error::{RecorderError, Result};

const RECORDING_COLUMNS: &str = "id, activity_type, state, started_at, ended_at, active_ms, paused_ms, synced,
     weight_kg, ftp, threshold_hr, planned_activity_json, created_at";

fn row_to_recording(row: &Row) -> Result<Recording> {
    let activity_type: String = row.get("activity_type")?;
    let state: String = row.get("state")?;
    let started_at: Option<String> = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    let active_ms: i64 = row.get("active_ms")?;
    let paused_ms: i64 = row.get("paused_ms")?;
    let planned_json: Option<String> = row.get("planned_activity_json")?;
    let created_at: String = row.get("created_at")?;

    let planned_activity = planned_json
        .map(|raw| serde_json::from_str::<PlannedActivity>(&raw))
        .transpose()
        .map_err(|err| anyhow::anyhow!("failed to parse planned_activity_json: {err}"))?;

    let recording = Recording {
        id: row.get("id")?,
        activity_type: parse_activity_type(&activity_type)?,
        state: parse_state(&state)?,
        started_at: parse_optional_datetime(started_at, "started_at")?,
        ended_at: parse_optional_datetime(ended_at, "ended_at")?,
        active_ms: to_u64(active_ms, "active_ms")?,
        paused_ms: to_u64(paused_ms, "paused_ms")?,
        synced: row.get("synced")?,
        profile: ProfileSnapshot {
            weight_kg: row.get("weight_kg")?,
            ftp: row.get("ftp")?,
            threshold_hr: row.get("threshold_hr")?,
        },
        planned_activity,
        created_at: parse_datetime(&created_at, "created_at")?,
    };

    if recording.ended_at.is_some() != (recording.state == RecordingState::Finished) {
        return Err(anyhow::anyhow!(
            "recording {} is {} but ended_at is {:?}",
            recording.id,
            recording.state,
            recording.ended_at
        )
        .into());
    }

    Ok(recording)
}

pub(crate) fn load_recording(conn: &Connection, recording_id: &str) -> Result<Recording> {
    let sql = format!("SELECT {RECORDING_COLUMNS} FROM recordings WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![recording_id])?;
    match rows.next()? {
        Some(row) => row_to_recording(row),
        None => Err(RecorderError::RecordingNotFound(recording_id.to_string())),
    }
}

pub(crate) fn load_state(conn: &Connection, recording_id: &str) -> Result<RecordingState> {
    let state: Option<String> = conn
        .query_row(
            "SELECT state FROM recordings WHERE id = ?1",
            params![recording_id],
            |row| row.get(0),
        )
        .optional()?;

    match state {
        Some(state) => Ok(parse_state(&state)?),
        None => Err(RecorderError::RecordingNotFound(recording_id.to_string())),
    }
}

impl Database {
    pub async fn insert_recording(&self, recording: &Recording) -> Result<()> {
        let record = recording.clone();
        self.execute(move |conn| {
            let planned_json = record
                .planned_activity
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|err| anyhow::anyhow!("failed to encode planned activity: {err}"))?;

            conn.execute(
                "INSERT INTO recordings (id, activity_type, state, started_at, ended_at, active_ms, paused_ms, synced,
                                         weight_kg, ftp, threshold_hr, planned_activity_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    record.id,
                    record.activity_type.as_str(),
                    record.state.as_str(),
                    record.started_at.as_ref().map(|dt| dt.to_rfc3339()),
                    record.ended_at.as_ref().map(|dt| dt.to_rfc3339()),
                    to_i64(record.active_ms)?,
                    to_i64(record.paused_ms)?,
                    record.synced,
                    record.profile.weight_kg,
                    record.profile.ftp,
                    record.profile.threshold_hr,
                    planned_json,
                    record.created_at.to_rfc3339(),
                    record.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_recording(&self, recording_id: &str) -> Result<Recording> {
        let recording_id = recording_id.to_string();
        self.execute(move |conn| load_recording(conn, &recording_id))
            .await
    }

    /// `ready -> recording`. Allowed exactly once per recording.
    pub async fn mark_started(&self, recording_id: &str, started_at: DateTime<Utc>) -> Result<()> {
        let recording_id = recording_id.to_string();
        self.write(move |tx| {
            let state = load_state(tx, &recording_id)?;
            if state != RecordingState::Ready {
                return Err(RecorderError::InvalidTransition {
                    action: "start",
                    state,
                });
            }

            tx.execute(
                "UPDATE recordings
                 SET state = ?1,
                     started_at = ?2,
                     updated_at = ?3
                 WHERE id = ?4",
                params![
                    RecordingState::Recording.as_str(),
                    started_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                    recording_id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Persists a pause or resume along with the duration accounting.
    pub async fn update_recording_state(
        &self,
        recording_id: &str,
        state: RecordingState,
        active_ms: u64,
        paused_ms: u64,
    ) -> Result<()> {
        let recording_id = recording_id.to_string();
        self.write(move |tx| {
            let current = load_state(tx, &recording_id)?;
            match (current, state) {
                (RecordingState::Finished, _) => {
                    return Err(RecorderError::AlreadyFinished(recording_id))
                }
                (RecordingState::Recording, RecordingState::Paused)
                | (RecordingState::Paused, RecordingState::Recording)
                | (RecordingState::Recording, RecordingState::Recording)
                | (RecordingState::Paused, RecordingState::Paused) => {}
                (current, _) => {
                    return Err(RecorderError::InvalidTransition {
                        action: if state == RecordingState::Paused { "pause" } else { "resume" },
                        state: current,
                    })
                }
            }

            tx.execute(
                "UPDATE recordings
                 SET state = ?1,
                     active_ms = ?2,
                     paused_ms = ?3,
                     updated_at = ?4
                 WHERE id = ?5",
                params![
                    state.as_str(),
                    to_i64(active_ms)?,
                    to_i64(paused_ms)?,
                    Utc::now().to_rfc3339(),
                    recording_id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Commits the final chunks and marks the recording finished in one
    /// transaction. Either everything lands or nothing does.
    pub async fn finish_recording(
        &self,
        recording_id: &str,
        final_chunks: Vec<StreamChunk>,
        ended_at: DateTime<Utc>,
        active_ms: u64,
        paused_ms: u64,
    ) -> Result<()> {
        let recording_id = recording_id.to_string();
        self.write(move |tx| {
            match load_state(tx, &recording_id)? {
                RecordingState::Finished => {
                    return Err(RecorderError::AlreadyFinished(recording_id))
                }
                RecordingState::Ready => {
                    return Err(RecorderError::InvalidTransition {
                        action: "finish",
                        state: RecordingState::Ready,
                    })
                }
                RecordingState::Recording | RecordingState::Paused => {}
            }

            for chunk in &final_chunks {
                if chunk.recording_id != recording_id {
                    return Err(RecorderError::InvalidChunk(format!(
                        "chunk {} belongs to recording {}",
                        chunk.id, chunk.recording_id
                    )));
                }
                insert_chunk(tx, chunk)?;
            }

            tx.execute(
                "UPDATE recordings
                 SET state = ?1,
                     ended_at = ?2,
                     active_ms = ?3,
                     paused_ms = ?4,
                     updated_at = ?5
                 WHERE id = ?6",
                params![
                    RecordingState::Finished.as_str(),
                    ended_at.to_rfc3339(),
                    to_i64(active_ms)?,
                    to_i64(paused_ms)?,
                    Utc::now().to_rfc3339(),
                    recording_id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Idempotent. Refuses while the recording is unfinished or has unsynced chunks.
    pub async fn mark_recording_synced(&self, recording_id: &str) -> Result<()> {
        let recording_id = recording_id.to_string();
        self.write(move |tx| {
            let state = load_state(tx, &recording_id)?;
            if state != RecordingState::Finished {
                return Err(RecorderError::StateConflict { recording_id, state });
            }
            let remaining = unsynced_chunk_count(tx, &recording_id)?;
            if remaining > 0 {
                return Err(RecorderError::PendingChunks {
                    recording_id,
                    remaining,
                });
            }

            tx.execute(
                "UPDATE recordings
                 SET synced = 1,
                     updated_at = ?1
                 WHERE id = ?2 AND synced = 0",
                params![Utc::now().to_rfc3339(), recording_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Recordings a crash left in `recording` or `paused`.
    pub async fn list_incomplete_recordings(&self) -> Result<Vec<Recording>> {
        self.execute(|conn| {
            let sql = format!(
                "SELECT {RECORDING_COLUMNS} FROM recordings
                 WHERE state IN ('recording', 'paused')
                 ORDER BY created_at ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let mut recordings = Vec::new();
            while let Some(row) = rows.next()? {
                recordings.push(row_to_recording(row)?);
            }
            Ok(recordings)
        })
        .await
    }

    /// Deletes a recording and all of its chunks atomically.
    pub async fn delete_recording(&self, recording_id: &str) -> Result<()> {
        let recording_id = recording_id.to_string();
        self.write(move |tx| {
            // Explicit so the delete does not depend on foreign_keys=ON.
            tx.execute(
                "DELETE FROM stream_chunks WHERE recording_id = ?1",
                params![recording_id],
            )?;

            let rows_affected =
                tx.execute("DELETE FROM recordings WHERE id = ?1", params![recording_id])?;
            if rows_affected == 0 {
                return Err(RecorderError::RecordingNotFound(recording_id));
            }
            Ok(())
        })
        .await
    }
}
