use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_data_type, parse_metric, to_u32, to_u64},
    models::{ChunkData, Metric, Recording, RecordingState, StreamChunk},
    repositories::recordings::{load_recording, load_state},
};
use crate::error::{RecorderError, Result};

/// Position of the newest committed chunk of one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamTail {
    pub next_index: u32,
    pub last_timestamp: Option<i64>,
}

/// A recording that still needs uploading, with its unsynced chunks ordered
/// oldest `chunk_index` first.
#[derive(Debug, Clone)]
pub struct UnsyncedRecording {
    pub recording: Recording,
    pub chunks: Vec<StreamChunk>,
}

const CHUNK_COLUMNS: &str = "id, recording_id, metric, data_type, chunk_index, sample_count,
     start_time, end_time, data_json, timestamps_json, synced";

fn row_to_chunk(row: &Row) -> Result<StreamChunk> {
    let metric: String = row.get("metric")?;
    let data_type: String = row.get("data_type")?;
    let chunk_index: i64 = row.get("chunk_index")?;
    let sample_count: i64 = row.get("sample_count")?;
    let data_json: String = row.get("data_json")?;
    let timestamps_json: String = row.get("timestamps_json")?;

    let data_type = parse_data_type(&data_type)?;
    let timestamps: Vec<i64> = serde_json::from_str(&timestamps_json)
        .map_err(|err| anyhow::anyhow!("failed to parse timestamps_json: {err}"))?;

    Ok(StreamChunk {
        id: row.get("id")?,
        recording_id: row.get("recording_id")?,
        metric: parse_metric(&metric)?,
        data_type,
        chunk_index: to_u32(chunk_index, "chunk_index")?,
        sample_count: to_u32(sample_count, "sample_count")?,
        start_time: row.get("start_time")?,
        end_time: row.get("end_time")?,
        data: ChunkData::from_json(data_type, &data_json)?,
        timestamps,
        synced: row.get("synced")?,
    })
}

fn stream_tail(conn: &Connection, recording_id: &str, metric: Metric) -> Result<StreamTail> {
    let tail: Option<(i64, i64)> = conn
        .query_row(
            "SELECT chunk_index, end_time FROM stream_chunks
             WHERE recording_id = ?1 AND metric = ?2
             ORDER BY chunk_index DESC
             LIMIT 1",
            params![recording_id, metric.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match tail {
        Some((index, end_time)) => Ok(StreamTail {
            next_index: to_u32(index + 1, "chunk_index")?,
            last_timestamp: Some(end_time),
        }),
        None => Ok(StreamTail::default()),
    }
}

pub(crate) fn unsynced_chunk_count(conn: &Connection, recording_id: &str) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM stream_chunks WHERE recording_id = ?1 AND synced = 0",
        params![recording_id],
        |row| row.get(0),
    )?;
    Ok(to_u64(count, "unsynced count")?)
}

/// Validates a chunk against the stream it extends and inserts it. Runs
/// inside the caller's transaction.
pub(crate) fn insert_chunk(conn: &Connection, chunk: &StreamChunk) -> Result<()> {
    chunk.validate()?;

    let tail = stream_tail(conn, &chunk.recording_id, chunk.metric)?;
    if chunk.chunk_index < tail.next_index {
        return Err(RecorderError::DuplicateChunk {
            recording_id: chunk.recording_id.clone(),
            metric: chunk.metric,
            chunk_index: chunk.chunk_index,
        });
    }
    if chunk.chunk_index > tail.next_index {
        return Err(RecorderError::InvalidChunk(format!(
            "{} chunk {} would leave a gap after index {}",
            chunk.metric,
            chunk.chunk_index,
            tail.next_index
        )));
    }
    if let Some(last) = tail.last_timestamp {
        if chunk.start_time < last {
            return Err(RecorderError::InvalidChunk(format!(
                "{} chunk {} starts at {} before previous chunk ended at {}",
                chunk.metric, chunk.chunk_index, chunk.start_time, last
            )));
        }
    }

    let timestamps_json = serde_json::to_string(&chunk.timestamps)
        .map_err(|err| anyhow::anyhow!("failed to encode timestamps: {err}"))?;

    conn.execute(
        "INSERT INTO stream_chunks (
            id,
            recording_id,
            metric,
            data_type,
            chunk_index,
            sample_count,
            start_time,
            end_time,
            data_json,
            timestamps_json,
            synced,
            created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11)",
        params![
            chunk.id,
            chunk.recording_id,
            chunk.metric.as_str(),
            chunk.data_type.as_str(),
            chunk.chunk_index,
            chunk.sample_count,
            chunk.start_time,
            chunk.end_time,
            chunk.data.to_json()?,
            timestamps_json,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

impl Database {
    /// Durably appends one chunk. Fails with a state conflict unless the
    /// recording is currently `recording`.
    pub async fn commit_chunk(
        &self,
        recording_id: &str,
        metric: Metric,
        chunk: &StreamChunk,
    ) -> Result<()> {
        if chunk.recording_id != recording_id || chunk.metric != metric {
            return Err(RecorderError::InvalidChunk(format!(
                "chunk {} is {}/{} but was committed as {}/{}",
                chunk.id, chunk.recording_id, chunk.metric, recording_id, metric
            )));
        }

        let record = chunk.clone();
        self.write(move |tx| {
            let state = load_state(tx, &record.recording_id)?;
            if state != RecordingState::Recording {
                return Err(RecorderError::StateConflict {
                    recording_id: record.recording_id,
                    state,
                });
            }
            insert_chunk(tx, &record)?;
            Ok(())
        })
        .await
    }

    pub async fn stream_tail(&self, recording_id: &str, metric: Metric) -> Result<StreamTail> {
        let recording_id = recording_id.to_string();
        self.execute(move |conn| stream_tail(conn, &recording_id, metric))
            .await
    }

    /// Committed chunks of a recording, optionally limited to one metric,
    /// ordered by metric then `chunk_index`.
    pub async fn list_chunks(
        &self,
        recording_id: &str,
        metric: Option<Metric>,
    ) -> Result<Vec<StreamChunk>> {
        let recording_id = recording_id.to_string();
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {CHUNK_COLUMNS} FROM stream_chunks
                 WHERE recording_id = ?1 AND (?2 IS NULL OR metric = ?2)
                 ORDER BY metric ASC, chunk_index ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![recording_id, metric.map(|m| m.as_str())])?;
            let mut chunks = Vec::new();
            while let Some(row) = rows.next()? {
                chunks.push(row_to_chunk(row)?);
            }
            Ok(chunks)
        })
        .await
    }

    /// Everything the sync reconciler still has to upload. Recordings that
    /// never started are left out.
    pub async fn list_unsynced(&self) -> Result<Vec<UnsyncedRecording>> {
        self.execute(|conn| {
            let tx = conn.transaction()?;
            let ids: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM recordings
                     WHERE synced = 0 AND state != 'ready'
                     ORDER BY created_at ASC",
                )?;
                let mut rows = stmt.query([])?;
                let mut ids = Vec::new();
                while let Some(row) = rows.next()? {
                    ids.push(row.get(0)?);
                }
                ids
            };

            let sql = format!(
                "SELECT {CHUNK_COLUMNS} FROM stream_chunks
                 WHERE recording_id = ?1 AND synced = 0
                 ORDER BY chunk_index ASC, metric ASC"
            );
            let mut pending = Vec::with_capacity(ids.len());
            for id in ids {
                let recording = load_recording(&tx, &id)?;
                let mut stmt = tx.prepare(&sql)?;
                let mut rows = stmt.query(params![id])?;
                let mut chunks = Vec::new();
                while let Some(row) = rows.next()? {
                    chunks.push(row_to_chunk(row)?);
                }
                pending.push(UnsyncedRecording { recording, chunks });
            }
            Ok(pending)
        })
        .await
    }

    pub async fn count_unsynced_chunks(&self, recording_id: &str) -> Result<u64> {
        let recording_id = recording_id.to_string();
        self.execute(move |conn| unsynced_chunk_count(conn, &recording_id))
            .await
    }

    /// Idempotent: ids that are already synced, or unknown, are left alone.
    pub async fn mark_chunks_synced(&self, chunk_ids: &[String]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let chunk_ids = chunk_ids.to_vec();
        self.write(move |tx| {
            let mut stmt =
                tx.prepare("UPDATE stream_chunks SET synced = 1 WHERE id = ?1 AND synced = 0")?;
            for id in &chunk_ids {
                stmt.execute(params![id])?;
            }
            Ok(())
        })
        .await
    }
}
