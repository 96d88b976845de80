use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf, sync::RwLock, time::Duration};

/// Tunables of the recording engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineSettings {
    /// Samples per committed chunk.
    pub chunk_capacity: usize,
    /// Time represented by one sample in zone-time aggregation.
    pub sample_interval_ms: u64,
    /// Commit partial chunks when pausing instead of holding them in memory.
    pub flush_on_pause: bool,
    pub commit_retry_attempts: u32,
    pub commit_retry_backoff_ms: u64,
    pub sync_interval_secs: u64,
    pub sync_endpoint: Option<String>,
    pub sync_token: Option<String>,
    pub database_path: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            chunk_capacity: 100,
            sample_interval_ms: 1_000,
            flush_on_pause: false,
            commit_retry_attempts: 3,
            commit_retry_backoff_ms: 50,
            sync_interval_secs: 60,
            sync_endpoint: None,
            sync_token: None,
            database_path: None,
        }
    }
}

impl EngineSettings {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    pub fn commit_backoff(&self) -> Duration {
        Duration::from_millis(self.commit_retry_backoff_ms)
    }

    /// Applies `RECORDER_*` environment overrides on top of the file values.
    pub fn apply_env(&mut self) {
        if let Some(value) = env_parse::<usize>("RECORDER_CHUNK_CAPACITY") {
            self.chunk_capacity = value;
        }
        if let Some(value) = env_parse::<u64>("RECORDER_SAMPLE_INTERVAL_MS") {
            self.sample_interval_ms = value;
        }
        if let Some(value) = env_parse::<bool>("RECORDER_FLUSH_ON_PAUSE") {
            self.flush_on_pause = value;
        }
        if let Some(value) = env_parse::<u64>("RECORDER_SYNC_INTERVAL_SECS") {
            self.sync_interval_secs = value;
        }
        if let Ok(value) = env::var("RECORDER_SYNC_ENDPOINT") {
            self.sync_endpoint = Some(value.trim().to_string()).filter(|v| !v.is_empty());
        }
        if let Ok(value) = env::var("RECORDER_SYNC_TOKEN") {
            self.sync_token = Some(value.trim().to_string()).filter(|v| !v.is_empty());
        }
        if let Ok(value) = env::var("RECORDER_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(value));
        }
        self.chunk_capacity = self.chunk_capacity.max(1);
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparsable {key}={raw}");
            None
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<EngineSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Invalid settings file {}: {err}; using defaults", path.display());
                EngineSettings::default()
            })
        } else {
            EngineSettings::default()
        };
        data.apply_env();

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn engine(&self) -> EngineSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update_engine(&self, settings: EngineSettings) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &EngineSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        let engine = store.engine();
        assert!(engine.chunk_capacity >= 1);
        assert_eq!(engine.sample_interval(), Duration::from_secs(1));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "flushOnPause": true, "syncIntervalSecs": 15 }"#).unwrap();

        let store = SettingsStore::new(path).unwrap();
        let engine = store.engine();
        assert!(engine.flush_on_pause);
        assert_eq!(engine.sync_interval(), Duration::from_secs(15));
        assert_eq!(engine.commit_retry_attempts, 3);
    }

    #[test]
    fn updates_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        let mut engine = store.engine();
        engine.commit_retry_attempts = 7;
        store.update_engine(engine).unwrap();

        let contents = fs::read_to_string(path).unwrap();
        let reloaded: EngineSettings = serde_json::from_str(&contents).unwrap();
        assert_eq!(reloaded.commit_retry_attempts, 7);
    }
}
