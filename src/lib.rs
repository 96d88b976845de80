//! Activity recording engine.
//!
//! Captures live sensor samples during a workout, persists them in durable
//! per-metric chunks, classifies them into intensity zones and reconciles
//! them with a remote service once connectivity allows.
//!
//! Data flows sensors → [`RecordingController`] → [`StreamBuffer`]s →
//! [`SessionStore`] → [`SyncReconciler`] → remote.

pub mod db;
pub mod error;
pub mod events;
pub mod recording;
pub mod settings;
pub mod store;
pub mod sync;
pub mod zones;

use std::sync::Arc;

pub use db::Database;
pub use error::{RecorderError, Result};
pub use events::{EngineEvent, EventSink, LogEventSink};
pub use recording::{recover_interrupted, AppendOutcome, RecordingController, StreamBuffer};
pub use settings::{EngineSettings, SettingsStore};
pub use store::SessionStore;
pub use sync::{HttpRemote, RemoteSync, SyncController, SyncReconciler, SyncReport};

/// Collaborators shared by the components of one engine instance.
///
/// Passed explicitly to whatever needs it; there is no process-wide state.
#[derive(Clone)]
pub struct RecorderContext {
    pub store: Arc<dyn SessionStore>,
    pub events: Arc<dyn EventSink>,
    pub settings: EngineSettings,
}

impl RecorderContext {
    pub fn new(
        store: Arc<dyn SessionStore>,
        events: Arc<dyn EventSink>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            events,
            settings,
        }
    }

    /// Context over `store` that reports events through the `log` facade.
    pub fn with_logging(store: Arc<dyn SessionStore>, settings: EngineSettings) -> Self {
        Self::new(store, Arc::new(LogEventSink), settings)
    }
}
