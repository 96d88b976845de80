//! Remote side of the sync contract.
//!
//! Uploads are idempotent `PUT`s keyed by recording id and chunk index, so
//! resending after a lost acknowledgment is always safe.

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::db::{Recording, StreamChunk};
use crate::error::{RecorderError, Result};

#[async_trait]
pub trait RemoteSync: Send + Sync {
    /// Creates or replaces the recording's metadata.
    async fn upload_recording(&self, recording: &Recording) -> Result<()>;

    /// Uploads one whole chunk. `Ok` means the remote durably accepted it.
    async fn upload_chunk(&self, chunk: &StreamChunk) -> Result<()>;
}

/// HTTP(S) implementation of [`RemoteSync`].
#[derive(Clone)]
pub struct HttpRemote {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
            token,
        }
    }

    pub fn recording_url(&self, recording_id: &str) -> String {
        format!("{}/recordings/{}", self.base_url, recording_id)
    }

    pub fn chunk_url(&self, chunk: &StreamChunk) -> String {
        format!(
            "{}/recordings/{}/streams/{}/chunks/{}",
            self.base_url, chunk.recording_id, chunk.metric, chunk.chunk_index
        )
    }

    async fn put_json<T: serde::Serialize + ?Sized + Sync>(&self, url: &str, body: &T) -> Result<()> {
        let mut request = self.http.put(url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| RecorderError::Remote {
            message: format!("request to {url} failed: {e}"),
            retryable: true,
        })?;

        check_status(response.status(), url)
    }
}

fn check_status(status: StatusCode, url: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    let retryable = status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS;
    Err(RecorderError::Remote {
        message: format!("{url} returned {status}"),
        retryable,
    })
}

#[async_trait]
impl RemoteSync for HttpRemote {
    async fn upload_recording(&self, recording: &Recording) -> Result<()> {
        let url = self.recording_url(&recording.id);
        self.put_json(&url, recording).await
    }

    async fn upload_chunk(&self, chunk: &StreamChunk) -> Result<()> {
        let url = self.chunk_url(chunk);
        self.put_json(&url, chunk).await
    }
}
