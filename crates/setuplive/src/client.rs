//! HTTP clients for the synchronization service.
//!
//! [`HttpProgressSource`] is the read half used by polling consumers;
//! [`ReportClient`] is the write half used by an installer run (or the
//! CLI simulator) to push state updates, append error-log entries, and
//! send the best-effort completion notification.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::poll::{Fetched, ProgressSource, SourceError};
use crate::record::{CompletionNotice, ErrorLogEntry, ProgressRecord, SessionId};

/// Failure reported by the write-half client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    /// The service rejected the payload; not retryable as-is.
    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("malformed response body: {0}")]
    Body(String),
}

/// Acknowledgement for a current-state write.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub success: bool,
    pub session_id: SessionId,
}

/// Acknowledgement for an error-log append.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogAck {
    pub success: bool,
    pub session_id: SessionId,
    pub total_errors: usize,
}

/// Acknowledgement for a completion notification.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyAck {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LogBody {
    errors: Vec<ErrorLogEntry>,
}

fn normalize_base(mut base: Url) -> Url {
    // Url::join drops the last path segment unless it ends with a slash.
    if !base.path().ends_with('/') {
        base.set_path(&format!("{}/", base.path()));
    }
    base
}

fn join(base: &Url, path: &str) -> Result<Url, SourceError> {
    base.join(path)
        .map_err(|e| SourceError::Transport(e.to_string()))
}

/// Read half: fetches a session's current state, mapping 404 to
/// [`Fetched::NotFound`] and everything else unexpected to a transient
/// [`SourceError`].
pub struct HttpProgressSource {
    client: reqwest::Client,
    base: Url,
}

impl HttpProgressSource {
    pub fn new(base: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: normalize_base(base),
        }
    }
}

#[async_trait]
impl ProgressSource for HttpProgressSource {
    async fn fetch(&self, id: &SessionId) -> Result<Fetched, SourceError> {
        let url = join(&self.base, &format!("progress/{id}"))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Fetched::NotFound);
        }
        if !response.status().is_success() {
            return Err(SourceError::Status(response.status().as_u16()));
        }

        let record: ProgressRecord = response
            .json()
            .await
            .map_err(|e| SourceError::Body(e.to_string()))?;
        Ok(Fetched::Record(record))
    }
}

/// Write half: the producer-side protocol of an installer run.
pub struct ReportClient {
    client: reqwest::Client,
    base: Url,
}

impl ReportClient {
    pub fn new(base: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: normalize_base(base),
        }
    }

    /// Overwrites the session's current-state record.
    pub async fn post_record(&self, record: &ProgressRecord) -> Result<Ack, ClientError> {
        let url = self.endpoint(&format!("progress/{}", record.session_id))?;
        self.post_json(url, record).await
    }

    /// Appends one entry to the session's error log.
    pub async fn append_log(
        &self,
        id: &SessionId,
        entry: &ErrorLogEntry,
    ) -> Result<LogAck, ClientError> {
        let url = self.endpoint(&format!("progress/{id}/log"))?;
        self.post_json(url, entry).await
    }

    /// Reads the session's full error log; an unused session yields an
    /// empty list, not an error.
    pub async fn read_log(&self, id: &SessionId) -> Result<Vec<ErrorLogEntry>, ClientError> {
        let url = self.endpoint(&format!("progress/{id}/log"))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let body: LogBody = Self::decode(response).await?;
        Ok(body.errors)
    }

    /// Sends the end-of-run summary. Callers treating this as
    /// fire-and-forget may discard the result.
    pub async fn notify_complete(
        &self,
        notice: &CompletionNotice,
    ) -> Result<NotifyAck, ClientError> {
        let url = self.endpoint("notify-complete")?;
        self.post_json(url, notice).await
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base
            .join(path)
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    async fn post_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, ClientError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::Body(e.to_string()))
    }
}
