use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;

use crate::error::{SyncError, SyncResult};
use crate::sync::mount::MountConfig;

use super::retry::RetryPolicy;
use super::types::{ListRequest, ListResponse, RemoteNode};

const LIST_PATH: &str = "/api/fs/list";

/// Lists the immediate children of one remote directory.
///
/// The reconciler recurses on its own; implementations issue exactly one
/// logical listing per call.
pub trait RemoteLister {
    fn list(&self, path: &str) -> impl Future<Output = SyncResult<Vec<RemoteNode>>> + Send;
}

/// Alist HTTP client bound to a single mount's endpoint and token.
pub struct AlistClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    retry: RetryPolicy,
}

impl AlistClient {
    pub fn new(mount: &MountConfig, timeout: Duration, retry: RetryPolicy) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: mount.base_url(),
            token: mount.token.clone(),
            retry,
        })
    }

    /// One POST /api/fs/list round trip, no retries.
    async fn list_once(&self, path: &str) -> SyncResult<Vec<RemoteNode>> {
        let url = format!("{}{LIST_PATH}", self.base_url);

        let resp = self
            .http
            .post(&url)
            .header(AUTHORIZATION, &self.token)
            .json(&ListRequest::all(path))
            .send()
            .await
            .map_err(|e| request_error(path, &e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Protocol {
                path: path.to_string(),
                message: format!("HTTP {status}: {}", body.trim()),
                retryable: status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error(),
            });
        }

        let body = resp.bytes().await.map_err(|e| request_error(path, &e))?;
        let parsed: ListResponse = serde_json::from_slice(&body)
            .map_err(|e| SyncError::protocol(path, format!("invalid listing response: {e}")))?;

        parsed.into_nodes(path)
    }
}

impl RemoteLister for AlistClient {
    fn list(&self, path: &str) -> impl Future<Output = SyncResult<Vec<RemoteNode>>> + Send {
        async move {
            tracing::debug!(path, "listing remote directory");
            self.retry.run(path, || self.list_once(path)).await
        }
    }
}

/// Map a reqwest failure onto the error taxonomy, keeping the cause chain.
fn request_error(path: &str, e: &reqwest::Error) -> SyncError {
    if e.is_builder() {
        return SyncError::Config(format!("cannot build request for {path}: {e}"));
    }

    let mut message = if e.is_timeout() {
        "request timed out".to_string()
    } else {
        e.to_string()
    };
    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    SyncError::Transport {
        path: path.to_string(),
        message,
    }
}
