//! Pull surface
//!
//! Plain request/response calls that return the same snapshots the push
//! connection carries. Used by the coordinator while the push side is down.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

use super::throttle::SnapshotKind;
use crate::protocol::{CaptureStatusResponse, StatsSnapshot, StatusSnapshot};

/// Source of on-demand snapshots
#[async_trait]
pub trait PullSource: Send + Sync {
    async fn fetch_stats(&self) -> Result<StatsSnapshot, PullError>;

    async fn fetch_status(&self) -> Result<StatusSnapshot, PullError>;
}

/// HTTP pull source against the engine's REST API
pub struct HttpPullSource {
    client: Client,
    status_url: String,
    stats_url: String,
}

impl HttpPullSource {
    pub fn new(
        base_url: &str,
        status_path: &str,
        stats_path: &str,
        timeout: Duration,
    ) -> Result<Self, PullError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base = base_url.trim_end_matches('/');

        Ok(Self {
            client,
            status_url: format!("{}{}", base, status_path),
            stats_url: format!("{}{}", base, stats_path),
        })
    }

    pub fn status_url(&self) -> &str {
        &self.status_url
    }

    pub fn stats_url(&self) -> &str {
        &self.stats_url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, PullError> {
        let response = self.client.get(url).send().await.map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PullError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await.map_err(map_send_error)?;
        serde_json::from_str(&body).map_err(|e| PullError::Decode(e.to_string()))
    }
}

fn map_send_error(e: reqwest::Error) -> PullError {
    if e.is_timeout() {
        PullError::Timeout
    } else if e.is_connect() {
        PullError::Unavailable
    } else {
        PullError::Request(e)
    }
}

#[async_trait]
impl PullSource for HttpPullSource {
    async fn fetch_stats(&self) -> Result<StatsSnapshot, PullError> {
        tracing::debug!(url = %self.stats_url, "Pulling stats");
        self.get_json(&self.stats_url).await
    }

    async fn fetch_status(&self) -> Result<StatusSnapshot, PullError> {
        tracing::debug!(url = %self.status_url, "Pulling status");
        let response: CaptureStatusResponse = self.get_json(&self.status_url).await?;
        Ok(response.into())
    }
}

/// Errors from a pull request
#[derive(Error, Debug)]
pub enum PullError {
    #[error("Capture engine unavailable")]
    Unavailable,

    #[error("Request timeout")]
    Timeout,

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl PullError {
    /// HTTP status, for `Api` errors
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            PullError::Api { status, .. } => StatusCode::from_u16(*status).ok(),
            _ => None,
        }
    }
}

/// A failed pull, as reported on the coordinator's error signal
#[derive(Debug)]
pub struct PullFailure {
    pub kind: SnapshotKind,
    pub error: PullError,
}
