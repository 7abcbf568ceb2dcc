//! HTTP client for the account service.
//!
//! The account service wraps the camera vendor's cloud API and exposes:
//!
//! | Endpoint                              | Response                               |
//! |---------------------------------------|----------------------------------------|
//! | `GET /health`                         | 200 when ready, 503 while starting     |
//! | `GET /Camera/CameraList`              | `["GW_BE1_...", ...]`                  |
//! | `GET /Camera/DeviceInfo?deviceId=ID`  | `{"cameraId", "streamName", "lanIp"}`  |
//! | `GET /Camera/CameraToken?deviceId=ID` | `{"accessId", "accessToken"}`          |
//!
//! Tokens are single-use upstream, so callers fetch one per attempt.

use std::time::Duration;

use async_trait::async_trait;
use gwell_core::{AccessCredential, Device, DeviceId};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::application::errors::AccountApiError;
use crate::application::supervise_devices::AccountApi;

const HEALTH_PATH: &str = "/health";
const CAMERA_LIST_PATH: &str = "/Camera/CameraList";
const DEVICE_INFO_PATH: &str = "/Camera/DeviceInfo";
const CAMERA_TOKEN_PATH: &str = "/Camera/CameraToken";

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Interval between health checks while waiting for the service.
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// [`AccountApi`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpAccountApi {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
}

impl HttpAccountApi {
    /// Creates a client for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`AccountApiError::InvalidBaseUrl`] if `base_url` is not an
    /// absolute http(s) URL or the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, AccountApiError> {
        validate_base_url(base_url)?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AccountApiError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval: HEALTH_POLL_INTERVAL,
        })
    }

    /// Overrides how often [`wait_until_ready`](Self::wait_until_ready) polls.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Returns `true` when the service reports ready, `false` while it is
    /// still starting (HTTP 503).
    ///
    /// # Errors
    ///
    /// Returns an error for transport failures and any other status.
    pub async fn health(&self) -> Result<bool, AccountApiError> {
        let response = self.send(HEALTH_PATH, None).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::SERVICE_UNAVAILABLE => Ok(false),
            _ => Err(status_error(HEALTH_PATH, response).await),
        }
    }

    /// Polls `/health` until it reports ready or `limit` elapses.
    ///
    /// Transport errors while polling are treated as "not ready yet".
    ///
    /// # Errors
    ///
    /// Returns [`AccountApiError::NotReady`] if the service never became ready.
    pub async fn wait_until_ready(&self, limit: Duration) -> Result<(), AccountApiError> {
        let deadline = Instant::now() + limit;
        loop {
            match self.health().await {
                Ok(true) => {
                    info!(url = %self.base_url, "account service is ready");
                    return Ok(());
                }
                Ok(false) => debug!("account service still starting"),
                Err(e) => debug!(error = %e, "account service health check failed"),
            }
            if Instant::now() + self.poll_interval > deadline {
                return Err(AccountApiError::NotReady(limit));
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn send(
        &self,
        path: &str,
        device_id: Option<&DeviceId>,
    ) -> Result<reqwest::Response, AccountApiError> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.client.get(&url);
        if let Some(id) = device_id {
            request = request.query(&[("deviceId", id.as_str())]);
        }
        request.send().await.map_err(|e| AccountApiError::Transport {
            endpoint: path.to_string(),
            reason: e.to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        device_id: Option<&DeviceId>,
    ) -> Result<T, AccountApiError> {
        let response = self.send(path, device_id).await?;

        if response.status() == StatusCode::NOT_FOUND {
            if let Some(id) = device_id {
                return Err(AccountApiError::UnknownDevice(id.clone()));
            }
        }
        if !response.status().is_success() {
            return Err(status_error(path, response).await);
        }

        response.json().await.map_err(|e| AccountApiError::Decode {
            endpoint: path.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl AccountApi for HttpAccountApi {
    async fn list_devices(&self) -> Result<Vec<DeviceId>, AccountApiError> {
        self.get(CAMERA_LIST_PATH, None).await
    }

    async fn device_info(&self, device_id: &DeviceId) -> Result<Device, AccountApiError> {
        self.get(DEVICE_INFO_PATH, Some(device_id)).await
    }

    async fn access_credential(
        &self,
        device_id: &DeviceId,
    ) -> Result<AccessCredential, AccountApiError> {
        self.get(CAMERA_TOKEN_PATH, Some(device_id)).await
    }
}

/// Checks that `url` is an absolute http(s) URL with a host.
///
/// # Errors
///
/// Returns [`AccountApiError::InvalidBaseUrl`] describing the problem.
pub fn validate_base_url(url: &str) -> Result<(), AccountApiError> {
    let invalid = |reason: &str| AccountApiError::InvalidBaseUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if parsed.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(())
}

async fn status_error(path: &str, response: reqwest::Response) -> AccountApiError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    AccountApiError::Status {
        endpoint: path.to_string(),
        status,
        body,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
