//! HTTP client for the remote relations endpoint.
//!
//! One call returns the user's full topology wrapped in a `msg` envelope.
//! Any element that fails to decode fails the whole fetch; there is no
//! partial snapshot and no retry at this layer.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use meter_sync::SnapshotFetcher;
//!
//! # async fn example() -> Result<(), meter_sync::FetchError> {
//! let fetcher = SnapshotFetcher::new("https://api.meter4.me", Duration::from_secs(30))?;
//! let snapshot = fetcher.fetch("secret-token").await?;
//! println!("{} sensors", snapshot.sensors.len());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use meter_types::TopologySnapshot;
use reqwest::Client;
use tracing::debug;

use crate::error::FetchError;

/// Path of the relations endpoint below the target.
pub const RELATIONS_PATH: &str = "/v2/user/relations";

/// Fetches topology snapshots from the remote service.
#[derive(Debug, Clone)]
pub struct SnapshotFetcher {
    client: Client,
    base_url: String,
}

impl SnapshotFetcher {
    /// Create a fetcher for `target` with a per-request timeout.
    pub fn new(target: &str, timeout: Duration) -> Result<Self, FetchError> {
        let base_url = normalize_target(target)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport {
                url: base_url.clone(),
                source: e,
            })?;

        Ok(Self { client, base_url })
    }

    /// Create a fetcher with a custom reqwest client.
    pub fn with_client(target: &str, client: Client) -> Result<Self, FetchError> {
        Ok(Self {
            client,
            base_url: normalize_target(target)?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch and decode the snapshot for `token`.
    pub async fn fetch(&self, token: &str) -> Result<TopologySnapshot, FetchError> {
        let url = format!("{}{}", self.base_url, RELATIONS_PATH);
        debug!("Fetching topology from {}", url);

        let response = self
            .client
            .get(&url)
            .query(&[("token", token)])
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| {
                    v.get("error")
                        .or_else(|| v.get("msg"))
                        .and_then(|e| e.as_str())
                        .map(String::from)
                })
                .unwrap_or_else(|| status.to_string());

            return Err(FetchError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(&url, e))?;
        let envelope: serde_json::Value = serde_json::from_slice(&body)?;
        let snapshot = TopologySnapshot::from_envelope(&envelope)?;

        debug!(
            "Fetched {} objects, {} controllers, {} sensors",
            snapshot.objects.len(),
            snapshot.controllers.len(),
            snapshot.sensors.len()
        );
        Ok(snapshot)
    }
}

fn normalize_target(target: &str) -> Result<String, FetchError> {
    let base_url = target.trim_end_matches('/').to_string();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(FetchError::InvalidUrl(format!(
            "URL must start with http:// or https://, got: {}",
            base_url
        )));
    }
    Ok(base_url)
}

fn transport_error(url: &str, source: reqwest::Error) -> FetchError {
    if source.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            source,
        }
    }
}
