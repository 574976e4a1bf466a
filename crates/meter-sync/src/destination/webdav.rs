//! Backup to a WebDAV server (Yandex.Disk by default).
//!
//! Collections are created with `MKCOL` under a `meter4/` root; objects and
//! the cursor are uploaded with `PUT`. Requests carry an
//! `Authorization: OAuth <token>` header.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use time::OffsetDateTime;
use tracing::debug;

use meter_types::TimeRange;

use super::{
    CURSOR_NAME, ControllerRef, Destination, SensorRef, decode_cursor, encode_cursor,
    window_file_name,
};
use crate::error::DestinationError;

/// WebDAV endpoint of Yandex.Disk.
pub const YANDEX_WEBDAV_URL: &str = "https://webdav.yandex.ru";

const ROOT_COLLECTION: &str = "meter4";

/// A WebDAV destination.
#[derive(Clone)]
pub struct WebDav {
    client: Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for WebDav {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebDav")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl WebDav {
    pub fn new(url: &str, token: &str, timeout: Duration) -> Result<Self, DestinationError> {
        let base_url = url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(DestinationError::Invalid(format!(
                "URL must start with http:// or https://, got: {}",
                base_url
            )));
        }
        if token.is_empty() {
            return Err(DestinationError::Invalid(
                "WebDAV token cannot be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DestinationError::from_reqwest(&base_url, e))?;

        Ok(Self {
            client,
            base_url,
            token: token.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn root_url(&self) -> String {
        format!("{}/{}", self.base_url, ROOT_COLLECTION)
    }

    fn controller_url(&self, controller: &ControllerRef) -> String {
        format!("{}/{}", self.root_url(), controller.dir_name())
    }

    fn sensor_url(&self, sensor: &SensorRef) -> String {
        format!(
            "{}/{}",
            self.controller_url(&sensor.controller),
            sensor.dir_name()
        )
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, format!("OAuth {}", self.token))
    }

    async fn send(
        &self,
        operation: &str,
        url: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, DestinationError> {
        debug!("WebDAV {} {}", operation, url);
        builder
            .send()
            .await
            .map_err(|e| DestinationError::from_reqwest(url, e))
    }

    /// Create a collection; an existing one answers 405 and is fine.
    async fn mkcol(&self, url: &str) -> Result<(), DestinationError> {
        let method = Method::from_bytes(b"MKCOL")
            .map_err(|e| DestinationError::Invalid(e.to_string()))?;
        let response = self.send("MKCOL", url, self.request(method, url)).await?;
        match response.status() {
            StatusCode::CREATED | StatusCode::METHOD_NOT_ALLOWED => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(rejected("MKCOL", status, response).await),
        }
    }

    async fn put(&self, url: &str, body: Vec<u8>) -> Result<(), DestinationError> {
        let response = self
            .send("PUT", url, self.request(Method::PUT, url).body(body))
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(rejected("PUT", status, response).await)
        }
    }
}

async fn rejected(
    operation: &str,
    status: StatusCode,
    response: reqwest::Response,
) -> DestinationError {
    let body = response.text().await.unwrap_or_default();
    let message = match body.trim() {
        "" => status.to_string(),
        text => text.chars().take(200).collect(),
    };
    DestinationError::Rejected {
        operation: operation.to_string(),
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl Destination for WebDav {
    fn describe(&self) -> String {
        format!("webdav ({})", self.base_url)
    }

    async fn ensure_controller(&self, controller: &ControllerRef) -> Result<(), DestinationError> {
        self.mkcol(&self.root_url()).await?;
        self.mkcol(&self.controller_url(controller)).await
    }

    async fn ensure_sensor(&self, sensor: &SensorRef) -> Result<(), DestinationError> {
        self.mkcol(&self.sensor_url(sensor)).await
    }

    async fn synced_until(
        &self,
        sensor: &SensorRef,
    ) -> Result<Option<OffsetDateTime>, DestinationError> {
        let url = format!("{}/{}", self.sensor_url(sensor), CURSOR_NAME);
        let response = self
            .send("GET", &url, self.request(Method::GET, &url))
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let text = response
                    .text()
                    .await
                    .map_err(|e| DestinationError::from_reqwest(&url, e))?;
                decode_cursor(&url, &text).map(Some)
            }
            status => Err(rejected("GET", status, response).await),
        }
    }

    async fn store_window(
        &self,
        sensor: &SensorRef,
        window: &TimeRange,
        extension: &str,
        data: Vec<u8>,
    ) -> Result<(), DestinationError> {
        let url = format!(
            "{}/{}",
            self.sensor_url(sensor),
            window_file_name(window, extension)
        );
        self.put(&url, data).await
    }

    async fn mark_synced(
        &self,
        sensor: &SensorRef,
        until: OffsetDateTime,
    ) -> Result<(), DestinationError> {
        let url = format!("{}/{}", self.sensor_url(sensor), CURSOR_NAME);
        self.put(&url, encode_cursor(until).into_bytes()).await
    }
}
