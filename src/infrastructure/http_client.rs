//! HTTP client for the valuation service
//!
//! Sends the image as a multipart form (field `image`) and maps every way a
//! request can go wrong onto [`AttemptError`].

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use url::Url;

use crate::domain::outcome::ValuationReport;
use crate::domain::upload::UploadFile;
use crate::domain::valuation_service::{AttemptError, ValuationClient};
use crate::infrastructure::config::ApiConfig;

/// Multipart field carrying the image.
pub const IMAGE_FIELD: &str = "image";

/// Longest slice of a non-JSON error body kept in the failure detail.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// HTTP client configuration
#[derive(Debug, Clone, serde::Serialize)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self::from_api_config(&ApiConfig::default())
    }
}

impl HttpClientConfig {
    #[must_use]
    pub fn from_api_config(api: &ApiConfig) -> Self {
        Self {
            user_agent: api.user_agent.clone(),
            timeout_seconds: api.request_timeout_seconds,
        }
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// reqwest-backed [`ValuationClient`].
#[derive(Debug, Clone)]
pub struct HttpValuationClient {
    client: Client,
    config: HttpClientConfig,
}

impl HttpValuationClient {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    #[must_use]
    pub const fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    fn form_for(file: &UploadFile) -> Result<Form, AttemptError> {
        let media_type = file.media_type().unwrap_or("application/octet-stream");
        let part = Part::bytes(file.bytes().to_vec())
            .file_name(file.file_name().to_string())
            .mime_str(media_type)
            .map_err(|e| AttemptError::Transport(format!("invalid media type {media_type}: {e}")))?;
        Ok(Form::new().part(IMAGE_FIELD, part))
    }

    fn map_send_error(&self, error: &reqwest::Error) -> AttemptError {
        if error.is_timeout() {
            AttemptError::Timeout(self.config.timeout())
        } else {
            AttemptError::Transport(error.to_string())
        }
    }
}

#[async_trait]
impl ValuationClient for HttpValuationClient {
    async fn submit_image(
        &self,
        endpoint: &Url,
        file: &UploadFile,
    ) -> Result<ValuationReport, AttemptError> {
        tracing::debug!("POST {} ({} bytes)", endpoint, file.len());

        let response = self
            .client
            .post(endpoint.clone())
            .multipart(Self::form_for(file)?)
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        tracing::debug!("{} answered {} ({} chars)", endpoint, status, body.len());
        classify_response(status, &body)
    }
}

/// Turn a status and body into a report or the matching failure.
///
/// Non-2xx is a status failure (keeping the body's `error` string when there
/// is one); a 2xx body with an `error` field is a logical failure; a 2xx
/// body that is not a report is malformed.
pub fn classify_response(status: StatusCode, body: &str) -> Result<ValuationReport, AttemptError> {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error_field = parsed
        .as_ref()
        .and_then(|value| value.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string);

    if !status.is_success() {
        let message = error_field.unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status.canonical_reason().unwrap_or("no body").to_string()
            } else {
                trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect()
            }
        });
        return Err(AttemptError::Status {
            status: status.as_u16(),
            message,
        });
    }

    if let Some(message) = error_field {
        return Err(AttemptError::Logical(message));
    }

    let value = parsed.ok_or_else(|| AttemptError::Malformed("response is not JSON".to_string()))?;
    serde_json::from_value(value).map_err(|e| AttemptError::Malformed(e.to_string()))
}
