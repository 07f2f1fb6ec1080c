//! Two-attempt submission: primary endpoint, then exactly one try on the
//! fallback endpoint with the same payload.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::domain::outcome::{EndpointKind, SubmissionError, ValuationReport};
use crate::domain::upload::UploadFile;
use crate::domain::valuation_service::{AttemptError, ValuationClient};
use crate::infrastructure::config::ApiConfig;

/// Resolved endpoint addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub primary: Url,
    pub fallback: Url,
}

impl Endpoints {
    pub fn from_api_config(config: &ApiConfig) -> Result<Self, url::ParseError> {
        let base = config.base_url.trim_end_matches('/');
        Ok(Self {
            primary: Url::parse(&format!("{base}{}", config.primary_path))?,
            fallback: Url::parse(&format!("{base}{}", config.fallback_path))?,
        })
    }

    #[must_use]
    pub const fn get(&self, kind: EndpointKind) -> &Url {
        match kind {
            EndpointKind::Primary => &self.primary,
            EndpointKind::Fallback => &self.fallback,
        }
    }
}

#[derive(Clone)]
pub struct SubmissionPipeline {
    client: Arc<dyn ValuationClient>,
    endpoints: Endpoints,
}

impl SubmissionPipeline {
    pub fn new(client: Arc<dyn ValuationClient>, endpoints: Endpoints) -> Self {
        Self { client, endpoints }
    }

    #[must_use]
    pub const fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// At most two attempts. A logical failure from the primary ends the
    /// submission without touching the fallback.
    pub async fn run(
        &self,
        submission_id: Uuid,
        file: &UploadFile,
    ) -> Result<ValuationReport, SubmissionError> {
        let primary_error = match self.attempt(submission_id, EndpointKind::Primary, file).await {
            Ok(report) => return Ok(report),
            Err(error) => error,
        };
        if primary_error.is_logical() {
            return Err(SubmissionError::LogicalFailure {
                endpoint: EndpointKind::Primary,
                message: primary_error.to_string(),
            });
        }

        warn!(
            %submission_id,
            error = %primary_error,
            "Primary endpoint failed, retrying on fallback"
        );

        match self.attempt(submission_id, EndpointKind::Fallback, file).await {
            Ok(report) => Ok(report),
            Err(error) if error.is_logical() => Err(SubmissionError::LogicalFailure {
                endpoint: EndpointKind::Fallback,
                message: error.to_string(),
            }),
            Err(fallback_error) => Err(SubmissionError::TransportFailure {
                primary: primary_error.to_string(),
                fallback: fallback_error.to_string(),
            }),
        }
    }

    async fn attempt(
        &self,
        submission_id: Uuid,
        kind: EndpointKind,
        file: &UploadFile,
    ) -> Result<ValuationReport, AttemptError> {
        let endpoint = self.endpoints.get(kind);
        debug!(%submission_id, endpoint = %endpoint, attempt = %kind, "Sending image");

        let started = Instant::now();
        let result = self.client.submit_image(endpoint, file).await;
        let elapsed_ms = started.elapsed().as_millis();

        match &result {
            Ok(report) => info!(
                %submission_id,
                attempt = %kind,
                elapsed_ms,
                listings = report.comic_details.prices.total_listings,
                "Valuation received"
            ),
            Err(error) => warn!(
                %submission_id,
                attempt = %kind,
                elapsed_ms,
                error = %error,
                "Attempt failed"
            ),
        }
        result
    }
}

impl std::fmt::Debug for SubmissionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionPipeline")
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}
