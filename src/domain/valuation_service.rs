//! Network seam for valuation requests.
//!
//! The pipeline only knows this trait; the reqwest implementation lives in
//! `infrastructure::http_client` and tests plug in scripted clients.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::domain::outcome::ValuationReport;
use crate::domain::upload::UploadFile;

/// Why a single request to one endpoint did not yield a report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unreadable response body: {0}")]
    Malformed(String),

    /// 2xx answer carrying an `error` field.
    #[error("{0}")]
    Logical(String),
}

impl AttemptError {
    /// Logical failures end the submission; everything else moves on to the
    /// fallback endpoint.
    #[must_use]
    pub const fn is_logical(&self) -> bool {
        matches!(self, Self::Logical(_))
    }
}

/// Sends one image to one endpoint.
#[async_trait]
pub trait ValuationClient: Send + Sync {
    async fn submit_image(
        &self,
        endpoint: &Url,
        file: &UploadFile,
    ) -> Result<ValuationReport, AttemptError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_error_display() {
        assert_eq!(
            AttemptError::Timeout(Duration::from_secs(60)).to_string(),
            "timed out after 60s"
        );
        assert_eq!(
            AttemptError::Status {
                status: 502,
                message: "Bad Gateway".into()
            }
            .to_string(),
            "HTTP 502: Bad Gateway"
        );
        assert!(AttemptError::Logical("No eBay data".into()).is_logical());
        assert!(!AttemptError::Malformed("eof".into()).is_logical());
    }
}
