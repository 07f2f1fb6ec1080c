//! Submission results: the valuation payload, failure taxonomy and the
//! outcome variant the presenter renders.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use ts_rs::TS;

/// Which of the two endpoints produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Primary,
    Fallback,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Identification of the scanned comic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ComicIdentification {
    #[serde(default)]
    pub title: String,
    #[serde(rename = "issueNumber", default)]
    pub issue_number: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub year: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
}

/// Market prices. Amounts stay as the service formatted them ("12.50").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PriceSummary {
    #[serde(default)]
    pub min_price: String,
    #[serde(default)]
    pub max_price: String,
    #[serde(default)]
    pub avg_price: String,
    #[serde(default)]
    pub database_avg_price: String,
    #[serde(default)]
    pub total_listings: u32,
    #[serde(default)]
    pub sales_trend: String,
}

impl PriceSummary {
    #[must_use]
    pub fn average(&self) -> Option<f64> {
        self.avg_price.trim().parse().ok()
    }

    #[must_use]
    pub fn has_listings(&self) -> bool {
        self.total_listings > 0
    }
}

/// The `comicDetails` object; flat on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ComicDetails {
    #[serde(flatten)]
    pub identification: ComicIdentification,
    #[serde(flatten)]
    pub prices: PriceSummary,
}

/// Success payload returned by either endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ValuationReport {
    pub comic_details: ComicDetails,
    #[serde(default)]
    pub report: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<String>,
    /// Stage name to elapsed time, e.g. `"ebay_fetch": "0.91s"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<BTreeMap<String, String>>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
        Null,
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
        Raw::Null => String::new(),
    })
}

/// Why a file was refused before any request was made.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum InvalidInput {
    #[error("not an image (media type: {})", media_type.as_deref().unwrap_or("unknown"))]
    NotAnImage { media_type: Option<String> },

    #[error("file is empty")]
    Empty,

    #[error("file is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
}

/// Terminal failure of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmissionError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InvalidInput),

    #[error("both endpoints failed (primary: {primary}; fallback: {fallback})")]
    TransportFailure { primary: String, fallback: String },

    #[error("{endpoint} endpoint reported an error: {message}")]
    LogicalFailure {
        endpoint: EndpointKind,
        message: String,
    },

    /// Returned only to the caller whose submission was replaced.
    #[error("superseded by a newer submission")]
    Superseded,
}

impl SubmissionError {
    /// Text shown to the user in place of results.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidInput(InvalidInput::TooLarge { .. }) => "Image is too large",
            Self::InvalidInput(InvalidInput::Empty) => "The selected file is empty",
            Self::InvalidInput(InvalidInput::NotAnImage { .. }) => "Please upload an image file",
            Self::TransportFailure { .. } | Self::LogicalFailure { .. } => {
                "Failed to process image. Please try again."
            }
            Self::Superseded => "A newer upload replaced this one",
        }
    }

    #[must_use]
    pub const fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}

/// State of one submission as seen by the presenter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    #[default]
    Pending,
    Succeeded(ValuationReport),
    Failed(SubmissionError),
}

impl SubmissionOutcome {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    #[must_use]
    pub const fn report(&self) -> Option<&ValuationReport> {
        match self {
            Self::Succeeded(report) => Some(report),
            _ => None,
        }
    }

    #[must_use]
    pub const fn error(&self) -> Option<&SubmissionError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

impl From<Result<ValuationReport, SubmissionError>> for SubmissionOutcome {
    fn from(result: Result<ValuationReport, SubmissionError>) -> Self {
        match result {
            Ok(report) => Self::Succeeded(report),
            Err(error) => Self::Failed(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fast_endpoint_payload_deserializes() {
        let payload = json!({
            "comicDetails": {
                "title": "The Amazing Spider-Man",
                "issueNumber": "121",
                "year": "1973",
                "min_price": "120.00",
                "max_price": "1250.00",
                "avg_price": "410.50",
                "sales_trend": "Increasing",
                "database_avg_price": "395.00",
                "total_listings": 12
            },
            "report": "Key issue.",
            "processingTime": "3.21s",
            "breakdown": {
                "image_processing": "1.10s",
                "parallel_fetch": "1.90s"
            }
        });

        let report: ValuationReport = serde_json::from_value(payload).expect("valid payload");
        assert_eq!(report.comic_details.identification.title, "The Amazing Spider-Man");
        assert_eq!(report.comic_details.identification.issue_number, "121");
        assert_eq!(report.comic_details.prices.total_listings, 12);
        assert_eq!(report.comic_details.prices.average(), Some(410.5));
        assert_eq!(report.processing_time.as_deref(), Some("3.21s"));
        let breakdown = report.breakdown.expect("breakdown");
        assert_eq!(breakdown.get("parallel_fetch").map(String::as_str), Some("1.90s"));
    }

    #[test]
    fn test_identification_only_payload_defaults_prices() {
        // The slow endpoint historically answered without prices
        let payload = json!({
            "comicDetails": { "title": "Saga", "issueNumber": "1", "year": 2012 },
            "report": "First issue."
        });

        let report: ValuationReport = serde_json::from_value(payload).expect("valid payload");
        assert_eq!(report.comic_details.identification.year, "2012");
        assert_eq!(report.comic_details.prices, PriceSummary::default());
        assert!(!report.comic_details.prices.has_listings());
        assert!(report.breakdown.is_none());
    }

    #[test]
    fn test_serialized_report_keeps_wire_shape() {
        let report = ValuationReport {
            comic_details: ComicDetails {
                identification: ComicIdentification {
                    title: "Hellboy".into(),
                    issue_number: "1".into(),
                    year: "1994".into(),
                    publisher: Some("Dark Horse".into()),
                },
                prices: PriceSummary {
                    total_listings: 3,
                    ..PriceSummary::default()
                },
            },
            report: String::new(),
            processing_time: None,
            breakdown: None,
        };

        let value = serde_json::to_value(&report).expect("serializes");
        assert_eq!(value["comicDetails"]["issueNumber"], "1");
        assert_eq!(value["comicDetails"]["publisher"], "Dark Horse");
        assert_eq!(value["comicDetails"]["total_listings"], 3);
        assert!(value.get("processingTime").is_none());
    }

    #[test]
    fn test_outcome_serialization_is_tagged() {
        let pending = serde_json::to_value(SubmissionOutcome::Pending).expect("serializes");
        assert_eq!(pending, json!({ "status": "pending" }));

        let failed = SubmissionOutcome::Failed(SubmissionError::TransportFailure {
            primary: "timeout".into(),
            fallback: "HTTP 502".into(),
        });
        let value = serde_json::to_value(&failed).expect("serializes");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["data"]["kind"], "transport_failure");
    }

    #[test]
    fn test_user_messages() {
        let not_image = SubmissionError::from(InvalidInput::NotAnImage { media_type: None });
        assert_eq!(not_image.user_message(), "Please upload an image file");
        assert!(not_image.is_invalid_input());

        let logical = SubmissionError::LogicalFailure {
            endpoint: EndpointKind::Primary,
            message: "No eBay data found".into(),
        };
        assert_eq!(logical.user_message(), "Failed to process image. Please try again.");
        assert_eq!(
            logical.to_string(),
            "primary endpoint reported an error: No eBay data found"
        );
    }

    #[test]
    fn test_outcome_terminal_states() {
        assert!(!SubmissionOutcome::Pending.is_terminal());
        let ok = SubmissionOutcome::from(Ok(ValuationReport::default()));
        assert!(ok.is_terminal());
        assert!(ok.report().is_some());
        let err = SubmissionOutcome::from(Err(SubmissionError::Superseded));
        assert_eq!(err.error(), Some(&SubmissionError::Superseded));
    }
}
