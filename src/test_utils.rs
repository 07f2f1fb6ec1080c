//! Test utilities for Comic Sage
//!
//! Provides a scripted valuation client so controller and pipeline tests run
//! without a network, plus a ready-made context wiring it into a controller.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::application::upload_controller::UploadController;
use crate::domain::outcome::{
    ComicDetails, ComicIdentification, PriceSummary, ValuationReport,
};
use crate::domain::upload::UploadFile;
use crate::domain::valuation_service::{AttemptError, ValuationClient};
use crate::infrastructure::config::AppConfig;

struct ScriptedReply {
    delay: Duration,
    result: Result<ValuationReport, AttemptError>,
}

/// Answers each endpoint from its own queue of replies, in order.
///
/// An endpoint with an empty queue answers with a transport error.
#[derive(Default)]
pub struct ScriptedClient {
    replies: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    calls: Mutex<Vec<Url>>,
}

impl ScriptedClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply that resolves after `delay` (tokio time).
    pub fn push(
        &self,
        endpoint: &Url,
        delay: Duration,
        result: Result<ValuationReport, AttemptError>,
    ) {
        self.replies
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default()
            .push_back(ScriptedReply { delay, result });
    }

    pub fn push_ok(&self, endpoint: &Url, report: ValuationReport) {
        self.push(endpoint, Duration::ZERO, Ok(report));
    }

    pub fn push_err(&self, endpoint: &Url, error: AttemptError) {
        self.push(endpoint, Duration::ZERO, Err(error));
    }

    /// Endpoints hit so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<Url> {
        self.calls.lock().unwrap().clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ValuationClient for ScriptedClient {
    async fn submit_image(
        &self,
        endpoint: &Url,
        _file: &UploadFile,
    ) -> Result<ValuationReport, AttemptError> {
        self.calls.lock().unwrap().push(endpoint.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(endpoint.as_str())
            .and_then(VecDeque::pop_front);

        match reply {
            Some(reply) => {
                if !reply.delay.is_zero() {
                    tokio::time::sleep(reply.delay).await;
                }
                reply.result
            }
            None => Err(AttemptError::Transport(format!(
                "no scripted reply for {endpoint}"
            ))),
        }
    }
}

/// A plausible report with the given listing count.
#[must_use]
pub fn sample_report(total_listings: u32) -> ValuationReport {
    ValuationReport {
        comic_details: ComicDetails {
            identification: ComicIdentification {
                title: "The Amazing Spider-Man".into(),
                issue_number: "300".into(),
                year: "1988".into(),
                publisher: Some("Marvel".into()),
            },
            prices: PriceSummary {
                min_price: "450.00".into(),
                max_price: "1200.00".into(),
                avg_price: "780.00".into(),
                database_avg_price: "760.00".into(),
                total_listings,
                sales_trend: "Stable".into(),
            },
        },
        report: "First full appearance of Venom.".into(),
        processing_time: Some("2.40s".into()),
        breakdown: None,
    }
}

/// A small JPEG-looking upload.
#[must_use]
pub fn sample_image() -> UploadFile {
    UploadFile::new("asm-300.jpg", vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10])
}

/// Controller wired to a scripted client with default configuration.
pub struct TestContext {
    pub config: AppConfig,
    pub client: Arc<ScriptedClient>,
    pub controller: Arc<UploadController>,
}

impl TestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    #[must_use]
    pub fn with_config(config: AppConfig) -> Self {
        let client = Arc::new(ScriptedClient::new());
        let controller = UploadController::from_config(&config, client.clone())
            .expect("default test configuration is valid");
        Self {
            config,
            client,
            controller: Arc::new(controller),
        }
    }

    #[must_use]
    pub fn primary(&self) -> &Url {
        &self.controller.endpoints().primary
    }

    #[must_use]
    pub fn fallback(&self) -> &Url {
        &self.controller.endpoints().fallback
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[macro_export]
macro_rules! test_context {
    () => {{ $crate::test_utils::TestContext::new() }};
}
