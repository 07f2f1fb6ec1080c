//! Where in-flight progress comes from while a request is outstanding.
//!
//! The controller only sees [`ProgressSource`]; the shipped
//! [`HeuristicProgress`] ticks a fixed step on a fixed cadence because the
//! valuation service does not report progress itself.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::trace;

use crate::infrastructure::config::ProgressConfig;

/// Receives progress estimates from a source.
pub trait ProgressSink: Send + Sync {
    fn report(&self, value: f64);
}

/// A stream of progress estimates for one in-flight submission.
///
/// `run` never completes on its own; the controller drops the future once
/// the response arrives.
#[async_trait]
pub trait ProgressSource: Send + Sync {
    async fn run(&self, sink: &dyn ProgressSink);
}

/// `step` every `interval`, never past `cap`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeuristicProgress {
    pub step: f64,
    pub interval: Duration,
    pub cap: f64,
}

impl Default for HeuristicProgress {
    fn default() -> Self {
        Self {
            step: 10.0,
            interval: Duration::from_millis(500),
            cap: 90.0,
        }
    }
}

impl From<&ProgressConfig> for HeuristicProgress {
    fn from(config: &ProgressConfig) -> Self {
        Self {
            step: config.step,
            interval: Duration::from_millis(config.interval_ms),
            cap: config.cap,
        }
    }
}

#[async_trait]
impl ProgressSource for HeuristicProgress {
    async fn run(&self, sink: &dyn ProgressSink) {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut value = 0.0_f64;
        while value < self.cap {
            ticker.tick().await;
            value = (value + self.step).min(self.cap);
            trace!(value, "heuristic progress tick");
            sink.report(value);
        }

        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        values: Mutex<Vec<f64>>,
    }

    impl RecordingSink {
        fn values(&self) -> Vec<f64> {
            self.values.lock().unwrap().clone()
        }
    }

    impl ProgressSink for RecordingSink {
        fn report(&self, value: f64) {
            self.values.lock().unwrap().push(value);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_heuristic_ticks_up_to_cap_and_stays() {
        let sink = RecordingSink::default();
        let source = HeuristicProgress::default();

        let result = time::timeout(Duration::from_secs(30), source.run(&sink)).await;
        assert!(result.is_err(), "source must never finish on its own");
        assert_eq!(
            sink.values(),
            vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_waits_one_interval() {
        let sink = RecordingSink::default();
        let source = HeuristicProgress::default();

        let _ = time::timeout(Duration::from_millis(499), source.run(&sink)).await;
        assert!(sink.values().is_empty());

        let _ = time::timeout(Duration::from_millis(1001), source.run(&sink)).await;
        assert_eq!(sink.values(), vec![10.0, 20.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uneven_step_is_capped() {
        let sink = RecordingSink::default();
        let source = HeuristicProgress {
            step: 35.0,
            interval: Duration::from_millis(100),
            cap: 90.0,
        };

        let _ = time::timeout(Duration::from_secs(5), source.run(&sink)).await;
        assert_eq!(sink.values(), vec![35.0, 70.0, 90.0]);
    }
}
