//! The `run` polling loop against a source that fails once.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use power_model::datasource::{DataSourceError, MetricSource, Series};
use power_model::server::metrics::{run_polling, PredictionMetrics};
use power_model::trainer::{self, Predictor};

use common::{pipeline_config, Synthetic};

/// Answers like [`Synthetic`] except for the first request, which has no data.
struct FailsFirst {
    calls: AtomicUsize,
}

#[async_trait]
impl MetricSource for FailsFirst {
    async fn fetch(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: &str,
    ) -> Result<Vec<Series>, DataSourceError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(Vec::new());
        }
        Synthetic.fetch(query, start, end, step).await
    }
}

#[tokio::test]
async fn test_failed_round_is_counted_and_polling_continues() {
    let dir = tempfile::tempdir().unwrap();
    let config = pipeline_config(dir.path());
    trainer::train(&config, &Synthetic).await.unwrap();

    let source = Arc::new(FailsFirst {
        calls: AtomicUsize::new(0),
    });
    let predictor = Arc::new(Predictor::load(&config, source).unwrap());
    let metrics = Arc::new(PredictionMetrics::new().unwrap());

    run_polling(
        predictor,
        metrics.clone(),
        Duration::from_millis(20),
        tokio::time::sleep(Duration::from_millis(300)),
    )
    .await;

    let text = metrics.encode().unwrap();
    assert!(
        text.contains("st_power_model_prediction_failures_total 1"),
        "{text}"
    );
    assert!(text.contains(r#"st_power_model_target{model="linear",pipeline="full"}"#));
    assert!(text.contains(r#"st_power_model_target{model="xgboost",pipeline="freq"}"#));
}

#[tokio::test]
async fn test_shutdown_stops_polling() {
    let dir = tempfile::tempdir().unwrap();
    let config = pipeline_config(dir.path());
    trainer::train(&config, &Synthetic).await.unwrap();

    let predictor = Arc::new(Predictor::load(&config, Arc::new(Synthetic)).unwrap());
    let metrics = Arc::new(PredictionMetrics::new().unwrap());

    // An hour-long interval: only the immediate first tick runs before shutdown.
    tokio::time::timeout(
        Duration::from_secs(5),
        run_polling(
            predictor,
            metrics.clone(),
            Duration::from_secs(3600),
            tokio::time::sleep(Duration::from_millis(100)),
        ),
    )
    .await
    .unwrap();

    let text = metrics.encode().unwrap();
    assert!(text.contains("st_power_model_prediction_failures_total 0"));
}
