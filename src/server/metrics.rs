//! Prediction export over Prometheus.
//!
//! The `run` command predicts on a fixed interval and publishes every model's
//! latest estimate as `st_power_model_target{pipeline, model}`, scraped from
//! `GET /metrics`.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{Encoder, GaugeVec, IntCounter, Opts, Registry, TextEncoder};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::trainer::predictor::{Prediction, Predictor};
use crate::trainer::report::prediction_tables;

pub const TARGET_GAUGE: &str = "st_power_model_target";

/// Registry holding the exported prediction series.
pub struct PredictionMetrics {
    registry: Registry,
    target: GaugeVec,
    failures: IntCounter,
}

impl PredictionMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let target = GaugeVec::new(
            Opts::new(TARGET_GAUGE, "Power estimated by each pipeline and model"),
            &["pipeline", "model"],
        )?;
        registry.register(Box::new(target.clone()))?;

        let failures = IntCounter::new(
            "st_power_model_prediction_failures_total",
            "Prediction rounds that failed",
        )?;
        registry.register(Box::new(failures.clone()))?;

        Ok(Self {
            registry,
            target,
            failures,
        })
    }

    pub fn record(&self, predictions: &[Prediction]) {
        for p in predictions {
            self.target
                .with_label_values(&[p.pipeline.as_str(), p.model.as_str()])
                .set(p.predicted);
        }
    }

    pub fn record_failure(&self) {
        self.failures.inc();
    }

    /// Text exposition of every registered metric.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// State shared by the metrics routes.
pub struct AppState {
    pub metrics: Arc<PredictionMetrics>,
    pub start_time: Instant,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// Predict every `interval` until `shutdown` resolves.
///
/// A failed round is logged and counted; the loop keeps going.
pub async fn run_polling<F>(
    predictor: Arc<Predictor>,
    metrics: Arc<PredictionMetrics>,
    interval: Duration,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }
        let round = tokio::select! {
            _ = &mut shutdown => break,
            round = predictor.predict(None) => round,
        };
        match round {
            Ok(predictions) => {
                metrics.record(&predictions);
                println!("{}", prediction_tables(&predictions));
            }
            Err(e) => {
                metrics.record_failure();
                warn!("Prediction failed: {e}");
            }
        }
    }
    info!("Polling stopped");
}
