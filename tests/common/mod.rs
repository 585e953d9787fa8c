//! Shared fixtures: a deterministic metric source and a pipeline file.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use power_model::config::PipelineConfig;
use power_model::datasource::{DataSourceError, MetricSource, Series};

pub const STEP_SECS: i64 = 15;

/// Serves `cpu_freq`, `cpu_util` and `node_power`, where power is an exact
/// linear function of the other two. Any other query has no data.
pub struct Synthetic;

pub fn freq(i: i64) -> f64 {
    1000.0 + (i % 17) as f64 * 50.0
}

pub fn util(i: i64) -> f64 {
    3.0 + (i % 11) as f64 * 7.0
}

pub fn power(freq: f64, util: f64) -> f64 {
    0.02 * freq + 0.5 * util + 10.0
}

fn value(query: &str, ts: i64) -> Option<f64> {
    let i = ts / STEP_SECS;
    match query {
        "cpu_freq" => Some(freq(i)),
        "cpu_util" => Some(util(i)),
        "node_power" => Some(power(freq(i), util(i))),
        _ => None,
    }
}

#[async_trait]
impl MetricSource for Synthetic {
    async fn fetch(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: &str,
    ) -> Result<Vec<Series>, DataSourceError> {
        let step = step
            .trim_end_matches('s')
            .parse::<i64>()
            .unwrap_or(STEP_SECS)
            .max(1);

        let mut samples = Vec::new();
        let mut ts = start.timestamp();
        while ts <= end.timestamp() {
            match value(query, ts) {
                Some(v) => samples.push((ts, v)),
                None => return Ok(Vec::new()),
            }
            ts += step;
        }
        Ok(vec![Series {
            labels: HashMap::new(),
            samples,
        }])
    }
}

pub fn window_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
}

pub fn pipeline_yaml(dir: &Path) -> String {
    format!(
        r#"
prometheus:
  url: http://localhost:9090
train:
  path: "{}"
  start_at: "2024-06-01T10:00:00Z"
  end_at: "2024-06-01T11:00:00Z"
  step: 15s
  target: ${{power_metric}}
  vars:
    power_metric: node_power
  seed: 7
  pipelines:
    - name: freq
      features:
        cpu_freq: cpu_freq
    - name: full
      features:
        cpu_freq: cpu_freq
        cpu_util: cpu_util
  models:
    linear:
    xgboost:
      n_estimators: 20
      max_depth: 3
"#,
        dir.display()
    )
}

pub fn pipeline_config(dir: &Path) -> PipelineConfig {
    PipelineConfig::from_yaml(&pipeline_yaml(dir)).unwrap()
}
