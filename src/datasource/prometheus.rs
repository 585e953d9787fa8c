//! Prometheus HTTP API client.
//!
//! Only `query_range` is used: instant lookups are ranges whose start and end
//! coincide, which keeps the result shape (`matrix`) identical for both.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::datasource::{DataSourceError, MetricSource, Series};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct PrometheusClient {
    base_url: String,
    http: reqwest::Client,
}

impl PrometheusClient {
    /// Create a client for the API rooted at `url`. Certificates are not verified.
    pub fn new(url: &str) -> Result<Self, DataSourceError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl MetricSource for PrometheusClient {
    async fn fetch(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: &str,
    ) -> Result<Vec<Series>, DataSourceError> {
        let url = format!("{}/api/v1/query_range", self.base_url);
        let start = epoch_seconds(start);
        let end = epoch_seconds(end);

        let response = self
            .http
            .get(&url)
            .query(&[
                ("query", query),
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("step", step),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!(%status, bytes = body.len(), "Prometheus response");
        parse_range_response(&body)
    }
}

fn epoch_seconds(at: DateTime<Utc>) -> String {
    format!("{:.3}", at.timestamp_millis() as f64 / 1000.0)
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<ApiData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiData {
    #[serde(rename = "resultType")]
    result_type: String,
    result: Vec<MatrixSeries>,
}

#[derive(Debug, Deserialize)]
struct MatrixSeries {
    #[serde(default)]
    metric: HashMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

/// Decode a `query_range` response body into series.
pub fn parse_range_response(body: &str) -> Result<Vec<Series>, DataSourceError> {
    let response: ApiResponse = serde_json::from_str(body)
        .map_err(|e| DataSourceError::InvalidResponse(e.to_string()))?;

    if response.status != "success" {
        return Err(DataSourceError::Api {
            error_type: response.error_type.unwrap_or_else(|| "unknown".to_string()),
            error: response.error.unwrap_or_default(),
        });
    }

    let data = response
        .data
        .ok_or_else(|| DataSourceError::InvalidResponse("missing data".to_string()))?;
    if data.result_type != "matrix" {
        return Err(DataSourceError::InvalidResponse(format!(
            "expected matrix result, got {}",
            data.result_type
        )));
    }

    data.result
        .into_iter()
        .map(|series| {
            let samples = series
                .values
                .into_iter()
                .map(|(ts, raw)| {
                    raw.parse::<f64>()
                        .map(|value| (ts as i64, value))
                        .map_err(|_| DataSourceError::InvalidResponse(format!("bad sample {raw:?}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Series {
                labels: series.metric,
                samples,
            })
        })
        .collect()
}

/// Small PromQL builder for the common wrapping operations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub query: String,
    pub cols: Vec<String>,
}

impl Query {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            cols: Vec::new(),
        }
    }

    pub fn retain(mut self, cols: Vec<String>) -> Self {
        self.cols = cols;
        self
    }

    pub fn rate(&self, step: &str) -> Self {
        Self {
            query: format!("rate( {}[{step}] )", self.query),
            cols: self.cols.clone(),
        }
    }

    pub fn sum(&self) -> Self {
        Self {
            query: format!("sum( {} )", self.query),
            cols: self.cols.clone(),
        }
    }

    /// `sum by(...)` keeping `labels` as extra columns.
    pub fn sum_by(&self, labels: &[String]) -> Self {
        let mut cols = self.cols.clone();
        cols.extend(labels.iter().cloned());
        Self {
            query: format!("sum by({})({})", labels.concat(), self.query),
            cols,
        }
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_matrix() {
        let body = r#"{
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [
                    {"metric": {"job": "node"}, "values": [[1717236000.5, "12.5"], [1717236005, "NaN"]]}
                ]
            }
        }"#;
        let series = parse_range_response(body).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].labels["job"], "node");
        assert_eq!(series[0].samples[0], (1717236000, 12.5));
        assert!(series[0].samples[1].1.is_nan());
    }

    #[test]
    fn test_parse_error_status() {
        let body = r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#;
        match parse_range_response(body) {
            Err(DataSourceError::Api { error_type, error }) => {
                assert_eq!(error_type, "bad_data");
                assert_eq!(error, "parse error");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_query_builder() {
        let q = Query::new("node_cpu_seconds_total").rate("20s").sum();
        assert_eq!(q.query, "sum( rate( node_cpu_seconds_total[20s] ) )");

        let by = Query::new("x").retain(vec!["a".into()]).sum_by(&["cpu".into()]);
        assert_eq!(by.query, "sum by(cpu)(x)");
        assert_eq!(by.cols, vec!["a".to_string(), "cpu".to_string()]);
    }
}
