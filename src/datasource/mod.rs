//! Telemetry sources.
//!
//! - [`frame`]: timestamp-indexed tables produced by queries
//! - [`prometheus`]: Prometheus HTTP API client and PromQL helpers
//!
//! A backend only implements [`MetricSource::fetch`]; the range and instant
//! queries built on top enforce that each query resolves to exactly one series
//! and join the results on timestamp.

pub mod frame;
pub mod prometheus;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use thiserror::Error;
use tracing::{debug, info};

pub use frame::Frame;

#[derive(Error, Debug)]
pub enum DataSourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Prometheus returned {error_type}: {error}")]
    Api { error_type: String, error: String },

    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    #[error("No data found for query: {0}")]
    NoData(String),

    #[error("Expected single time-series but got {count} for query: {query}")]
    MultipleSeries { count: usize, query: String },

    #[error("column {0:?} not found")]
    MissingColumn(String),

    #[error("column {0:?} appears twice")]
    DuplicateColumn(String),

    #[error("malformed table: {0}")]
    Shape(String),
}

/// One labelled series as returned by a backend.
#[derive(Debug, Clone, Default)]
pub struct Series {
    pub labels: HashMap<String, String>,
    pub samples: Vec<(i64, f64)>,
}

#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Evaluate `query` over `[start, end]` at resolution `step`.
    async fn fetch(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: &str,
    ) -> Result<Vec<Series>, DataSourceError>;

    /// Run every `(column, promql)` query over the range and join the results.
    async fn range_query(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: &str,
        queries: &[(String, String)],
    ) -> Result<Frame, DataSourceError> {
        let frames = try_join_all(queries.iter().map(|(name, promql)| async move {
            info!(column = %name, query = %promql, step, %start, %end, "Running range query");
            let series = self.fetch(promql, start, end, step).await?;
            single_series_frame(name, promql, series)
        }))
        .await?;

        let frame = join_all_frames(frames)?;
        debug!(columns = ?frame.columns(), rows = frame.len(), "Range query joined");
        Ok(frame)
    }

    /// Run every query at a single instant and join the results.
    async fn instant_query(
        &self,
        at: DateTime<Utc>,
        queries: &[(String, String)],
    ) -> Result<Frame, DataSourceError> {
        let frames = try_join_all(queries.iter().map(|(name, promql)| async move {
            debug!(column = %name, query = %promql, %at, "Running instant query");
            let series = self.fetch(promql, at, at, "1s").await?;
            single_series_frame(name, promql, series)
        }))
        .await?;

        join_all_frames(frames)
    }
}

fn single_series_frame(
    name: &str,
    promql: &str,
    mut series: Vec<Series>,
) -> Result<Frame, DataSourceError> {
    if series.first().map_or(true, |s| s.samples.is_empty()) {
        return Err(DataSourceError::NoData(promql.to_string()));
    }
    if series.len() != 1 {
        return Err(DataSourceError::MultipleSeries {
            count: series.len(),
            query: promql.to_string(),
        });
    }
    let only = series.remove(0);
    Ok(Frame::from_series(name, only.samples))
}

fn join_all_frames(frames: Vec<Frame>) -> Result<Frame, DataSourceError> {
    let mut frames = frames.into_iter();
    let first = frames
        .next()
        .ok_or_else(|| DataSourceError::Shape("no queries given".to_string()))?;
    frames.try_fold(first, |acc, next| acc.inner_join(&next))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Series>);

    #[async_trait]
    impl MetricSource for Fixed {
        async fn fetch(
            &self,
            _query: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _step: &str,
        ) -> Result<Vec<Series>, DataSourceError> {
            Ok(self.0.clone())
        }
    }

    fn series(samples: Vec<(i64, f64)>) -> Series {
        Series {
            labels: HashMap::new(),
            samples,
        }
    }

    fn queries() -> Vec<(String, String)> {
        vec![("a".to_string(), "up".to_string())]
    }

    #[tokio::test]
    async fn test_no_data_is_an_error() {
        let err = Fixed(vec![]).range_query(Utc::now(), Utc::now(), "1s", &queries()).await;
        assert!(matches!(err, Err(DataSourceError::NoData(q)) if q == "up"));

        let err = Fixed(vec![series(vec![])])
            .instant_query(Utc::now(), &queries())
            .await;
        assert!(matches!(err, Err(DataSourceError::NoData(_))));
    }

    #[tokio::test]
    async fn test_multiple_series_is_an_error() {
        let src = Fixed(vec![series(vec![(1, 1.0)]), series(vec![(1, 2.0)])]);
        let err = src.range_query(Utc::now(), Utc::now(), "1s", &queries()).await;
        assert!(matches!(err, Err(DataSourceError::MultipleSeries { count: 2, .. })));
    }

    #[tokio::test]
    async fn test_queries_are_joined_by_name() {
        let src = Fixed(vec![series(vec![(1, 1.0), (2, 2.0)])]);
        let qs = vec![
            ("a".to_string(), "x".to_string()),
            ("b".to_string(), "y".to_string()),
        ];
        let frame = src.range_query(Utc::now(), Utc::now(), "1s", &qs).await.unwrap();
        assert_eq!(frame.columns(), &["a".to_string(), "b".to_string()]);
        assert_eq!(frame.len(), 2);
    }
}
