//! Unix socket estimator.
//!
//! A client connects, writes one JSON request and reads one JSON response;
//! the server then closes the connection. Connections are served one at a
//! time. A request ends when the peer stops writing or the bytes received so
//! far, ignoring trailing whitespace, end with `}`.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::datasource::{DataSourceError, Frame};
use crate::trainer::{Predictor, TrainerError};

/// Upper bound on a single request.
const MAX_REQUEST_BYTES: usize = 1024 * 1024;

const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum EstimatorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to handle request: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request exceeds 1 MiB")]
    TooLarge,

    #[error("timed out waiting for request")]
    Timeout,

    #[error(transparent)]
    Trainer(#[from] TrainerError),

    #[error(transparent)]
    DataSource(#[from] DataSourceError),
}

/// Feature rows to estimate power for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PowerRequest {
    /// Column names of `values`.
    pub metrics: Vec<String>,

    /// One row per data point.
    pub values: Vec<Vec<f64>>,

    #[serde(default)]
    pub output_type: String,

    #[serde(default, alias = "energy_source")]
    pub source: String,

    /// Columns set on every row to the matching `system_values` entry,
    /// replacing a metric of the same name.
    #[serde(default)]
    pub system_features: Vec<String>,

    #[serde(default)]
    pub system_values: Vec<Value>,

    /// `pipeline` or `pipeline/model`; empty picks a pipeline by its features.
    #[serde(default)]
    pub trainer_name: String,

    #[serde(default)]
    pub filter: String,
}

impl PowerRequest {
    /// Build the feature table, broadcasting system features to every row.
    pub fn to_frame(&self) -> Result<Frame, EstimatorError> {
        if self.system_features.len() != self.system_values.len() {
            return Err(EstimatorError::InvalidRequest(format!(
                "{} system features but {} system values",
                self.system_features.len(),
                self.system_values.len()
            )));
        }

        let mut frame = Frame::from_rows(self.metrics.clone(), self.values.clone())?;
        for (name, value) in self.system_features.iter().zip(&self.system_values) {
            let numeric = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .ok_or_else(|| {
                EstimatorError::InvalidRequest(format!("system value {value} of {name:?} is not numeric"))
            })?;
            frame.broadcast_column(name, numeric);
        }
        Ok(frame)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerResponse {
    /// Per model, one estimate per request row.
    pub powers: BTreeMap<String, Vec<f64>>,
    pub msg: String,
    pub core_ratio: u32,
}

impl PowerResponse {
    fn failure(msg: String) -> Self {
        Self {
            powers: BTreeMap::new(),
            msg,
            core_ratio: 1,
        }
    }
}

pub struct EstimatorServer {
    path: PathBuf,
    listener: UnixListener,
    predictor: Arc<Predictor>,
}

impl EstimatorServer {
    /// Bind `path`, replacing a stale socket file left by an earlier run.
    pub fn bind(path: &Path, predictor: Arc<Predictor>) -> std::io::Result<Self> {
        remove_socket(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(path)?;
        info!("listening on {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            listener,
            predictor,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept and answer connections one by one until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let accepted = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => accepted,
            };
            let stream = match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    error!("Failed to accept connection: {e}");
                    continue;
                }
            };

            let span = info_span!("request", id = %Uuid::new_v4());
            let handled = handle_connection(stream, &self.predictor).instrument(span);
            tokio::select! {
                _ = &mut shutdown => break,
                result = handled => {
                    if let Err(e) = result {
                        warn!("Connection failed: {e}");
                    }
                }
            }
        }
        info!("Estimator shutting down");
        Ok(())
    }
}

impl Drop for EstimatorServer {
    fn drop(&mut self) {
        debug!("clean socket");
        remove_socket(&self.path);
    }
}

fn remove_socket(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {e}", path.display());
        }
    }
}

async fn handle_connection(mut stream: UnixStream, predictor: &Predictor) -> Result<(), EstimatorError> {
    let response = match read_request(&mut stream).await {
        Ok(raw) => answer(&raw, predictor),
        Err(e) => PowerResponse::failure(e.to_string()),
    };
    if !response.msg.is_empty() {
        error!("{}", response.msg);
    }

    let body = serde_json::to_vec(&response)?;
    stream.write_all(&body).await?;
    stream.shutdown().await?;
    Ok(())
}

async fn read_request(stream: &mut UnixStream) -> Result<BytesMut, EstimatorError> {
    let mut buf = BytesMut::with_capacity(1024);
    let read = async {
        loop {
            let n = stream.read_buf(&mut buf).await?;
            if n == 0 || buf.trim_ascii_end().ends_with(b"}") {
                return Ok::<(), EstimatorError>(());
            }
            if buf.len() > MAX_REQUEST_BYTES {
                return Err(EstimatorError::TooLarge);
            }
        }
    };
    tokio::time::timeout(READ_TIMEOUT, read)
        .await
        .map_err(|_| EstimatorError::Timeout)??;
    Ok(buf)
}

fn answer(raw: &[u8], predictor: &Predictor) -> PowerResponse {
    let result = serde_json::from_slice::<PowerRequest>(raw.trim_ascii())
        .map_err(EstimatorError::from)
        .and_then(|request| {
            let frame = request.to_frame()?;
            let selector = Some(request.trainer_name.as_str());
            Ok(predictor.estimate(selector, &frame)?)
        });

    match result {
        Ok(estimate) => {
            info!(
                pipeline = %estimate.pipeline,
                models = estimate.models.len(),
                "Request answered"
            );
            PowerResponse {
                powers: estimate.models.into_iter().collect(),
                msg: String::new(),
                core_ratio: 1,
            }
        }
        Err(e) => PowerResponse::failure(e.to_string()),
    }
}

/// Client side of the estimator socket.
pub struct EstimatorClient {
    path: PathBuf,
}

impl EstimatorClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Send one request and wait for the server to answer and close.
    pub async fn request(&self, request: &PowerRequest) -> Result<PowerResponse, EstimatorError> {
        let mut stream = UnixStream::connect(&self.path).await?;
        stream.write_all(&serde_json::to_vec(request)?).await?;

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await?;
        Ok(serde_json::from_slice(&reply)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_broadcasts_system_features() {
        let request: PowerRequest = serde_json::from_str(
            r#"{
                "metrics": ["bpf_cpu_time_ms", "freq"],
                "values": [[10.0, 2000.0], [20.0, 2100.0]],
                "energy_source": "rapl",
                "system_features": ["cores"],
                "system_values": ["8"]
            }"#,
        )
        .unwrap();
        assert_eq!(request.source, "rapl");

        let frame = request.to_frame().unwrap();
        assert_eq!(frame.column("cores").unwrap(), vec![8.0, 8.0]);
        assert_eq!(frame.column("freq").unwrap(), vec![2000.0, 2100.0]);
    }

    #[test]
    fn test_system_feature_replaces_metric() {
        let request = PowerRequest {
            metrics: vec!["freq".into(), "cores".into()],
            values: vec![vec![2000.0, 4.0], vec![2100.0, 4.0]],
            system_features: vec!["cores".into()],
            system_values: vec![serde_json::json!(16)],
            ..Default::default()
        };
        let frame = request.to_frame().unwrap();
        assert_eq!(frame.columns(), &["freq", "cores"]);
        assert_eq!(frame.column("cores").unwrap(), vec![16.0, 16.0]);
    }

    #[test]
    fn test_response_wire_format() {
        let failure = serde_json::to_string(&PowerResponse::failure("boom".into())).unwrap();
        assert_eq!(failure, r#"{"powers":{},"msg":"boom","core_ratio":1}"#);

        let ok = PowerResponse {
            powers: BTreeMap::from([("linear".to_string(), vec![1.5, 2.0])]),
            msg: String::new(),
            core_ratio: 1,
        };
        assert_eq!(
            serde_json::to_string(&ok).unwrap(),
            r#"{"powers":{"linear":[1.5,2.0]},"msg":"","core_ratio":1}"#
        );
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let request = PowerRequest {
            metrics: vec!["a".into(), "b".into()],
            values: vec![vec![1.0]],
            ..Default::default()
        };
        assert!(request.to_frame().is_err());
    }

    #[test]
    fn test_non_numeric_system_value_rejected() {
        let request = PowerRequest {
            metrics: vec!["a".into()],
            values: vec![vec![1.0]],
            system_features: vec!["arch".into()],
            system_values: vec![Value::String("x86".into())],
            ..Default::default()
        };
        assert!(matches!(
            request.to_frame(),
            Err(EstimatorError::InvalidRequest(_))
        ));
    }
}
