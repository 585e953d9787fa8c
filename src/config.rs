//! Runtime configuration for power-model.
//!
//! Two layers live here: the command line ([`Cli`]) and the pipeline file
//! ([`PipelineConfig`]), a YAML document describing where telemetry comes from,
//! which queries make up each pipeline and which regressors to train.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use regex::{Captures, Regex};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Name of the column holding the target series in every joined frame.
pub const TARGET_COLUMN: &str = "target";

/// Default location of the estimator socket.
pub const DEFAULT_SOCKET: &str = "/tmp/estimator.sock";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid pipeline file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid datetime {0:?}")]
    InvalidDatetime(String),

    #[error("invalid pipeline configuration: {0}")]
    Invalid(String),
}

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "power-model",
    version,
    about = "Train and serve power estimation models from Prometheus telemetry"
)]
pub struct Cli {
    /// Log verbosity.
    #[arg(short = 'l', long, value_enum, default_value_t = LogLevel::Info, global = true)]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Train models based on the provided pipeline configuration.
    Train {
        /// Path to the pipeline YAML file.
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Periodically predict with the trained models and export the results.
    Run {
        /// Path to the pipeline YAML file.
        #[arg(short, long)]
        file: PathBuf,

        /// Seconds between predictions.
        #[arg(long, default_value_t = 1)]
        interval: u64,

        /// Listen address of the Prometheus metrics endpoint.
        #[arg(long, default_value = "0.0.0.0:8000")]
        metrics_listen: SocketAddr,
    },

    /// Compare predictions against the measured target over a time range.
    ComputeError {
        /// Path to the pipeline YAML file.
        #[arg(short, long)]
        file: PathBuf,

        /// Start of the range.
        #[arg(short, long, value_parser = parse_datetime)]
        start: Option<DateTime<Utc>>,

        /// End of the range (defaults to now).
        #[arg(short, long, value_parser = parse_datetime)]
        end: Option<DateTime<Utc>>,

        /// Range length in seconds.
        #[arg(short, long, default_value_t = 5 * 60)]
        duration: i64,
    },

    /// Serve predictions over a local Unix socket.
    Serve {
        /// Path to the pipeline YAML file.
        #[arg(short, long)]
        file: PathBuf,

        /// Socket path.
        #[arg(long, default_value = DEFAULT_SOCKET)]
        socket: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Resolve the time range of `compute-error` from its optional flags.
///
/// Without a start the range ends at `end` and spans `duration` seconds; with a
/// start and a positive duration the end is derived from the start.
pub fn resolve_range(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    duration: i64,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), ConfigError> {
    let end = end.unwrap_or(now);
    match start {
        None if duration == 0 => Err(ConfigError::Invalid(
            "please provide start or non-zero duration".to_string(),
        )),
        None => Ok((end - chrono::Duration::seconds(duration), end)),
        Some(start) if duration > 0 => Ok((start, start + chrono::Duration::seconds(duration))),
        Some(start) => Ok((start, end)),
    }
}

/// Top-level pipeline file.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Telemetry backend.
    pub prometheus: PrometheusConfig,

    /// Training set, pipelines and models.
    pub train: TrainConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrometheusConfig {
    /// Base URL of the Prometheus HTTP API (e.g. "http://localhost:9090").
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainConfig {
    /// Directory receiving per-pipeline training artifacts.
    pub path: PathBuf,

    /// Start of the training window.
    #[serde(deserialize_with = "datetime_field")]
    pub start_at: DateTime<Utc>,

    /// End of the training window.
    #[serde(deserialize_with = "datetime_field")]
    pub end_at: DateTime<Utc>,

    /// Query resolution, either a duration string ("15s") or seconds.
    #[serde(deserialize_with = "step_field")]
    pub step: String,

    /// PromQL of the target series.
    pub target: String,

    /// Values substituted into `${name}` placeholders.
    #[serde(default)]
    pub vars: Option<HashMap<String, Value>>,

    pub pipelines: Vec<Pipeline>,

    /// Regressors to train for every pipeline, with their parameters.
    #[serde(deserialize_with = "model_entries")]
    pub models: Vec<ModelEntry>,

    /// Seed for the train/test shuffle; random when absent.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Fraction of samples held out for scoring.
    #[serde(default = "default_test_size")]
    pub test_size: f64,
}

fn default_test_size() -> f64 {
    0.2
}

/// A named set of feature queries.
#[derive(Debug, Clone, Deserialize)]
pub struct Pipeline {
    pub name: String,

    /// Feature queries, in model column order.
    #[serde(deserialize_with = "feature_entries")]
    pub features: Vec<Feature>,
}

impl Pipeline {
    pub fn feature_names(&self) -> Vec<String> {
        self.features.iter().map(|f| f.name.clone()).collect()
    }

    /// `(column, promql)` pairs for a datasource query.
    pub fn queries(&self) -> Vec<(String, String)> {
        self.features
            .iter()
            .map(|f| (f.name.clone(), f.query.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub name: String,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelEntry {
    pub name: String,

    /// Raw estimator parameters (`null` when none were given).
    pub params: Value,
}

impl PipelineConfig {
    /// Parse a pipeline document and resolve its variables.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let mut config: PipelineConfig = serde_yaml::from_str(text)?;
        config.resolve_vars();
        config.validate()?;
        Ok(config)
    }

    fn resolve_vars(&mut self) {
        let vars = self.train.vars.clone().unwrap_or_default();
        for pipeline in &mut self.train.pipelines {
            for feature in &mut pipeline.features {
                feature.query = substitute_vars(&feature.query, &vars);
            }
        }
        self.train.target = substitute_vars(&self.train.target, &vars);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let train = &self.train;
        if train.pipelines.is_empty() {
            return Err(ConfigError::Invalid("no pipelines defined".to_string()));
        }
        if train.models.is_empty() {
            return Err(ConfigError::Invalid("no models defined".to_string()));
        }
        if train.start_at >= train.end_at {
            return Err(ConfigError::Invalid(format!(
                "start_at {} is not before end_at {}",
                train.start_at, train.end_at
            )));
        }
        if !(train.test_size > 0.0 && train.test_size < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "test_size must be in (0, 1), got {}",
                train.test_size
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for pipeline in &train.pipelines {
            if !seen.insert(pipeline.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate pipeline {:?}",
                    pipeline.name
                )));
            }
            if pipeline.features.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "pipeline {:?} has no features",
                    pipeline.name
                )));
            }
            if pipeline.features.iter().any(|f| f.name == TARGET_COLUMN) {
                return Err(ConfigError::Invalid(format!(
                    "pipeline {:?} uses reserved feature name {TARGET_COLUMN:?}",
                    pipeline.name
                )));
            }
        }
        Ok(())
    }

    pub fn pipeline(&self, name: &str) -> Option<&Pipeline> {
        self.train.pipelines.iter().find(|p| p.name == name)
    }

    pub fn model_names(&self) -> Vec<String> {
        self.train.models.iter().map(|m| m.name.clone()).collect()
    }
}

/// Load a pipeline file from disk.
pub fn load_pipeline(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = PipelineConfig::from_yaml(&text)?;
    tracing::debug!(
        path = %path.display(),
        pipelines = config.train.pipelines.len(),
        models = config.train.models.len(),
        "Pipeline loaded"
    );
    Ok(config)
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{(.*?)\}").expect("placeholder pattern is valid"))
}

/// Replace every `${name}` in `input` with the rendered value of `vars[name]`.
///
/// Unknown names and `null` values keep the placeholder as written.
pub fn substitute_vars(input: &str, vars: &HashMap<String, Value>) -> String {
    placeholder_pattern()
        .replace_all(input, |caps: &Captures| {
            match vars.get(&caps[1]).and_then(render_scalar) {
                Some(rendered) => rendered,
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Parse a timestamp given on the command line or in a pipeline file.
///
/// Naive forms are interpreted as UTC.
pub fn parse_datetime(text: &str) -> Result<DateTime<Utc>, ConfigError> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%SZ", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ConfigError::InvalidDatetime(text.to_string()))
}

fn datetime_field<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_datetime(&text).map_err(de::Error::custom)
}

fn step_field<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Step {
        Text(String),
        Seconds(f64),
    }

    match Step::deserialize(deserializer)? {
        Step::Text(s) if s.trim().is_empty() => Err(de::Error::custom("step must not be empty")),
        Step::Text(s) => Ok(s),
        Step::Seconds(n) if n > 0.0 => Ok(n.to_string()),
        Step::Seconds(n) => Err(de::Error::custom(format!("step must be positive, got {n}"))),
    }
}

/// Deserialize a map into `(key, value)` pairs, keeping document order.
fn ordered_entries<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    struct OrderedVisitor<V>(PhantomData<V>);

    impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedVisitor<V> {
        type Value = Vec<(String, V)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a mapping")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries: Vec<(String, V)> = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, V>()? {
                if entries.iter().any(|(k, _)| *k == key) {
                    return Err(de::Error::custom(format!("duplicate key {key:?}")));
                }
                entries.push((key, value));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(OrderedVisitor(PhantomData))
}

fn feature_entries<'de, D>(deserializer: D) -> Result<Vec<Feature>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(ordered_entries::<D, String>(deserializer)?
        .into_iter()
        .map(|(name, query)| Feature { name, query })
        .collect())
}

fn model_entries<'de, D>(deserializer: D) -> Result<Vec<ModelEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(ordered_entries::<D, Option<Value>>(deserializer)?
        .into_iter()
        .map(|(name, params)| ModelEntry {
            name,
            params: params.unwrap_or(Value::Null),
        })
        .collect())
}
