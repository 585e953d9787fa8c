//! Scoring with trained models.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ndarray::Array1;
use tracing::{debug, info};

use crate::config::{Pipeline, PipelineConfig, TARGET_COLUMN};
use crate::datasource::{Frame, MetricSource};
use crate::model::metrics::ErrorMetrics;
use crate::model::{ModelPipeline, Regressor};
use crate::trainer::store::ModelStore;
use crate::trainer::TrainerError;

/// Errors of one model over a time range.
#[derive(Debug, Clone)]
pub struct RangeScore {
    pub pipeline: String,
    pub model: String,
    pub samples: usize,
    pub metrics: ErrorMetrics,
}

/// One model's estimate at a single instant, next to the measured target.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub pipeline: String,
    pub model: String,
    pub features: Vec<(String, f64)>,
    pub target: f64,
    pub predicted: f64,
    /// `target - predicted`.
    pub diff: f64,
    /// `|diff / target|` in percent, rounded to two decimals.
    pub error_pct: f64,
}

/// Predictions of every model of one pipeline for caller-supplied rows.
#[derive(Debug, Clone)]
pub struct Estimate {
    pub pipeline: String,
    pub models: Vec<(String, Vec<f64>)>,
}

struct LoadedPipeline {
    pipeline: Pipeline,
    models: Vec<(String, ModelPipeline)>,
}

/// Trained models of every pipeline plus the queries needed to feed them.
pub struct Predictor {
    source: Arc<dyn MetricSource>,
    pipelines: Vec<LoadedPipeline>,
    target: String,
    step: String,
}

impl Predictor {
    /// Load every configured model of every pipeline from the artifact store.
    pub fn load(config: &PipelineConfig, source: Arc<dyn MetricSource>) -> Result<Self, TrainerError> {
        let store = ModelStore::new(&config.train.path);
        let mut pipelines = Vec::with_capacity(config.train.pipelines.len());
        for pipeline in &config.train.pipelines {
            let mut models = Vec::with_capacity(config.train.models.len());
            for entry in &config.train.models {
                let model = store.load_model(&pipeline.name, &entry.name)?;
                models.push((entry.name.clone(), model));
            }
            pipelines.push(LoadedPipeline {
                pipeline: pipeline.clone(),
                models,
            });
        }

        info!(
            pipelines = pipelines.len(),
            models = config.train.models.len(),
            path = %store.root().display(),
            "Models loaded"
        );

        Ok(Self {
            source,
            pipelines,
            target: config.train.target.clone(),
            step: config.train.step.clone(),
        })
    }

    pub fn pipeline_names(&self) -> Vec<String> {
        self.pipelines.iter().map(|p| p.pipeline.name.clone()).collect()
    }

    fn target_query(&self) -> Vec<(String, String)> {
        vec![(TARGET_COLUMN.to_string(), self.target.clone())]
    }

    /// Score every model against the measured target over `[start, end]`.
    pub async fn predict_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Option<&str>,
    ) -> Result<Vec<RangeScore>, TrainerError> {
        let step = step.unwrap_or(&self.step);
        let target = self
            .source
            .range_query(start, end, step, &self.target_query())
            .await?;

        let mut scores = Vec::new();
        for loaded in &self.pipelines {
            let features = self
                .source
                .range_query(start, end, step, &loaded.pipeline.queries())
                .await?;
            let (frame, dropped) = features.inner_join(&target)?.drop_non_finite();
            if dropped > 0 {
                debug!(pipeline = %loaded.pipeline.name, dropped, "Skipped non-finite samples");
            }
            if frame.is_empty() {
                return Err(TrainerError::EmptyFrame(loaded.pipeline.name.clone()));
            }

            let x = frame.to_matrix(&loaded.pipeline.feature_names())?;
            let y = Array1::from(frame.column(TARGET_COLUMN)?);
            for (name, model) in &loaded.models {
                let predicted = model.predict(x.view())?;
                scores.push(RangeScore {
                    pipeline: loaded.pipeline.name.clone(),
                    model: name.clone(),
                    samples: frame.len(),
                    metrics: ErrorMetrics::compute(y.view(), predicted.view()),
                });
            }
        }
        Ok(scores)
    }

    /// Predict with every model at `at` (defaults to now).
    pub async fn predict(&self, at: Option<DateTime<Utc>>) -> Result<Vec<Prediction>, TrainerError> {
        let at = at.unwrap_or_else(Utc::now);
        let target_frame = self.source.instant_query(at, &self.target_query()).await?;

        let mut predictions = Vec::new();
        for loaded in &self.pipelines {
            let features = self
                .source
                .instant_query(at, &loaded.pipeline.queries())
                .await?;
            let frame = features.inner_join(&target_frame)?;
            let last = frame
                .len()
                .checked_sub(1)
                .ok_or_else(|| TrainerError::EmptyFrame(loaded.pipeline.name.clone()))?;

            let names = loaded.pipeline.feature_names();
            let x = frame.to_matrix(&names)?;
            let row = x.slice(ndarray::s![last..=last, ..]);
            let target = frame.column(TARGET_COLUMN)?[last];
            let feature_values: Vec<(String, f64)> =
                names.iter().cloned().zip(row.row(0).iter().copied()).collect();

            for (name, model) in &loaded.models {
                let predicted = model.predict(row)?[0];
                let diff = target - predicted;
                let error_pct = ((diff / target).abs() * 100.0 * 100.0).round() / 100.0;
                predictions.push(Prediction {
                    pipeline: loaded.pipeline.name.clone(),
                    model: name.clone(),
                    features: feature_values.clone(),
                    target,
                    predicted,
                    diff,
                    error_pct,
                });
            }
        }
        debug!(count = predictions.len(), %at, "Predictions computed");
        Ok(predictions)
    }

    /// Predict from a caller-built feature table.
    ///
    /// `selector` is `pipeline` or `pipeline/model`; when empty the first
    /// pipeline whose features are all present in `frame` is used.
    pub fn estimate(&self, selector: Option<&str>, frame: &Frame) -> Result<Estimate, TrainerError> {
        let selector = selector.map(str::trim).filter(|s| !s.is_empty());
        let (pipeline_name, model_name) = match selector {
            Some(s) => match s.split_once('/') {
                Some((p, m)) => (Some(p), Some(m)),
                None => (Some(s), None),
            },
            None => (None, None),
        };

        let loaded = match pipeline_name {
            Some(name) => self
                .pipelines
                .iter()
                .find(|p| p.pipeline.name == name)
                .ok_or_else(|| TrainerError::UnknownPipeline(name.to_string()))?,
            None => self
                .pipelines
                .iter()
                .find(|p| p.pipeline.features.iter().all(|f| frame.has_column(&f.name)))
                .ok_or_else(|| TrainerError::NoMatchingPipeline(frame.columns().to_vec()))?,
        };

        let x = frame.to_matrix(&loaded.pipeline.feature_names())?;
        let mut models = Vec::new();
        for (name, model) in &loaded.models {
            if model_name.is_some_and(|wanted| wanted != name.as_str()) {
                continue;
            }
            models.push((name.clone(), model.predict(x.view())?.to_vec()));
        }
        if let (Some(wanted), true) = (model_name, models.is_empty()) {
            return Err(TrainerError::UnknownModel {
                pipeline: loaded.pipeline.name.clone(),
                model: wanted.to_string(),
            });
        }

        Ok(Estimate {
            pipeline: loaded.pipeline.name.clone(),
            models,
        })
    }
}
