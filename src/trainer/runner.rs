//! Training orchestration.
//!
//! The target series is queried once for the whole window; every pipeline then
//! queries its own features, joins them with the target on timestamp and fits
//! each configured model on a shuffled split, scoring it on the held-out rows.

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::config::{ModelEntry, Pipeline, PipelineConfig, TARGET_COLUMN};
use crate::datasource::{Frame, MetricSource};
use crate::model::metrics::ErrorMetrics;
use crate::model::split::train_test_split;
use crate::model::{ModelPipeline, Regressor};
use crate::trainer::report::training_table;
use crate::trainer::store::ModelStore;
use crate::trainer::TrainerError;

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub pipeline: String,
    /// Joined rows available for training and testing.
    pub samples: usize,
    /// Held-out errors, in configuration order.
    pub models: Vec<(String, ErrorMetrics)>,
}

#[derive(Debug, Clone, Default)]
pub struct TrainingReport {
    pub pipelines: Vec<PipelineReport>,
}

/// Train every model of every pipeline and write the artifacts.
pub async fn train(
    config: &PipelineConfig,
    source: &dyn MetricSource,
) -> Result<TrainingReport, TrainerError> {
    let train = &config.train;
    let store = ModelStore::new(&train.path);
    let mut rng = match train.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let target_query = vec![(TARGET_COLUMN.to_string(), train.target.clone())];
    let target = source
        .range_query(train.start_at, train.end_at, &train.step, &target_query)
        .await?;
    info!(rows = target.len(), "Target series loaded");

    let mut report = TrainingReport::default();
    for pipeline in &train.pipelines {
        let features = source
            .range_query(train.start_at, train.end_at, &train.step, &pipeline.queries())
            .await?;
        let frame = features.inner_join(&target)?;
        info!(
            pipeline = %pipeline.name,
            feature_rows = features.len(),
            joined_rows = frame.len(),
            "Training frame assembled"
        );

        let pipeline_report = fit_pipeline(
            pipeline,
            &frame,
            &train.models,
            &store,
            train.test_size,
            &mut rng,
        )?;
        println!("{}", training_table(&pipeline_report));
        report.pipelines.push(pipeline_report);
    }

    Ok(report)
}

/// Fit and persist every model for one pipeline from an already joined frame.
pub fn fit_pipeline<R: Rng + ?Sized>(
    pipeline: &Pipeline,
    frame: &Frame,
    models: &[ModelEntry],
    store: &ModelStore,
    test_size: f64,
    rng: &mut R,
) -> Result<PipelineReport, TrainerError> {
    let (frame, dropped) = frame.drop_non_finite();
    if dropped > 0 {
        warn!(pipeline = %pipeline.name, dropped, "Dropped samples with NaN or infinite values");
    }
    if frame.is_empty() {
        return Err(TrainerError::EmptyFrame(pipeline.name.clone()));
    }
    store.save_inputs(&pipeline.name, &frame)?;

    let x = frame.to_matrix(&pipeline.feature_names())?;
    let y = Array1::from(frame.column(TARGET_COLUMN)?);

    let mut errors = Vec::with_capacity(models.len());
    for entry in models {
        let mut model = ModelPipeline::for_model(&entry.name, &entry.params)?;
        let split = train_test_split(x.view(), y.view(), test_size, rng)?;

        model.fit(split.x_train.view(), split.y_train.view())?;
        let predicted = model.predict(split.x_test.view())?;
        let metrics = ErrorMetrics::compute(split.y_test.view(), predicted.view());

        let path = store.save_model(&pipeline.name, &entry.name, &model)?;
        store.save_model_error(&pipeline.name, &entry.name, &metrics)?;
        info!(
            pipeline = %pipeline.name,
            model = %entry.name,
            train_rows = split.y_train.len(),
            test_rows = split.y_test.len(),
            mape = metrics.mape,
            path = %path.display(),
            "Model trained"
        );
        errors.push((entry.name.clone(), metrics));
    }

    store.save_errors(&pipeline.name, &errors)?;

    Ok(PipelineReport {
        pipeline: pipeline.name.clone(),
        samples: frame.len(),
        models: errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Feature;
    use rand::rngs::StdRng;
    use serde_json::Value;

    fn pipeline() -> Pipeline {
        Pipeline {
            name: "util".to_string(),
            features: vec![Feature {
                name: "cpu_util".to_string(),
                query: "cpu_util".to_string(),
            }],
        }
    }

    #[test]
    fn test_non_finite_rows_are_dropped_before_fitting() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let mut rows: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, 2.0 * i as f64 + 1.0]).collect();
        rows[3][0] = f64::NAN;
        rows[7][1] = f64::INFINITY;
        let frame = Frame::from_rows(vec!["cpu_util".to_string(), TARGET_COLUMN.to_string()], rows).unwrap();
        let models = vec![ModelEntry {
            name: "linear".to_string(),
            params: Value::Null,
        }];

        let report = fit_pipeline(
            &pipeline(),
            &frame,
            &models,
            &store,
            0.2,
            &mut StdRng::seed_from_u64(1),
        )
        .unwrap();
        assert_eq!(report.samples, 18);

        let model = store.load_model("util", "linear").unwrap();
        let predicted = model.predict(ndarray::array![[10.0]].view()).unwrap();
        assert!((predicted[0] - 21.0).abs() < 1e-9);

        let csv = std::fs::read_to_string(store.inputs_path("util")).unwrap();
        assert!(!csv.contains("NaN") && !csv.contains("inf"));
    }

    #[test]
    fn test_all_non_finite_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let frame = Frame::from_rows(
            vec!["cpu_util".to_string(), TARGET_COLUMN.to_string()],
            vec![vec![f64::NAN, 1.0], vec![2.0, f64::NAN]],
        )
        .unwrap();
        let models = vec![ModelEntry {
            name: "linear".to_string(),
            params: Value::Null,
        }];

        let err = fit_pipeline(&pipeline(), &frame, &models, &store, 0.2, &mut StdRng::seed_from_u64(1))
            .unwrap_err();
        assert!(matches!(err, TrainerError::EmptyFrame(name) if name == "util"));
    }
}
