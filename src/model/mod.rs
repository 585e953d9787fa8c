//! Regression models.
//!
//! - [`scaler`]: per-column standardization applied ahead of every estimator
//! - [`linear`]: ordinary least squares
//! - [`polynomial`]: polynomial feature expansion
//! - [`boosting`]: gradient-boosted regression trees (`xgboost` in pipeline files)
//! - [`metrics`]: MAE / MSE / MAPE / R² scoring
//! - [`split`]: shuffled train/test split

pub mod boosting;
pub mod linear;
pub mod metrics;
pub mod polynomial;
pub mod scaler;
pub mod split;

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use boosting::{BoostingParams, GradientBoostedTrees};
use linear::{LinearParams, LinearRegression};
use polynomial::{PolynomialFeatures, PolynomialParams};
use scaler::StandardScaler;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid model name: {0}")]
    UnknownModel(String),

    #[error("invalid parameters for {model}: {reason}")]
    InvalidParams { model: String, reason: String },

    #[error("model used before fit")]
    NotFitted,

    #[error("expected {expected} features, got {got}")]
    FeatureMismatch { expected: usize, got: usize },

    #[error("{x_rows} feature rows but {y_rows} targets")]
    LengthMismatch { x_rows: usize, y_rows: usize },

    #[error("need at least {needed} samples, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("input contains NaN or infinite values")]
    NonFiniteInput,
}

/// Common interface of every fitted stage.
pub trait Regressor {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), ModelError>;

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, ModelError>;
}

/// Supported model names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Linear,
    Polynomial,
    Xgboost,
}

impl std::str::FromStr for ModelKind {
    type Err = ModelError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "linear" => Ok(ModelKind::Linear),
            "polynomial" => Ok(ModelKind::Polynomial),
            "xgboost" => Ok(ModelKind::Xgboost),
            other => Err(ModelError::UnknownModel(other.to_string())),
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::Linear => write!(f, "linear"),
            ModelKind::Polynomial => write!(f, "polynomial"),
            ModelKind::Xgboost => write!(f, "xgboost"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Estimator {
    Linear(LinearRegression),
    Polynomial {
        features: PolynomialFeatures,
        linear: LinearRegression,
    },
    Xgboost(GradientBoostedTrees),
}

/// A scaler followed by one estimator: the unit that is trained, persisted
/// and served.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPipeline {
    kind: ModelKind,
    scaler: StandardScaler,
    estimator: Estimator,
}

impl ModelPipeline {
    /// Build an unfitted pipeline for a configured model name.
    ///
    /// `params` is the raw parameter mapping from the pipeline file; `null`
    /// selects the defaults.
    pub fn for_model(name: &str, params: &Value) -> Result<Self, ModelError> {
        let kind: ModelKind = name.parse()?;
        let estimator = match kind {
            ModelKind::Linear => {
                Estimator::Linear(LinearRegression::new(parse_params::<LinearParams>(name, params)?))
            }
            ModelKind::Polynomial => Estimator::Polynomial {
                features: PolynomialFeatures::new(parse_params::<PolynomialParams>(name, params)?),
                linear: LinearRegression::default(),
            },
            ModelKind::Xgboost => Estimator::Xgboost(GradientBoostedTrees::new(
                parse_params::<BoostingParams>(name, params)?,
            )),
        };
        Ok(Self {
            kind,
            scaler: StandardScaler::default(),
            estimator,
        })
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    /// Number of input columns the fitted pipeline expects.
    pub fn n_features(&self) -> Option<usize> {
        self.scaler.n_features()
    }
}

impl Regressor for ModelPipeline {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), ModelError> {
        check_lengths(x, y)?;
        self.scaler.fit(x)?;
        let scaled = self.scaler.transform(x)?;
        match &mut self.estimator {
            Estimator::Linear(model) => model.fit(scaled.view(), y),
            Estimator::Polynomial { features, linear } => {
                features.fit(scaled.view())?;
                let expanded = features.transform(scaled.view())?;
                linear.fit(expanded.view(), y)
            }
            Estimator::Xgboost(model) => model.fit(scaled.view(), y),
        }
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        let scaled = self.scaler.transform(x)?;
        match &self.estimator {
            Estimator::Linear(model) => model.predict(scaled.view()),
            Estimator::Polynomial { features, linear } => {
                let expanded = features.transform(scaled.view())?;
                linear.predict(expanded.view())
            }
            Estimator::Xgboost(model) => model.predict(scaled.view()),
        }
    }
}

fn parse_params<T>(model: &str, params: &Value) -> Result<T, ModelError>
where
    T: DeserializeOwned + Default,
{
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone()).map_err(|e| ModelError::InvalidParams {
        model: model.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn check_lengths(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), ModelError> {
    if x.nrows() != y.len() {
        return Err(ModelError::LengthMismatch {
            x_rows: x.nrows(),
            y_rows: y.len(),
        });
    }
    if x.nrows() == 0 {
        return Err(ModelError::InsufficientData { needed: 1, got: 0 });
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(ModelError::NonFiniteInput);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn line_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((40, 2), |(r, c)| (r as f64) * (c as f64 + 1.0) + (r % 3) as f64);
        let y = x.column(0).mapv(|v| 2.0 * v) + &x.column(1).mapv(|v| 0.5 * v) + 3.0;
        (x, y)
    }

    #[test]
    fn test_unknown_model_rejected() {
        let err = ModelPipeline::for_model("logistic", &Value::Null).unwrap_err();
        assert!(matches!(err, ModelError::UnknownModel(name) if name == "logistic"));
    }

    #[test]
    fn test_unknown_param_rejected() {
        let err = ModelPipeline::for_model("linear", &serde_json::json!({"alpha": 1})).unwrap_err();
        assert!(matches!(err, ModelError::InvalidParams { .. }));
    }

    #[test]
    fn test_every_kind_fits_a_plane() {
        let (x, y) = line_data();
        for name in ["linear", "polynomial", "xgboost"] {
            let mut model = ModelPipeline::for_model(name, &Value::Null).unwrap();
            model.fit(x.view(), y.view()).unwrap();
            let pred = model.predict(x.view()).unwrap();
            let mae = metrics::ErrorMetrics::compute(y.view(), pred.view()).mae;
            assert!(mae < 1.0, "{name}: mae {mae}");
            assert_eq!(model.n_features(), Some(2));
        }
    }

    #[test]
    fn test_nan_input_rejected() {
        let x = array![[1.0], [2.0], [f64::NAN], [4.0]];
        let y = array![2.0, 4.0, 6.0, 8.0];
        for name in ["linear", "polynomial", "xgboost"] {
            let mut model = ModelPipeline::for_model(name, &Value::Null).unwrap();
            assert!(
                matches!(model.fit(x.view(), y.view()), Err(ModelError::NonFiniteInput)),
                "{name}"
            );
        }
    }

    #[test]
    fn test_predict_before_fit() {
        let model = ModelPipeline::for_model("linear", &Value::Null).unwrap();
        let x = array![[1.0, 2.0]];
        assert!(matches!(model.predict(x.view()), Err(ModelError::NotFitted)));
    }

    #[test]
    fn test_pipeline_survives_json() {
        let (x, y) = line_data();
        let mut model = ModelPipeline::for_model("polynomial", &serde_json::json!({"degree": 2})).unwrap();
        model.fit(x.view(), y.view()).unwrap();
        let restored: ModelPipeline = serde_json::from_str(&serde_json::to_string(&model).unwrap()).unwrap();
        assert_eq!(restored.kind(), ModelKind::Polynomial);
        let before = model.predict(x.view()).unwrap();
        let after = restored.predict(x.view()).unwrap();
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }
}
