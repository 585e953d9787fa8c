//! Column standardization.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::model::ModelError;

/// Centers each column on its mean and divides by its population standard
/// deviation. Constant columns keep a scale of 1.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Option<Array1<f64>>,
    scale: Option<Array1<f64>>,
}

impl StandardScaler {
    pub fn fit(&mut self, x: ArrayView2<f64>) -> Result<(), ModelError> {
        let mean = x
            .mean_axis(Axis(0))
            .ok_or(ModelError::InsufficientData { needed: 1, got: 0 })?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s.is_finite() && s > f64::EPSILON { s } else { 1.0 });
        self.mean = Some(mean);
        self.scale = Some(scale);
        Ok(())
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, ModelError> {
        let (mean, scale) = match (&self.mean, &self.scale) {
            (Some(mean), Some(scale)) => (mean, scale),
            _ => return Err(ModelError::NotFitted),
        };
        if x.ncols() != mean.len() {
            return Err(ModelError::FeatureMismatch {
                expected: mean.len(),
                got: x.ncols(),
            });
        }
        Ok((&x - mean) / scale)
    }

    pub fn n_features(&self) -> Option<usize> {
        self.mean.as_ref().map(|m| m.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_standardizes_columns() {
        let x = array![[1.0, 5.0], [3.0, 5.0]];
        let mut scaler = StandardScaler::default();
        scaler.fit(x.view()).unwrap();
        let t = scaler.transform(x.view()).unwrap();
        assert_eq!(t, array![[-1.0, 0.0], [1.0, 0.0]]);
    }

    #[test]
    fn test_width_checked() {
        let mut scaler = StandardScaler::default();
        scaler.fit(array![[1.0, 2.0]].view()).unwrap();
        assert!(matches!(
            scaler.transform(array![[1.0]].view()),
            Err(ModelError::FeatureMismatch { expected: 2, got: 1 })
        ));
    }
}
