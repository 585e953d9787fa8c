//! Regression error metrics.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// Below this many samples R² is reported as 0.
const MIN_SAMPLES_FOR_R2: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub mae: f64,
    pub mse: f64,
    /// Mean absolute percentage error, in percent.
    pub mape: f64,
    pub r2: f64,
}

impl ErrorMetrics {
    pub fn compute(y_true: ArrayView1<f64>, y_pred: ArrayView1<f64>) -> Self {
        let n = y_true.len().min(y_pred.len());
        if n == 0 {
            return Self::default();
        }

        let pairs = || y_true.iter().zip(y_pred.iter()).take(n);
        let count = n as f64;

        let mae = pairs().map(|(t, p)| (t - p).abs()).sum::<f64>() / count;
        let sse = pairs().map(|(t, p)| (t - p).powi(2)).sum::<f64>();
        let mse = sse / count;

        // Zero targets have no defined relative error and are skipped.
        let relative: Vec<f64> = pairs()
            .filter(|(t, _)| **t != 0.0)
            .map(|(t, p)| ((t - p) / t).abs())
            .collect();
        let mape = if relative.is_empty() {
            0.0
        } else {
            relative.iter().sum::<f64>() / relative.len() as f64 * 100.0
        };

        let r2 = if n >= MIN_SAMPLES_FOR_R2 {
            let mean = pairs().map(|(t, _)| t).sum::<f64>() / count;
            let sst = pairs().map(|(t, _)| (t - mean).powi(2)).sum::<f64>();
            if sst == 0.0 {
                if sse == 0.0 {
                    1.0
                } else {
                    0.0
                }
            } else {
                1.0 - sse / sst
            }
        } else {
            0.0
        };

        Self { mae, mse, mape, r2 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_metrics() {
        let t = array![10.0, 20.0, 30.0, 40.0, 50.0, 60.0];
        let p = array![11.0, 19.0, 30.0, 40.0, 50.0, 60.0];
        let m = ErrorMetrics::compute(t.view(), p.view());
        assert!((m.mae - 2.0 / 6.0).abs() < 1e-12);
        assert!((m.mse - 2.0 / 6.0).abs() < 1e-12);
        assert!((m.mape - (0.1 + 0.05) / 6.0 * 100.0).abs() < 1e-9);
        assert!(m.r2 > 0.99);
    }

    #[test]
    fn test_small_sample_has_no_r2() {
        let t = array![1.0, 2.0, 3.0];
        let m = ErrorMetrics::compute(t.view(), t.view());
        assert_eq!(m.r2, 0.0);
        assert_eq!(m.mae, 0.0);
    }

    #[test]
    fn test_zero_targets_skipped_in_mape() {
        let t = array![0.0, 10.0];
        let p = array![5.0, 5.0];
        let m = ErrorMetrics::compute(t.view(), p.view());
        assert!((m.mape - 50.0).abs() < 1e-12);
    }
}
