//! Ordinary least squares.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::model::{check_lengths, ModelError, Regressor};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinearParams {
    /// Fit an intercept term; when false the plane goes through the origin.
    pub fit_intercept: bool,
}

impl Default for LinearParams {
    fn default() -> Self {
        Self { fit_intercept: true }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinearRegression {
    params: LinearParams,
    coef: Option<Array1<f64>>,
    intercept: f64,
}

impl LinearRegression {
    pub fn new(params: LinearParams) -> Self {
        Self {
            params,
            coef: None,
            intercept: 0.0,
        }
    }

    pub fn coefficients(&self) -> Option<ArrayView1<'_, f64>> {
        self.coef.as_ref().map(|c| c.view())
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

impl Regressor for LinearRegression {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), ModelError> {
        check_lengths(x, y)?;

        let (x_offset, y_offset) = if self.params.fit_intercept {
            let x_mean = x
                .mean_axis(Axis(0))
                .ok_or(ModelError::InsufficientData { needed: 1, got: 0 })?;
            let y_mean = y.mean().unwrap_or(0.0);
            (x_mean, y_mean)
        } else {
            (Array1::zeros(x.ncols()), 0.0)
        };

        let xc = &x - &x_offset;
        let yc = y.mapv(|v| v - y_offset);

        let gram = xc.t().dot(&xc);
        let moment = xc.t().dot(&yc);
        let coef = solve_least_squares(gram, moment);

        self.intercept = y_offset - x_offset.dot(&coef);
        self.coef = Some(coef);
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        let coef = self.coef.as_ref().ok_or(ModelError::NotFitted)?;
        if x.ncols() != coef.len() {
            return Err(ModelError::FeatureMismatch {
                expected: coef.len(),
                got: x.ncols(),
            });
        }
        Ok(x.dot(coef) + self.intercept)
    }
}

/// Solve the normal equations `a · w = b` by Gauss-Jordan elimination with
/// partial pivoting.
///
/// Columns without a usable pivot are treated as free and get a zero weight,
/// so collinear or constant inputs still produce a fit.
fn solve_least_squares(mut a: Array2<f64>, mut b: Array1<f64>) -> Array1<f64> {
    let n = b.len();
    let magnitude = a.diag().iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let tolerance = magnitude.max(1.0) * 1e-10;

    let mut pivots = Vec::with_capacity(n);
    let mut row = 0;
    for col in 0..n {
        if row == n {
            break;
        }
        let (best, best_abs) = (row..n)
            .map(|r| (r, a[[r, col]].abs()))
            .fold((row, -1.0), |acc, cur| if cur.1 > acc.1 { cur } else { acc });
        if best_abs <= tolerance {
            continue;
        }

        if best != row {
            for c in 0..n {
                a.swap([best, c], [row, c]);
            }
            b.swap(best, row);
        }

        let pivot = a[[row, col]];
        for r in 0..n {
            if r == row {
                continue;
            }
            let factor = a[[r, col]] / pivot;
            if factor == 0.0 {
                continue;
            }
            for c in col..n {
                let delta = factor * a[[row, c]];
                a[[r, c]] -= delta;
            }
            let delta = factor * b[row];
            b[r] -= delta;
        }

        pivots.push((row, col));
        row += 1;
    }

    let mut w = Array1::zeros(n);
    for (r, c) in pivots {
        w[c] = b[r] / a[[r, c]];
    }
    w
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_recovers_coefficients() {
        let x = array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0], [2.0, 1.0], [3.0, 5.0]];
        let y = x.column(0).mapv(|v| 3.0 * v) - x.column(1).mapv(|v| 2.0 * v) + 7.0;
        let mut model = LinearRegression::default();
        model.fit(x.view(), y.view()).unwrap();
        let coef = model.coefficients().unwrap();
        assert!((coef[0] - 3.0).abs() < 1e-9);
        assert!((coef[1] + 2.0).abs() < 1e-9);
        assert!((model.intercept() - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_collinear_columns_do_not_fail() {
        let x = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0], [4.0, 8.0]];
        let y = array![2.0, 4.0, 6.0, 8.0];
        let mut model = LinearRegression::default();
        model.fit(x.view(), y.view()).unwrap();
        let pred = model.predict(x.view()).unwrap();
        for (p, t) in pred.iter().zip(y.iter()) {
            assert!((p - t).abs() < 1e-9);
        }
    }

    #[test]
    fn test_without_intercept() {
        let x = array![[1.0], [2.0], [4.0]];
        let y = array![2.0, 4.0, 8.0];
        let mut model = LinearRegression::new(LinearParams { fit_intercept: false });
        model.fit(x.view(), y.view()).unwrap();
        assert_eq!(model.intercept(), 0.0);
        assert!((model.coefficients().unwrap()[0] - 2.0).abs() < 1e-12);
    }
}
