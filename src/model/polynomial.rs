//! Polynomial feature expansion.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::model::ModelError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolynomialParams {
    pub degree: usize,
    /// Only products of distinct features (no powers).
    pub interaction_only: bool,
    /// Emit the constant column.
    pub include_bias: bool,
}

impl Default for PolynomialParams {
    fn default() -> Self {
        Self {
            degree: 2,
            interaction_only: false,
            include_bias: true,
        }
    }
}

/// Generates every monomial of the inputs up to `degree`.
///
/// Terms are ordered by degree, then lexicographically by the column indices
/// they multiply: `1, a, b, a², ab, b²` for two inputs at degree 2.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolynomialFeatures {
    params: PolynomialParams,
    n_inputs: Option<usize>,
    terms: Vec<Vec<usize>>,
}

impl PolynomialFeatures {
    pub fn new(params: PolynomialParams) -> Self {
        Self {
            params,
            n_inputs: None,
            terms: Vec::new(),
        }
    }

    pub fn fit(&mut self, x: ArrayView2<f64>) -> Result<(), ModelError> {
        let n = x.ncols();
        let start = if self.params.include_bias { 0 } else { 1 };
        let mut terms = Vec::new();
        for degree in start..=self.params.degree {
            let mut current = Vec::with_capacity(degree);
            push_combinations(n, degree, 0, self.params.interaction_only, &mut current, &mut terms);
        }
        if terms.is_empty() {
            return Err(ModelError::InvalidParams {
                model: "polynomial".to_string(),
                reason: "no output features for this degree".to_string(),
            });
        }
        self.n_inputs = Some(n);
        self.terms = terms;
        Ok(())
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, ModelError> {
        let n = self.n_inputs.ok_or(ModelError::NotFitted)?;
        if x.ncols() != n {
            return Err(ModelError::FeatureMismatch {
                expected: n,
                got: x.ncols(),
            });
        }
        Ok(Array2::from_shape_fn((x.nrows(), self.terms.len()), |(r, t)| {
            self.terms[t].iter().map(|&c| x[[r, c]]).product::<f64>()
        }))
    }

    pub fn n_output_features(&self) -> usize {
        self.terms.len()
    }
}

fn push_combinations(
    n: usize,
    remaining: usize,
    from: usize,
    distinct: bool,
    current: &mut Vec<usize>,
    out: &mut Vec<Vec<usize>>,
) {
    if remaining == 0 {
        out.push(current.clone());
        return;
    }
    for col in from..n {
        current.push(col);
        let next = if distinct { col + 1 } else { col };
        push_combinations(n, remaining - 1, next, distinct, current, out);
        current.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_degree_two_terms() {
        let mut poly = PolynomialFeatures::new(PolynomialParams::default());
        let x = array![[2.0, 3.0]];
        poly.fit(x.view()).unwrap();
        let t = poly.transform(x.view()).unwrap();
        assert_eq!(t, array![[1.0, 2.0, 3.0, 4.0, 6.0, 9.0]]);
    }

    #[test]
    fn test_interaction_only_without_bias() {
        let mut poly = PolynomialFeatures::new(PolynomialParams {
            degree: 2,
            interaction_only: true,
            include_bias: false,
        });
        let x = array![[2.0, 3.0, 5.0]];
        poly.fit(x.view()).unwrap();
        let t = poly.transform(x.view()).unwrap();
        assert_eq!(t, array![[2.0, 3.0, 5.0, 6.0, 10.0, 15.0]]);
        assert_eq!(poly.n_output_features(), 6);
    }
}
