//! Shuffled train/test split.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::model::{check_lengths, ModelError};

#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    pub x_train: Array2<f64>,
    pub x_test: Array2<f64>,
    pub y_train: Array1<f64>,
    pub y_test: Array1<f64>,
}

/// Shuffle rows and hold out `ceil(n * test_size)` of them for testing.
///
/// Both sides always get at least one row, so at least two samples are
/// required.
pub fn train_test_split<R: Rng + ?Sized>(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    test_size: f64,
    rng: &mut R,
) -> Result<TrainTestSplit, ModelError> {
    check_lengths(x, y)?;
    let n = y.len();
    if n < 2 {
        return Err(ModelError::InsufficientData { needed: 2, got: n });
    }

    let n_test = ((n as f64 * test_size).ceil() as usize).clamp(1, n - 1);

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    let (test, train) = order.split_at(n_test);

    Ok(TrainTestSplit {
        x_train: x.select(Axis(0), train),
        x_test: x.select(Axis(0), test),
        y_train: y.select(Axis(0), train),
        y_test: y.select(Axis(0), test),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_split_sizes() {
        let x = Array2::from_shape_fn((10, 2), |(r, c)| (r * 10 + c) as f64);
        let y = Array1::from_shape_fn(10, |r| r as f64);
        let mut rng = StdRng::seed_from_u64(7);
        let split = train_test_split(x.view(), y.view(), 0.2, &mut rng).unwrap();
        assert_eq!(split.x_test.nrows(), 2);
        assert_eq!(split.x_train.nrows(), 8);
        assert_eq!(split.y_train.len(), 8);

        // Rows stay aligned with their targets.
        for (row, target) in split.x_train.rows().into_iter().zip(split.y_train.iter()) {
            assert_eq!(row[0], target * 10.0);
        }
    }

    #[test]
    fn test_needs_two_rows() {
        let x = Array2::zeros((1, 1));
        let y = Array1::zeros(1);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(train_test_split(x.view(), y.view(), 0.2, &mut rng).is_err());
    }
}
