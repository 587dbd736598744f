//! Model-agnostic Shapley attribution by permutation sampling.
//!
//! Used for scorers without native contributions. Each sample is explained
//! against a fixed background set: for every background row `b` a random
//! feature order is walked, switching features from `b` to `x` one at a time
//! and crediting each switch with the change in raw score. Summed over one
//! walk the credits telescope to `f(x) - f(b)`, so with every background row
//! used equally often the result is exactly additive around
//! `mean f(background)`.

use rand::prelude::*;
use rand::rngs::StdRng;

use crate::models::{Contributions, FeatureMatrix, Scorer};

/// A seeded, fixed subset of training rows.
#[derive(Debug, Clone)]
pub struct Background {
    rows: Vec<Vec<f64>>,
    baseline: f64,
}

impl Background {
    pub fn sample(model: &dyn Scorer, train: &FeatureMatrix, size: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let size = size.min(train.n_rows());
        let mut picked = rand::seq::index::sample(&mut rng, train.n_rows(), size).into_vec();
        picked.sort_unstable();
        let rows: Vec<Vec<f64>> = picked.into_iter().map(|i| train.row(i).to_vec()).collect();
        let baseline = if rows.is_empty() {
            0.0
        } else {
            rows.iter().map(|r| model.raw_score(r)).sum::<f64>() / rows.len() as f64
        };
        Self { rows, baseline }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn baseline(&self) -> f64 {
        self.baseline
    }
}

/// Permutation Shapley values of `x`.
///
/// Each background row is paired with `ceil(permutations / |background|)`
/// random orders (at least one). `seed` should differ per explained sample.
pub fn permutation_shapley(
    model: &dyn Scorer,
    x: &[f64],
    background: &Background,
    permutations: usize,
    seed: u64,
) -> Contributions {
    let m = x.len();
    let mut values = vec![0.0; m];
    if background.is_empty() {
        return Contributions {
            baseline: model.raw_score(x),
            values,
        };
    }

    let reps = permutations.div_ceil(background.len()).max(1);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut order: Vec<usize> = (0..m).collect();
    let mut walks = 0usize;

    for b in &background.rows {
        for _ in 0..reps {
            order.shuffle(&mut rng);
            let mut z = b.clone();
            let mut prev = model.raw_score(&z);
            for &j in &order {
                z[j] = x[j];
                let next = model.raw_score(&z);
                values[j] += next - prev;
                prev = next;
            }
            walks += 1;
        }
    }
    for v in &mut values {
        *v /= walks as f64;
    }
    Contributions {
        baseline: background.baseline(),
        values,
    }
}
