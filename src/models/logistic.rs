//! L2-penalized logistic regression fitted by Newton / IRLS.
//!
//! Features are median-imputed and standardized with training statistics,
//! so the penalty treats every column on the same scale. The intercept is
//! not penalized. Attributions are exact: in standardized space the model
//! is linear and training means are zero, so `φ_j = w_j z_j` and the
//! baseline is the intercept.

use std::collections::BTreeMap;

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::domain::LogisticParams;
use crate::error::PipelineError;
use crate::math::{logit, mean_std, sigmoid, solve_symmetric};
use crate::models::impute::MedianImputer;
use crate::models::matrix::FeatureMatrix;
use crate::models::{Contributions, Scorer};

const MIN_STD: f64 = 1e-12;

/// Per-feature coefficients as written to `logistic_coefficients.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientTable {
    /// Intercept on the standardized scale (the score at the training means).
    pub intercept: f64,
    /// Feature -> coefficient per standard deviation.
    pub coefficients: BTreeMap<String, f64>,
    pub raw_intercept: f64,
    /// Feature -> coefficient per raw unit.
    pub raw_coefficients: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub imputer: MedianImputer,
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
    /// Coefficients on standardized features.
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl LogisticModel {
    pub fn fit(
        x: &FeatureMatrix,
        y: &[u8],
        names: &[String],
        params: &LogisticParams,
    ) -> Result<Self, PipelineError> {
        if params.l2 < 0.0 || !params.l2.is_finite() {
            return Err(PipelineError::Config(format!(
                "logistic: l2 must be >= 0, got {}",
                params.l2
            )));
        }
        let n = x.n_rows();
        let p = x.n_cols();
        if n == 0 || n != y.len() {
            return Err(PipelineError::Computation(format!(
                "logistic: {n} feature rows vs {} labels",
                y.len()
            )));
        }

        let imputer = MedianImputer::fit(x, names);
        let imputed: Vec<Vec<f64>> = x.rows().map(|r| imputer.apply(r)).collect();

        let mut means = Vec::with_capacity(p);
        let mut stds = Vec::with_capacity(p);
        for j in 0..p {
            let col: Vec<f64> = imputed.iter().map(|r| r[j]).collect();
            let (m, s) = mean_std(&col);
            means.push(m);
            stds.push(if s > MIN_STD { s } else { 1.0 });
        }

        // Design matrix with a leading intercept column.
        let z = DMatrix::from_fn(n, p + 1, |i, j| {
            if j == 0 { 1.0 } else { (imputed[i][j - 1] - means[j - 1]) / stds[j - 1] }
        });
        let targets = DVector::from_iterator(n, y.iter().map(|&v| f64::from(v)));

        let positives = y.iter().filter(|&&v| v == 1).count();
        let weights: Vec<f64> = if params.balance_classes && positives > 0 && positives < n {
            let w_pos = n as f64 / (2.0 * positives as f64);
            let w_neg = n as f64 / (2.0 * (n - positives) as f64);
            y.iter().map(|&v| if v == 1 { w_pos } else { w_neg }).collect()
        } else {
            vec![1.0; n]
        };

        let w_total: f64 = weights.iter().sum();
        let w_pos: f64 = weights.iter().zip(y).filter(|(_, v)| **v == 1).map(|(w, _)| w).sum();
        let mut beta = DVector::zeros(p + 1);
        beta[0] = logit(w_pos / w_total);

        let mut penalty = DMatrix::identity(p + 1, p + 1) * params.l2;
        penalty[(0, 0)] = 0.0;

        let mut converged = false;
        let mut iterations = 0;
        while iterations < params.max_iter {
            iterations += 1;
            let eta = &z * &beta;
            let mut residual = DVector::zeros(n);
            let mut scaled = z.clone();
            for i in 0..n {
                let prob = sigmoid(eta[i]);
                residual[i] = weights[i] * (prob - targets[i]);
                let curvature = (weights[i] * prob * (1.0 - prob)).max(1e-12);
                for v in scaled.row_mut(i).iter_mut() {
                    *v *= curvature;
                }
            }
            let gradient = z.tr_mul(&residual) + &penalty * &beta;
            let hessian = z.tr_mul(&scaled) + &penalty;

            let step = solve_symmetric(&hessian, &gradient).ok_or_else(|| {
                PipelineError::Computation("logistic: Newton system could not be solved".into())
            })?;
            beta -= &step;

            let max_step = step.amax();
            debug!("logistic iteration {iterations}: max |step| {max_step:.3e}");
            if !beta.iter().all(|v| v.is_finite()) {
                return Err(PipelineError::Computation("logistic: coefficients diverged".into()));
            }
            if max_step < params.tolerance {
                converged = true;
                break;
            }
        }
        if !converged {
            warn!("logistic regression did not converge in {} iterations", params.max_iter);
        }

        Ok(Self {
            imputer,
            means,
            stds,
            coefficients: beta.iter().skip(1).copied().collect(),
            intercept: beta[0],
            iterations,
            converged,
        })
    }

    fn standardize(&self, x: &[f64]) -> Vec<f64> {
        self.imputer
            .apply(x)
            .iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }

    /// Coefficients mapped back to the raw feature scale, with the matching intercept.
    pub fn raw_scale_coefficients(&self) -> (f64, Vec<f64>) {
        let slopes: Vec<f64> =
            self.coefficients.iter().zip(&self.stds).map(|(w, s)| w / s).collect();
        let shift: f64 = slopes.iter().zip(&self.means).map(|(b, m)| b * m).sum();
        let intercept = self.intercept - shift;
        (intercept, slopes)
    }

    pub fn coefficient_table(&self, names: &[String]) -> CoefficientTable {
        let (raw_intercept, slopes) = self.raw_scale_coefficients();
        CoefficientTable {
            intercept: self.intercept,
            coefficients: names.iter().cloned().zip(self.coefficients.iter().copied()).collect(),
            raw_intercept,
            raw_coefficients: names.iter().cloned().zip(slopes).collect(),
        }
    }
}

impl Scorer for LogisticModel {
    fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    fn raw_score(&self, x: &[f64]) -> f64 {
        self.intercept
            + self
                .standardize(x)
                .iter()
                .zip(&self.coefficients)
                .map(|(z, w)| z * w)
                .sum::<f64>()
    }

    fn contributions(&self, x: &[f64]) -> Option<Contributions> {
        let values = self
            .standardize(x)
            .iter()
            .zip(&self.coefficients)
            .map(|(z, w)| z * w)
            .collect();
        Some(Contributions {
            baseline: self.intercept,
            values,
        })
    }
}
