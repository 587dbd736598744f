//! Median imputation for models that cannot take missing values.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::math::median;
use crate::models::matrix::FeatureMatrix;

/// Per-column medians learned on the training split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedianImputer {
    pub medians: Vec<f64>,
}

impl MedianImputer {
    /// Learn medians from non-missing training values. A column with no
    /// observed value at all imputes 0.
    pub fn fit(x: &FeatureMatrix, names: &[String]) -> Self {
        let medians = (0..x.n_cols())
            .map(|j| {
                median(x.column(j)).unwrap_or_else(|| {
                    warn!(
                        "feature {} has no observed training value; imputing 0",
                        names.get(j).map(String::as_str).unwrap_or("?")
                    );
                    0.0
                })
            })
            .collect();
        Self { medians }
    }

    pub fn apply(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(&self.medians)
            .map(|(&v, &m)| if v.is_nan() { m } else { v })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_missing_with_training_median() {
        let rows: Vec<Vec<Option<f64>>> = vec![
            vec![Some(1.0), None],
            vec![Some(5.0), None],
            vec![Some(3.0), None],
        ];
        let x = FeatureMatrix::from_rows(2, rows.iter().map(Vec::as_slice));
        let imputer = MedianImputer::fit(&x, &["a".into(), "b".into()]);
        assert_eq!(imputer.medians, vec![3.0, 0.0]);
        assert_eq!(imputer.apply(&[f64::NAN, 7.0]), vec![3.0, 7.0]);
    }
}
