//! Dense row-major feature matrix.
//!
//! `NaN` is the in-matrix missing-value marker. Tables carry `Option<f64>`;
//! conversion happens once when a split is materialized.

use crate::domain::LabeledRow;

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    n_rows: usize,
    n_cols: usize,
    values: Vec<f64>,
}

impl FeatureMatrix {
    pub fn new(n_cols: usize) -> Self {
        Self {
            n_rows: 0,
            n_cols,
            values: Vec::new(),
        }
    }

    pub fn from_rows<'a>(n_cols: usize, rows: impl IntoIterator<Item = &'a [Option<f64>]>) -> Self {
        let mut m = Self::new(n_cols);
        for row in rows {
            m.push_row(row);
        }
        m
    }

    pub fn from_labeled(n_cols: usize, rows: &[&LabeledRow]) -> Self {
        Self::from_rows(n_cols, rows.iter().map(|r| r.features.as_slice()))
    }

    /// Append a row, mapping `None` (and non-finite values) to `NaN`.
    ///
    /// # Panics
    /// Panics if the row width differs from the matrix width.
    pub fn push_row(&mut self, row: &[Option<f64>]) {
        assert_eq!(row.len(), self.n_cols, "feature row width mismatch");
        self.values.extend(
            row.iter()
                .map(|v| v.filter(|x| x.is_finite()).unwrap_or(f64::NAN)),
        );
        self.n_rows += 1;
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.n_cols..(i + 1) * self.n_cols]
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.n_cols + j]
    }

    pub fn column(&self, j: usize) -> impl Iterator<Item = f64> + '_ {
        (0..self.n_rows).map(move |i| self.get(i, j))
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.n_rows).map(move |i| self.row(i))
    }
}
