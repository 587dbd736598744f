//! Ranking and classification metrics.
//!
//! All functions take scores aligned with 0/1 labels. Scores only need to be
//! monotone in the predicted risk; raw log-odds and probabilities give the
//! same AUC, KS and ROC.

use serde::{Deserialize, Serialize};

fn class_counts(labels: &[u8]) -> (usize, usize) {
    let pos = labels.iter().filter(|&&y| y == 1).count();
    (pos, labels.len() - pos)
}

/// Indices sorted by ascending score.
fn ascending(scores: &[f64]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..scores.len()).collect();
    idx.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
    idx
}

/// Area under the ROC curve via the Mann–Whitney rank statistic.
///
/// Tied scores receive their average rank. Returns `None` when either class
/// is absent.
pub fn auc(scores: &[f64], labels: &[u8]) -> Option<f64> {
    let (n_pos, n_neg) = class_counts(labels);
    if n_pos == 0 || n_neg == 0 {
        return None;
    }
    let order = ascending(scores);
    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; the tie group spans ranks i+1..=j+1.
        let avg_rank = (i + j + 2) as f64 / 2.0;
        rank_sum_pos += avg_rank * order[i..=j].iter().filter(|&&k| labels[k] == 1).count() as f64;
        i = j + 1;
    }
    let n_pos_f = n_pos as f64;
    Some((rank_sum_pos - n_pos_f * (n_pos_f + 1.0) / 2.0) / (n_pos_f * n_neg as f64))
}

/// Kolmogorov–Smirnov statistic: max |F_pos(s) - F_neg(s)| over thresholds.
pub fn ks_statistic(scores: &[f64], labels: &[u8]) -> Option<f64> {
    let (n_pos, n_neg) = class_counts(labels);
    if n_pos == 0 || n_neg == 0 {
        return None;
    }
    let order = ascending(scores);
    let (mut cum_pos, mut cum_neg) = (0usize, 0usize);
    let mut best: f64 = 0.0;
    for (pos, &k) in order.iter().enumerate() {
        if labels[k] == 1 {
            cum_pos += 1;
        } else {
            cum_neg += 1;
        }
        let group_ends = order.get(pos + 1).is_none_or(|&next| scores[next] != scores[k]);
        if group_ends {
            let gap = (cum_pos as f64 / n_pos as f64 - cum_neg as f64 / n_neg as f64).abs();
            best = best.max(gap);
        }
    }
    Some(best)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RocPoint {
    /// Rows scoring at or above this value are predicted positive.
    pub threshold: f64,
    pub fpr: f64,
    pub tpr: f64,
}

/// ROC curve from `(0, 0)` to `(1, 1)`, one point per distinct score.
pub fn roc_curve(scores: &[f64], labels: &[u8]) -> Vec<RocPoint> {
    let (n_pos, n_neg) = class_counts(labels);
    if n_pos == 0 || n_neg == 0 {
        return Vec::new();
    }
    let mut order = ascending(scores);
    order.reverse();

    let mut points = vec![RocPoint {
        threshold: f64::INFINITY,
        fpr: 0.0,
        tpr: 0.0,
    }];
    let (mut tp, mut fp) = (0usize, 0usize);
    for (pos, &k) in order.iter().enumerate() {
        if labels[k] == 1 {
            tp += 1;
        } else {
            fp += 1;
        }
        if order.get(pos + 1).is_none_or(|&next| scores[next] != scores[k]) {
            points.push(RocPoint {
                threshold: scores[k],
                fpr: fp as f64 / n_neg as f64,
                tpr: tp as f64 / n_pos as f64,
            });
        }
    }
    points
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl ConfusionMatrix {
    /// Count outcomes with "positive" meaning `probability >= threshold`.
    pub fn at_threshold(probabilities: &[f64], labels: &[u8], threshold: f64) -> Self {
        let mut m = Self::default();
        for (&p, &y) in probabilities.iter().zip(labels) {
            match (p >= threshold, y == 1) {
                (true, true) => m.true_positive += 1,
                (true, false) => m.false_positive += 1,
                (false, false) => m.true_negative += 1,
                (false, true) => m.false_negative += 1,
            }
        }
        m
    }

    pub fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }

    pub fn accuracy(&self) -> Option<f64> {
        ratio(self.true_positive + self.true_negative, self.total())
    }

    pub fn precision(&self) -> Option<f64> {
        ratio(self.true_positive, self.true_positive + self.false_positive)
    }

    pub fn recall(&self) -> Option<f64> {
        ratio(self.true_positive, self.true_positive + self.false_negative)
    }
}

fn ratio(num: usize, den: usize) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auc_counts_ties_as_half() {
        assert_eq!(auc(&[0.1, 0.4, 0.35, 0.8], &[0, 0, 1, 1]), Some(0.75));
        assert_eq!(auc(&[0.5, 0.5, 0.5, 0.5], &[0, 1, 0, 1]), Some(0.5));
        assert_eq!(auc(&[0.1, 0.9], &[0, 1]), Some(1.0));
        assert_eq!(auc(&[0.1, 0.9], &[1, 1]), None);
    }

    #[test]
    fn auc_matches_pairwise_definition() {
        let scores = [0.3, 0.3, 0.7, 0.1, 0.9, 0.7, 0.2];
        let labels = [1, 0, 1, 0, 1, 0, 0];
        let mut wins = 0.0;
        let mut pairs = 0.0;
        for i in 0..scores.len() {
            for j in 0..scores.len() {
                if labels[i] == 1 && labels[j] == 0 {
                    pairs += 1.0;
                    if scores[i] > scores[j] {
                        wins += 1.0;
                    } else if scores[i] == scores[j] {
                        wins += 0.5;
                    }
                }
            }
        }
        let got = auc(&scores, &labels).unwrap();
        assert!((got - wins / pairs).abs() < 1e-12);
    }

    #[test]
    fn auc_and_ks_ignore_monotonic_rescaling() {
        let scores = [0.3, 0.3, 0.7, 0.1, 0.9, 0.7, 0.2, -0.4];
        let labels = [1, 0, 1, 0, 1, 0, 0, 1];
        let rescaled: Vec<f64> = scores.iter().map(|v| (3.0_f64 * v).exp() + 5.0).collect();
        let (a, b) = (auc(&scores, &labels).unwrap(), auc(&rescaled, &labels).unwrap());
        assert!((a - b).abs() < 1e-12, "{a} vs {b}");
        let a = ks_statistic(&scores, &labels).unwrap();
        let b = ks_statistic(&rescaled, &labels).unwrap();
        assert!((a - b).abs() < 1e-12, "{a} vs {b}");
    }

    #[test]
    fn ks_of_perfect_separation_is_one() {
        assert_eq!(ks_statistic(&[0.1, 0.2, 0.8, 0.9], &[0, 0, 1, 1]), Some(1.0));
        assert_eq!(ks_statistic(&[0.5, 0.5], &[0, 1]), Some(0.0));
        assert_eq!(ks_statistic(&[0.5, 0.5], &[0, 0]), None);
    }

    #[test]
    fn roc_curve_spans_unit_square() {
        let roc = roc_curve(&[0.1, 0.4, 0.35, 0.8], &[0, 0, 1, 1]);
        assert_eq!(roc.len(), 5);
        assert_eq!((roc[0].fpr, roc[0].tpr), (0.0, 0.0));
        let last = roc.last().unwrap();
        assert_eq!((last.fpr, last.tpr), (1.0, 1.0));
        assert_eq!((roc[1].fpr, roc[1].tpr), (0.0, 0.5));
    }

    #[test]
    fn confusion_uses_inclusive_threshold() {
        let m = ConfusionMatrix::at_threshold(&[0.5, 0.2, 0.9, 0.4], &[1, 0, 0, 1], 0.5);
        assert_eq!(m.true_positive, 1);
        assert_eq!(m.false_positive, 1);
        assert_eq!(m.true_negative, 1);
        assert_eq!(m.false_negative, 1);
        assert_eq!(m.accuracy(), Some(0.5));
        assert_eq!(m.precision(), Some(0.5));
        assert_eq!(m.recall(), Some(0.5));
        assert_eq!(ConfusionMatrix::default().precision(), None);
    }
}
