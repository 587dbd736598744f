//! Gradient-boosted decision trees for binary classification.
//!
//! Boosting follows the usual second-order recipe:
//!
//! - logistic loss, gradients `g = w (p - y)`, hessians `h = w p (1 - p)`
//! - each tree is grown greedily to `max_depth` on quantile histograms
//! - split gain `½ [G_L²/(H_L+λ) + G_R²/(H_R+λ) - G²/(H+λ)] - γ`
//! - leaf value `-G/(H+λ)`, shrunk by the learning rate
//!
//! Missing values are handled natively: every split learns a default
//! direction and rows with a missing value follow it at training and
//! prediction time.
//!
//! Attribution uses path-dependent TreeSHAP, which needs the per-node row
//! counts (`cover`) recorded during training.

use log::debug;
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{GbtParams, ScalePosWeight};
use crate::error::PipelineError;
use crate::math::{logit, sigmoid};
use crate::models::matrix::FeatureMatrix;
use crate::models::{Contributions, Scorer};

const MISSING_BIN: u16 = u16::MAX;
const MIN_HESSIAN: f64 = 1e-16;
const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Split feature (internal nodes only).
    pub feature: usize,
    /// Rows with `x[feature] < threshold` go left.
    pub threshold: f64,
    pub left: usize,
    pub right: usize,
    /// Direction taken when `x[feature]` is missing.
    pub default_left: bool,
    /// Leaf output (already scaled by the learning rate).
    pub value: f64,
    /// Training rows that reached this node.
    pub cover: f64,
    pub is_leaf: bool,
}

impl Node {
    fn leaf(value: f64, cover: f64) -> Self {
        Self {
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 0,
            default_left: false,
            value,
            cover,
            is_leaf: true,
        }
    }

    fn next(&self, x: &[f64]) -> usize {
        let v = x[self.feature];
        let go_left = if v.is_nan() { self.default_left } else { v < self.threshold };
        if go_left { self.left } else { self.right }
    }
}

/// A single regression tree; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            let node = &self.nodes[idx];
            if node.is_leaf {
                return node.value;
            }
            idx = node.next(x);
        }
    }

    /// Cover-weighted mean output: the prediction with no feature known.
    pub fn expected_value(&self) -> f64 {
        let root_cover = self.nodes[0].cover;
        if root_cover <= 0.0 {
            return 0.0;
        }
        self.nodes
            .iter()
            .filter(|n| n.is_leaf)
            .map(|n| n.value * n.cover)
            .sum::<f64>()
            / root_cover
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            let n = &nodes[idx];
            if n.is_leaf { 0 } else { 1 + walk(nodes, n.left).max(walk(nodes, n.right)) }
        }
        walk(&self.nodes, 0)
    }

    /// Add this tree's TreeSHAP values for `x` into `phi`.
    pub fn shap(&self, x: &[f64], phi: &mut [f64]) {
        tree_shap(self, x, phi, 0, &[], 1.0, 1.0, None);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbtModel {
    pub n_features: usize,
    pub base_score: f64,
    pub trees: Vec<Tree>,
    pub scale_pos_weight: f64,
    /// Weighted training log-loss after each round.
    pub train_loss: Vec<f64>,
}

impl GbtModel {
    /// Fit the ensemble. `y` holds 0/1 labels aligned with the rows of `x`.
    pub fn fit(
        x: &FeatureMatrix,
        y: &[u8],
        params: &GbtParams,
        seed: u64,
    ) -> Result<Self, PipelineError> {
        validate_params(params)?;
        let n = x.n_rows();
        if n == 0 || n != y.len() {
            return Err(PipelineError::Computation(format!(
                "gbt: {n} feature rows vs {} labels",
                y.len()
            )));
        }

        let positives = y.iter().filter(|&&v| v == 1).count();
        let negatives = n - positives;
        let scale_pos_weight = match params.scale_pos_weight {
            ScalePosWeight::Auto if positives > 0 => negatives as f64 / positives as f64,
            ScalePosWeight::Auto => 1.0,
            ScalePosWeight::Value(v) => v,
        };
        let weights: Vec<f64> = y
            .iter()
            .map(|&v| if v == 1 { scale_pos_weight } else { 1.0 })
            .collect();
        let targets: Vec<f64> = y.iter().map(|&v| f64::from(v)).collect();

        let w_total: f64 = weights.iter().sum();
        let w_pos: f64 = weights.iter().zip(&targets).map(|(w, t)| w * t).sum();
        let base_score = logit(w_pos / w_total);

        let binned = BinnedFeatures::build(x, params.max_bins);
        let mut margins = vec![base_score; n];
        let mut rng = StdRng::seed_from_u64(seed);
        let mut trees = Vec::with_capacity(params.n_rounds);
        let mut train_loss = Vec::with_capacity(params.n_rounds);

        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];

        for round in 0..params.n_rounds {
            for i in 0..n {
                let p = sigmoid(margins[i]);
                grad[i] = weights[i] * (p - targets[i]);
                hess[i] = (weights[i] * p * (1.0 - p)).max(MIN_HESSIAN);
            }

            let rows = sample_rows(n, params.subsample, &mut rng);
            let tree = TreeBuilder {
                binned: &binned,
                grad: &grad,
                hess: &hess,
                params,
                nodes: Vec::new(),
            }
            .build(rows);

            for (i, m) in margins.iter_mut().enumerate() {
                *m += tree.predict(x.row(i));
            }
            trees.push(tree);

            let loss = weighted_log_loss(&margins, &targets, &weights);
            train_loss.push(loss);
            if round % 10 == 0 || round + 1 == params.n_rounds {
                debug!("gbt round {round}: train log-loss {loss:.6}");
            }
        }

        Ok(Self {
            n_features: x.n_cols(),
            base_score,
            trees,
            scale_pos_weight,
            train_loss,
        })
    }
}

impl Scorer for GbtModel {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn raw_score(&self, x: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict(x)).sum::<f64>()
    }

    fn contributions(&self, x: &[f64]) -> Option<Contributions> {
        let mut phi = vec![0.0; self.n_features];
        for tree in &self.trees {
            tree.shap(x, &mut phi);
        }
        let baseline = self.base_score + self.trees.iter().map(Tree::expected_value).sum::<f64>();
        Some(Contributions { baseline, values: phi })
    }
}

fn validate_params(p: &GbtParams) -> Result<(), PipelineError> {
    let bad = |msg: String| Err(PipelineError::Config(msg));
    if p.n_rounds == 0 {
        return bad("gbt: n_rounds must be at least 1".into());
    }
    if !(p.learning_rate > 0.0 && p.learning_rate <= 1.0) {
        return bad(format!("gbt: learning_rate must be in (0, 1], got {}", p.learning_rate));
    }
    if p.max_depth == 0 {
        return bad("gbt: max_depth must be at least 1".into());
    }
    if !(p.subsample > 0.0 && p.subsample <= 1.0) {
        return bad(format!("gbt: subsample must be in (0, 1], got {}", p.subsample));
    }
    if p.max_bins < 2 || p.max_bins >= MISSING_BIN as usize {
        return bad(format!("gbt: max_bins must be in [2, {}), got {}", MISSING_BIN, p.max_bins));
    }
    if p.lambda < 0.0 || p.gamma < 0.0 || p.min_child_weight < 0.0 {
        return bad("gbt: lambda, gamma and min_child_weight must be non-negative".into());
    }
    Ok(())
}

fn sample_rows(n: usize, subsample: f64, rng: &mut StdRng) -> Vec<usize> {
    if subsample >= 1.0 {
        return (0..n).collect();
    }
    let rows: Vec<usize> = (0..n).filter(|_| rng.gen_bool(subsample)).collect();
    if rows.is_empty() { (0..n).collect() } else { rows }
}

fn weighted_log_loss(margins: &[f64], targets: &[f64], weights: &[f64]) -> f64 {
    let mut total = 0.0;
    let mut w_sum = 0.0;
    for ((&m, &t), &w) in margins.iter().zip(targets).zip(weights) {
        let p = sigmoid(m).clamp(1e-15, 1.0 - 1e-15);
        total -= w * (t * p.ln() + (1.0 - t) * (1.0 - p).ln());
        w_sum += w;
    }
    total / w_sum
}

/// Quantile-binned copy of the training matrix (column-major).
struct BinnedFeatures {
    n_rows: usize,
    /// Per feature: ascending cut points; bin `k` holds values in `[cut[k-1], cut[k])`.
    cuts: Vec<Vec<f64>>,
    bins: Vec<u16>,
}

impl BinnedFeatures {
    fn build(x: &FeatureMatrix, max_bins: usize) -> Self {
        let n_rows = x.n_rows();
        let cuts: Vec<Vec<f64>> = (0..x.n_cols())
            .into_par_iter()
            .map(|j| quantile_cuts(x.column(j).filter(|v| !v.is_nan()).collect(), max_bins))
            .collect();

        let mut bins = vec![MISSING_BIN; n_rows * x.n_cols()];
        for (j, col_cuts) in cuts.iter().enumerate() {
            for i in 0..n_rows {
                let v = x.get(i, j);
                if !v.is_nan() {
                    bins[j * n_rows + i] = col_cuts.partition_point(|c| *c <= v) as u16;
                }
            }
        }
        Self { n_rows, cuts, bins }
    }

    fn bin(&self, feature: usize, row: usize) -> u16 {
        self.bins[feature * self.n_rows + row]
    }
}

/// Split candidates for one feature: `x < cut` goes left.
fn quantile_cuts(mut values: Vec<f64>, max_bins: usize) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    values.sort_by(f64::total_cmp);
    let mut distinct = values.clone();
    distinct.dedup();
    if distinct.len() <= max_bins {
        return distinct[1..].to_vec();
    }

    let n = values.len();
    let min = values[0];
    let mut cuts: Vec<f64> = (1..max_bins)
        .map(|k| values[k * n / max_bins])
        .filter(|&c| c > min)
        .collect();
    cuts.dedup();
    cuts
}

#[derive(Debug, Clone, Copy, Default)]
struct GradStats {
    g: f64,
    h: f64,
    count: usize,
}

impl GradStats {
    fn add(&mut self, g: f64, h: f64) {
        self.g += g;
        self.h += h;
        self.count += 1;
    }

    fn plus(self, o: GradStats) -> GradStats {
        GradStats {
            g: self.g + o.g,
            h: self.h + o.h,
            count: self.count + o.count,
        }
    }

    fn minus(self, o: GradStats) -> GradStats {
        GradStats {
            g: self.g - o.g,
            h: self.h - o.h,
            count: self.count - o.count,
        }
    }

    fn score(self, lambda: f64) -> f64 {
        self.g * self.g / (self.h + lambda)
    }
}

#[derive(Debug, Clone, Copy)]
struct Split {
    feature: usize,
    bin: u16,
    threshold: f64,
    default_left: bool,
    gain: f64,
}

struct TreeBuilder<'a> {
    binned: &'a BinnedFeatures,
    grad: &'a [f64],
    hess: &'a [f64],
    params: &'a GbtParams,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn build(mut self, rows: Vec<usize>) -> Tree {
        self.grow(rows, 0);
        Tree { nodes: self.nodes }
    }

    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let mut total = GradStats::default();
        for &r in &rows {
            total.add(self.grad[r], self.hess[r]);
        }

        let idx = self.nodes.len();
        let leaf_value = -total.g / (total.h + self.params.lambda) * self.params.learning_rate;
        self.nodes.push(Node::leaf(leaf_value, rows.len() as f64));

        if depth >= self.params.max_depth || rows.len() < 2 {
            return idx;
        }
        let Some(split) = self.best_split(&rows, total) else {
            return idx;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows.into_iter().partition(|&r| {
            let b = self.binned.bin(split.feature, r);
            if b == MISSING_BIN { split.default_left } else { b <= split.bin }
        });

        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);

        let node = &mut self.nodes[idx];
        node.is_leaf = false;
        node.value = 0.0;
        node.feature = split.feature;
        node.threshold = split.threshold;
        node.default_left = split.default_left;
        node.left = left;
        node.right = right;
        idx
    }

    fn best_split(&self, rows: &[usize], total: GradStats) -> Option<Split> {
        let candidates: Vec<Option<Split>> = (0..self.binned.cuts.len())
            .into_par_iter()
            .map(|j| self.best_split_for_feature(j, rows, total))
            .collect();

        // Deterministic: highest gain, lowest feature index on ties.
        candidates.into_iter().flatten().fold(None, |best: Option<Split>, s| match best {
            Some(b) if b.gain >= s.gain => Some(b),
            _ => Some(s),
        })
    }

    fn best_split_for_feature(&self, j: usize, rows: &[usize], total: GradStats) -> Option<Split> {
        let cuts = &self.binned.cuts[j];
        if cuts.is_empty() {
            return None;
        }

        let mut hist = vec![GradStats::default(); cuts.len() + 1];
        let mut missing = GradStats::default();
        for &r in rows {
            let b = self.binned.bin(j, r);
            if b == MISSING_BIN {
                missing.add(self.grad[r], self.hess[r]);
            } else {
                hist[b as usize].add(self.grad[r], self.hess[r]);
            }
        }

        let lambda = self.params.lambda;
        let parent = total.score(lambda);
        let mut best: Option<Split> = None;
        let mut acc = GradStats::default();

        for (k, &threshold) in cuts.iter().enumerate() {
            acc = acc.plus(hist[k]);
            let directions: &[bool] = if missing.count > 0 { &[true, false] } else { &[false] };
            for &missing_left in directions {
                let left = if missing_left { acc.plus(missing) } else { acc };
                let right = total.minus(left);
                if left.count == 0 || right.count == 0 {
                    continue;
                }
                if left.h < self.params.min_child_weight || right.h < self.params.min_child_weight {
                    continue;
                }
                let gain =
                    0.5 * (left.score(lambda) + right.score(lambda) - parent) - self.params.gamma;
                if gain <= MIN_GAIN || best.is_some_and(|b| b.gain >= gain) {
                    continue;
                }
                // Without missing rows here, send future missing values to the larger side.
                let default_left = if missing.count > 0 {
                    missing_left
                } else {
                    left.count >= right.count
                };
                best = Some(Split {
                    feature: j,
                    bin: k as u16,
                    threshold,
                    default_left,
                    gain,
                });
            }
        }
        best
    }
}

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    weight: f64,
}

fn extend_path(
    path: &mut Vec<PathElement>,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        weight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let denom = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].weight += one_fraction * path[i].weight * (i + 1) as f64 / denom;
        path[i].weight = zero_fraction * path[i].weight * (depth - i) as f64 / denom;
    }
}

fn unwind_path(path: &mut Vec<PathElement>, index: usize) {
    let depth = path.len() - 1;
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next_one = path[depth].weight;

    for i in (0..depth).rev() {
        if one != 0.0 {
            let tmp = path[i].weight;
            path[i].weight = next_one * denom / ((i + 1) as f64 * one);
            next_one = tmp - path[i].weight * zero * (depth - i) as f64 / denom;
        } else {
            path[i].weight = path[i].weight * denom / (zero * (depth - i) as f64);
        }
    }
    for i in index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.truncate(depth);
}

/// Total permutation weight of the path with element `index` removed.
fn unwound_sum(path: &[PathElement], index: usize) -> f64 {
    let depth = path.len() - 1;
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next_one = path[depth].weight;
    let mut total = 0.0;

    for i in (0..depth).rev() {
        if one != 0.0 {
            let tmp = next_one * denom / ((i + 1) as f64 * one);
            total += tmp;
            next_one = path[i].weight - tmp * zero * (depth - i) as f64 / denom;
        } else if zero != 0.0 {
            total += path[i].weight / zero / ((depth - i) as f64 / denom);
        }
    }
    total
}

#[allow(clippy::too_many_arguments)]
fn tree_shap(
    tree: &Tree,
    x: &[f64],
    phi: &mut [f64],
    node_idx: usize,
    parent_path: &[PathElement],
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    let mut path = parent_path.to_vec();
    extend_path(&mut path, zero_fraction, one_fraction, feature);
    let node = &tree.nodes[node_idx];

    if node.is_leaf {
        for i in 1..path.len() {
            let w = unwound_sum(&path, i);
            let el = path[i];
            if let Some(f) = el.feature {
                phi[f] += w * (el.one_fraction - el.zero_fraction) * node.value;
            }
        }
        return;
    }

    let hot = node.next(x);
    let cold = if hot == node.left { node.right } else { node.left };
    let hot_zero = tree.nodes[hot].cover / node.cover;
    let cold_zero = tree.nodes[cold].cover / node.cover;

    let mut incoming_zero = 1.0;
    let mut incoming_one = 1.0;
    if let Some(k) = path.iter().position(|e| e.feature == Some(node.feature)) {
        incoming_zero = path[k].zero_fraction;
        incoming_one = path[k].one_fraction;
        unwind_path(&mut path, k);
    }

    tree_shap(tree, x, phi, hot, &path, hot_zero * incoming_zero, incoming_one, Some(node.feature));
    tree_shap(tree, x, phi, cold, &path, cold_zero * incoming_zero, 0.0, Some(node.feature));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn internal(feature: usize, threshold: f64, left: usize, right: usize, cover: f64) -> Node {
        Node {
            feature,
            threshold,
            left,
            right,
            default_left: true,
            value: 0.0,
            cover,
            is_leaf: false,
        }
    }

    /// Root splits on f0, left child on f1, right child on f0 again.
    fn sample_tree() -> Tree {
        Tree {
            nodes: vec![
                internal(0, 0.5, 1, 2, 10.0),
                internal(1, 0.5, 3, 4, 6.0),
                internal(0, 1.5, 5, 6, 4.0),
                Node::leaf(1.0, 2.0),
                Node::leaf(3.0, 4.0),
                Node::leaf(-2.0, 1.0),
                Node::leaf(5.0, 3.0),
            ],
        }
    }

    /// E[f(x) | x_S] under the tree's own cover distribution.
    fn conditional_expectation(tree: &Tree, idx: usize, x: &[f64], known: &[bool]) -> f64 {
        let node = &tree.nodes[idx];
        if node.is_leaf {
            return node.value;
        }
        if known[node.feature] {
            return conditional_expectation(tree, node.next(x), x, known);
        }
        let l = &tree.nodes[node.left];
        let r = &tree.nodes[node.right];
        (l.cover * conditional_expectation(tree, node.left, x, known)
            + r.cover * conditional_expectation(tree, node.right, x, known))
            / node.cover
    }

    fn brute_force_shapley(tree: &Tree, x: &[f64]) -> Vec<f64> {
        let m = x.len();
        let factorial = |n: usize| (1..=n).map(|v| v as f64).product::<f64>();
        let mut phi = vec![0.0; m];
        for i in 0..m {
            for mask in 0..(1usize << m) {
                if mask & (1 << i) != 0 {
                    continue;
                }
                let size = mask.count_ones() as usize;
                let weight = factorial(size) * factorial(m - size - 1) / factorial(m);
                let without: Vec<bool> = (0..m).map(|j| mask & (1 << j) != 0).collect();
                let mut with = without.clone();
                with[i] = true;
                let delta = conditional_expectation(tree, 0, x, &with)
                    - conditional_expectation(tree, 0, x, &without);
                phi[i] += weight * delta;
            }
        }
        phi
    }

    #[test]
    fn tree_shap_matches_brute_force() {
        let tree = sample_tree();
        for x in [[0.2, 0.9, 7.0], [1.0, 0.1, 0.0], [2.0, 0.2, -1.0], [f64::NAN, 0.6, 3.0]] {
            let mut phi = vec![0.0; 3];
            tree.shap(&x, &mut phi);
            let expected = brute_force_shapley(&tree, &x);
            for (a, b) in phi.iter().zip(&expected) {
                assert!((a - b).abs() < 1e-10, "x={x:?}: {phi:?} vs {expected:?}");
            }
            assert_eq!(phi[2], 0.0);
            let sum: f64 = phi.iter().sum::<f64>() + tree.expected_value();
            assert!((sum - tree.predict(&x)).abs() < 1e-10);
        }
    }

    #[test]
    fn expected_value_is_cover_weighted() {
        // (2*1 + 4*3 + 1*(-2) + 3*5) / 10
        assert!((sample_tree().expected_value() - 2.7).abs() < 1e-12);
        assert_eq!(sample_tree().depth(), 2);
    }

    fn synthetic(n: usize, seed: u64) -> (FeatureMatrix, Vec<u8>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut x = FeatureMatrix::new(3);
        let mut y = Vec::with_capacity(n);
        for _ in 0..n {
            let a: f64 = rng.gen_range(-1.0..1.0);
            let b: f64 = rng.gen_range(-1.0..1.0);
            let c = if rng.gen_bool(0.2) { None } else { Some(rng.gen_range(0.0..1.0)) };
            // Interaction plus a missingness signal.
            let positive = (a > 0.0 && b > 0.0) || c.is_none();
            x.push_row(&[Some(a), Some(b), c]);
            y.push(u8::from(positive));
        }
        (x, y)
    }

    #[test]
    fn boosting_learns_interactions_and_missingness() {
        let (x, y) = synthetic(600, 1);
        let params = GbtParams {
            n_rounds: 40,
            learning_rate: 0.3,
            max_depth: 3,
            ..GbtParams::default()
        };
        let model = GbtModel::fit(&x, &y, &params, 7).unwrap();
        assert_eq!(model.trees.len(), 40);
        assert!(model.train_loss.last().unwrap() < &model.train_loss[0]);

        let correct = (0..x.n_rows())
            .filter(|&i| (model.probability(x.row(i)) >= 0.5) == (y[i] == 1))
            .count();
        assert!(correct as f64 / x.n_rows() as f64 > 0.9, "accuracy {correct}/600");

        // Missing c pushes the score up.
        assert!(model.probability(&[-0.5, -0.5, f64::NAN]) > model.probability(&[-0.5, -0.5, 0.5]));
    }

    #[test]
    fn ensemble_contributions_are_additive() {
        let (x, y) = synthetic(300, 2);
        let params = GbtParams {
            n_rounds: 15,
            subsample: 0.8,
            ..GbtParams::default()
        };
        let model = GbtModel::fit(&x, &y, &params, 3).unwrap();
        for row in x.rows().take(50) {
            let c = model.contributions(row).unwrap();
            let total = c.baseline + c.values.iter().sum::<f64>();
            let raw = model.raw_score(row);
            assert!((total - raw).abs() <= 1e-9 * raw.abs().max(1.0), "{total} vs {raw}");
        }
    }

    #[test]
    fn fitting_is_deterministic_for_a_seed() {
        let (x, y) = synthetic(200, 4);
        let params = GbtParams {
            n_rounds: 5,
            subsample: 0.7,
            ..GbtParams::default()
        };
        let a = GbtModel::fit(&x, &y, &params, 11).unwrap();
        let b = GbtModel::fit(&x, &y, &params, 11).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn quantile_cuts_split_between_values() {
        assert_eq!(quantile_cuts(vec![3.0, 1.0, 2.0, 2.0], 8), vec![2.0, 3.0]);
        assert!(quantile_cuts(vec![5.0; 10], 8).is_empty());
        let many: Vec<f64> = (0..1000).map(f64::from).collect();
        let cuts = quantile_cuts(many, 4);
        assert_eq!(cuts, vec![250.0, 500.0, 750.0]);
    }

    #[test]
    fn invalid_params_are_config_errors() {
        let (x, y) = synthetic(10, 5);
        let params = GbtParams {
            learning_rate: 0.0,
            ..GbtParams::default()
        };
        assert!(matches!(GbtModel::fit(&x, &y, &params, 1), Err(PipelineError::Config(_))));
    }
}
