//! Histogram gradient-boosted regression trees for the three context models:
//! Poisson shot rates (log link with a base margin), squared-error shot
//! quality, and logistic goal probability. Trained models carry their ordered
//! feature-column list; callers build prediction rows against that order and
//! zero-fill columns they do not know.

use anyhow::{Result, bail};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::ForecastError;

const MIN_SPLIT_GAIN: f64 = 1e-9;
// Step clamp for Poisson leaves; keeps exp(margin) from running away on
// sparse count data.
const POISSON_MAX_DELTA: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    SquaredError,
    Poisson,
    Logistic,
}

#[derive(Debug, Clone)]
pub struct BoostParams {
    pub objective: Objective,
    pub rounds: usize,
    pub max_depth: usize,
    pub eta: f64,
    pub subsample: f64,
    pub colsample: f64,
    pub min_child_weight: f64,
    pub lambda: f64,
    pub max_bins: usize,
    pub seed: u64,
}

impl BoostParams {
    pub fn new(objective: Objective) -> Self {
        Self {
            objective,
            rounds: 300,
            max_depth: 6,
            eta: 0.05,
            subsample: 0.8,
            colsample: 0.8,
            min_child_weight: 2.0,
            lambda: 1.0,
            max_bins: 32,
            seed: 7,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrainingSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f32>>,
    pub targets: Vec<f32>,
    pub base_margin: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    feature: u32,
    threshold: f32,
    // Leaves have left < 0; `value` is the eta-scaled leaf weight.
    left: i32,
    right: i32,
    value: f32,
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn score(&self, row: &[f32]) -> f64 {
        let mut idx = 0usize;
        loop {
            let node = self.nodes[idx];
            if node.left < 0 {
                return node.value as f64;
            }
            idx = if row[node.feature as usize] <= node.threshold {
                node.left as usize
            } else {
                node.right as usize
            };
        }
    }
}

#[derive(Debug, Clone)]
pub struct Booster {
    objective: Objective,
    columns: Vec<String>,
    base_score: f64,
    trees: Vec<Tree>,
}

impl Booster {
    pub fn train(set: &TrainingSet, params: &BoostParams) -> Result<Self> {
        let n = set.rows.len();
        let m = set.columns.len();
        if n == 0 || m == 0 {
            bail!(ForecastError::modeling("booster", "empty training set"));
        }
        if set.targets.len() != n {
            bail!(ForecastError::DataShape(format!(
                "targets ({}) do not match rows ({n})",
                set.targets.len()
            )));
        }
        if let Some(margins) = &set.base_margin
            && margins.len() != n
        {
            bail!(ForecastError::DataShape(format!(
                "base margins ({}) do not match rows ({n})",
                margins.len()
            )));
        }

        // Column-major copy and quantile binning.
        let mut col_values = vec![vec![0f32; n]; m];
        for (i, row) in set.rows.iter().enumerate() {
            if row.len() != m {
                bail!(ForecastError::DataShape(format!(
                    "row {i} has {} values, expected {m}",
                    row.len()
                )));
            }
            for (j, v) in row.iter().enumerate() {
                col_values[j][i] = *v;
            }
        }
        let cuts: Vec<Vec<f32>> = col_values
            .iter()
            .map(|values| quantile_cuts(values, params.max_bins))
            .collect();
        let binned: Vec<Vec<u16>> = col_values
            .iter()
            .zip(&cuts)
            .map(|(values, col_cuts)| {
                values
                    .iter()
                    .map(|v| col_cuts.partition_point(|c| c < v) as u16)
                    .collect()
            })
            .collect();

        let (base_score, mut margins) = initial_margins(set, params.objective);

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut trees = Vec::with_capacity(params.rounds);
        let mut grad = vec![0f64; n];
        let mut hess = vec![0f64; n];

        for _ in 0..params.rounds {
            for i in 0..n {
                let (g, h) = grad_hess(params.objective, margins[i], set.targets[i] as f64);
                grad[i] = g;
                hess[i] = h;
            }

            let rows: Vec<u32> = (0..n as u32)
                .filter(|_| params.subsample >= 1.0 || rng.r#gen::<f64>() < params.subsample)
                .collect();
            if rows.is_empty() {
                continue;
            }
            let features = sample_features(m, params.colsample, &mut rng);

            let mut builder = TreeBuilder {
                binned: &binned,
                cuts: &cuts,
                grad: &grad,
                hess: &hess,
                features: &features,
                params,
                nodes: Vec::new(),
            };
            builder.build(rows, 0);
            let tree = Tree {
                nodes: builder.nodes,
            };

            for (i, row) in set.rows.iter().enumerate() {
                margins[i] += tree.score(row);
            }
            trees.push(tree);
        }

        Ok(Self {
            objective: params.objective,
            columns: set.columns.clone(),
            base_score,
            trees,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Raw mode returns the untransformed margin (the log-rate for Poisson,
    /// the logit for logistic).
    pub fn predict_row(&self, row: &[f32], base_margin: f64, raw: bool) -> f64 {
        let mut margin = self.base_score + base_margin;
        for tree in &self.trees {
            margin += tree.score(row);
        }
        if raw {
            return margin;
        }
        match self.objective {
            Objective::SquaredError => margin,
            Objective::Poisson => margin.clamp(-30.0, 30.0).exp(),
            Objective::Logistic => 1.0 / (1.0 + (-margin).exp()),
        }
    }

    pub fn predict(&self, rows: &[Vec<f32>], base_margin: Option<&[f64]>, raw: bool) -> Vec<f64> {
        rows.iter()
            .enumerate()
            .map(|(i, row)| {
                let margin = base_margin.map_or(0.0, |b| b[i]);
                self.predict_row(row, margin, raw)
            })
            .collect()
    }
}

fn initial_margins(set: &TrainingSet, objective: Objective) -> (f64, Vec<f64>) {
    if let Some(base) = &set.base_margin {
        return (0.0, base.iter().map(|b| *b as f64).collect());
    }
    let mean = set.targets.iter().map(|t| *t as f64).sum::<f64>() / set.targets.len() as f64;
    let base_score = match objective {
        Objective::SquaredError => mean,
        Objective::Poisson => mean.max(1e-6).ln(),
        Objective::Logistic => {
            let p = mean.clamp(1e-6, 1.0 - 1e-6);
            (p / (1.0 - p)).ln()
        }
    };
    (base_score, vec![base_score; set.targets.len()])
}

fn grad_hess(objective: Objective, margin: f64, target: f64) -> (f64, f64) {
    match objective {
        Objective::SquaredError => (margin - target, 1.0),
        Objective::Poisson => {
            let pred = margin.clamp(-30.0, 30.0).exp();
            (pred - target, pred)
        }
        Objective::Logistic => {
            let p = 1.0 / (1.0 + (-margin).exp());
            (p - target, (p * (1.0 - p)).max(1e-16))
        }
    }
}

fn quantile_cuts(values: &[f32], max_bins: usize) -> Vec<f32> {
    let mut sorted: Vec<f32> = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted.dedup();
    if sorted.len() <= 1 {
        return Vec::new();
    }
    // All but the largest distinct value split somewhere.
    if sorted.len() <= max_bins {
        sorted.pop();
        return sorted;
    }
    let mut cuts = Vec::with_capacity(max_bins - 1);
    for k in 1..max_bins {
        let idx = k * (sorted.len() - 1) / max_bins;
        cuts.push(sorted[idx]);
    }
    cuts.dedup();
    cuts
}

fn sample_features(m: usize, colsample: f64, rng: &mut StdRng) -> Vec<u32> {
    if colsample >= 1.0 || m <= 1 {
        return (0..m as u32).collect();
    }
    let take = ((m as f64 * colsample).ceil() as usize).clamp(1, m);
    let mut all: Vec<u32> = (0..m as u32).collect();
    for i in 0..take {
        let j = rng.gen_range(i..m);
        all.swap(i, j);
    }
    let mut chosen = all[..take].to_vec();
    chosen.sort_unstable();
    chosen
}

struct TreeBuilder<'a> {
    binned: &'a [Vec<u16>],
    cuts: &'a [Vec<f32>],
    grad: &'a [f64],
    hess: &'a [f64],
    features: &'a [u32],
    params: &'a BoostParams,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn build(&mut self, rows: Vec<u32>, depth: usize) -> i32 {
        let g_total: f64 = rows.iter().map(|&r| self.grad[r as usize]).sum();
        let h_total: f64 = rows.iter().map(|&r| self.hess[r as usize]).sum();

        let split = if depth < self.params.max_depth && rows.len() >= 2 {
            self.best_split(&rows, g_total, h_total)
        } else {
            None
        };

        let Some((feature, bin, _gain)) = split else {
            return self.push_leaf(g_total, h_total);
        };

        let (left_rows, right_rows): (Vec<u32>, Vec<u32>) = rows
            .into_iter()
            .partition(|&r| self.binned[feature as usize][r as usize] <= bin);
        if left_rows.is_empty() || right_rows.is_empty() {
            return self.push_leaf(g_total, h_total);
        }

        let idx = self.nodes.len() as i32;
        self.nodes.push(Node {
            feature,
            threshold: self.cuts[feature as usize][bin as usize],
            left: 0,
            right: 0,
            value: 0.0,
        });
        let left = self.build(left_rows, depth + 1);
        let right = self.build(right_rows, depth + 1);
        self.nodes[idx as usize].left = left;
        self.nodes[idx as usize].right = right;
        idx
    }

    fn push_leaf(&mut self, g: f64, h: f64) -> i32 {
        let mut weight = -g / (h + self.params.lambda);
        if self.params.objective == Objective::Poisson {
            weight = weight.clamp(-POISSON_MAX_DELTA, POISSON_MAX_DELTA);
        }
        let idx = self.nodes.len() as i32;
        self.nodes.push(Node {
            feature: 0,
            threshold: 0.0,
            left: -1,
            right: -1,
            value: (weight * self.params.eta) as f32,
        });
        idx
    }

    fn best_split(&self, rows: &[u32], g_total: f64, h_total: f64) -> Option<(u32, u16, f64)> {
        let lambda = self.params.lambda;
        let mcw = self.params.min_child_weight;
        let parent_score = g_total * g_total / (h_total + lambda);
        let mut best: Option<(u32, u16, f64)> = None;

        for &feature in self.features {
            let col_cuts = &self.cuts[feature as usize];
            if col_cuts.is_empty() {
                continue;
            }
            let n_bins = col_cuts.len() + 1;
            let mut g_hist = vec![0f64; n_bins];
            let mut h_hist = vec![0f64; n_bins];
            let bins = &self.binned[feature as usize];
            for &r in rows {
                let b = bins[r as usize] as usize;
                g_hist[b] += self.grad[r as usize];
                h_hist[b] += self.hess[r as usize];
            }

            let mut g_left = 0.0;
            let mut h_left = 0.0;
            for bin in 0..col_cuts.len() {
                g_left += g_hist[bin];
                h_left += h_hist[bin];
                let g_right = g_total - g_left;
                let h_right = h_total - h_left;
                if h_left < mcw || h_right < mcw {
                    continue;
                }
                let gain = 0.5
                    * (g_left * g_left / (h_left + lambda) + g_right * g_right / (h_right + lambda)
                        - parent_score);
                if gain > MIN_SPLIT_GAIN && best.is_none_or(|(_, _, g)| gain > g) {
                    best = Some((feature, bin as u16, gain));
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_feature_set(xs: &[f32], ys: &[f32]) -> TrainingSet {
        TrainingSet {
            columns: vec!["x".to_string()],
            rows: xs.iter().map(|x| vec![*x]).collect(),
            targets: ys.to_vec(),
            base_margin: None,
        }
    }

    #[test]
    fn fits_a_step_function() {
        let xs: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let ys: Vec<f32> = xs.iter().map(|x| if *x < 50.0 { 1.0 } else { 3.0 }).collect();
        let mut params = BoostParams::new(Objective::SquaredError);
        params.rounds = 120;
        params.subsample = 1.0;
        params.colsample = 1.0;
        let model = Booster::train(&single_feature_set(&xs, &ys), &params).unwrap();
        assert!((model.predict_row(&[10.0], 0.0, false) - 1.0).abs() < 0.15);
        assert!((model.predict_row(&[80.0], 0.0, false) - 3.0).abs() < 0.15);
    }

    #[test]
    fn logistic_orders_probabilities() {
        let xs: Vec<f32> = (0..200).map(|i| (i % 20) as f32).collect();
        let ys: Vec<f32> = xs.iter().map(|x| if *x >= 10.0 { 1.0 } else { 0.0 }).collect();
        let mut params = BoostParams::new(Objective::Logistic);
        params.rounds = 150;
        let model = Booster::train(&single_feature_set(&xs, &ys), &params).unwrap();
        let low = model.predict_row(&[2.0], 0.0, false);
        let high = model.predict_row(&[18.0], 0.0, false);
        assert!(low < 0.3, "low={low}");
        assert!(high > 0.7, "high={high}");
    }

    #[test]
    fn poisson_margin_scales_prediction() {
        // exp(base_margin) multiplies the prediction; predicting with
        // margin 0 isolates the pure model effect.
        let xs: Vec<f32> = (0..120).map(|i| (i % 12) as f32).collect();
        let ys: Vec<f32> = xs.iter().map(|x| if *x < 6.0 { 1.0 } else { 4.0 }).collect();
        let mut params = BoostParams::new(Objective::Poisson);
        params.rounds = 150;
        let set = TrainingSet {
            base_margin: Some(vec![0.0; xs.len()]),
            ..single_feature_set(&xs, &ys)
        };
        let model = Booster::train(&set, &params).unwrap();

        let unit = model.predict_row(&[9.0], 0.0, false);
        let scaled = model.predict_row(&[9.0], (3.0f64).ln(), false);
        assert!((scaled / unit - 3.0).abs() < 1e-9);

        let raw = model.predict_row(&[9.0], 0.0, true);
        assert!((raw.exp() - unit).abs() < 1e-9);
    }

    #[test]
    fn empty_training_set_is_a_modeling_error() {
        let params = BoostParams::new(Objective::SquaredError);
        assert!(Booster::train(&TrainingSet::default(), &params).is_err());
    }
}
