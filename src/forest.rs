use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub const CLASSES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 10,
            min_samples_split: 5,
            min_samples_leaf: 2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        probs: [f64; CLASSES],
    },
}

/// CART tree stored flat; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    pub fn predict_proba(&self, row: &[f64]) -> [f64; CLASSES] {
        let mut at = 0usize;
        loop {
            match self.nodes.get(at) {
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let v = row.get(*feature).copied().unwrap_or(0.0);
                    at = if v <= *threshold { *left } else { *right };
                }
                Some(TreeNode::Leaf { probs }) => return *probs,
                None => return [1.0 / CLASSES as f64; CLASSES],
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], at: usize) -> usize {
            match nodes.get(at) {
                Some(TreeNode::Split { left, right, .. }) => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub params: ForestParams,
    pub trees: Vec<DecisionTree>,
}

struct TrainView<'a> {
    rows: &'a [Vec<f64>],
    labels: &'a [usize],
    features_per_split: usize,
}

impl RandomForest {
    /// Bagged CART trees. Each tree gets its own seeded RNG, so the result does
    /// not depend on how rayon schedules the work.
    pub fn fit(rows: &[Vec<f64>], labels: &[usize], params: ForestParams) -> Self {
        let n = rows.len().min(labels.len());
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        if n == 0 || width == 0 {
            return Self {
                params,
                trees: Vec::new(),
            };
        }
        let view = TrainView {
            rows: &rows[..n],
            labels: &labels[..n],
            features_per_split: ((width as f64).sqrt().round() as usize).clamp(1, width),
        };

        let trees = (0..params.n_trees.max(1))
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(t as u64));
                let mut sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let mut nodes = Vec::new();
                grow(&mut nodes, &view, &mut sample, 0, &params, &mut rng);
                DecisionTree { nodes }
            })
            .collect();

        Self { params, trees }
    }

    pub fn predict_proba(&self, row: &[f64]) -> [f64; CLASSES] {
        if self.trees.is_empty() {
            return [1.0 / CLASSES as f64; CLASSES];
        }
        let mut acc = [0.0; CLASSES];
        for tree in &self.trees {
            let p = tree.predict_proba(row);
            for k in 0..CLASSES {
                acc[k] += p[k];
            }
        }
        let n = self.trees.len() as f64;
        acc.map(|v| v / n)
    }
}

fn class_counts(labels: &[usize], idx: &[usize]) -> [usize; CLASSES] {
    let mut counts = [0usize; CLASSES];
    for &i in idx {
        if let Some(c) = counts.get_mut(labels[i]) {
            *c += 1;
        }
    }
    counts
}

fn gini(counts: &[usize; CLASSES], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let t = total as f64;
    1.0 - counts.iter().map(|c| (*c as f64 / t).powi(2)).sum::<f64>()
}

fn leaf(counts: [usize; CLASSES]) -> TreeNode {
    let total: usize = counts.iter().sum();
    let probs = if total == 0 {
        [1.0 / CLASSES as f64; CLASSES]
    } else {
        counts.map(|c| c as f64 / total as f64)
    };
    TreeNode::Leaf { probs }
}

fn grow(
    nodes: &mut Vec<TreeNode>,
    view: &TrainView<'_>,
    idx: &mut [usize],
    depth: usize,
    params: &ForestParams,
    rng: &mut StdRng,
) -> usize {
    let node_id = nodes.len();
    let counts = class_counts(view.labels, idx);
    let pure = counts.iter().filter(|c| **c > 0).count() <= 1;
    if pure || depth >= params.max_depth || idx.len() < params.min_samples_split {
        nodes.push(leaf(counts));
        return node_id;
    }

    let Some((feature, threshold)) = best_split(view, idx, &counts, params, rng) else {
        nodes.push(leaf(counts));
        return node_id;
    };

    // false (goes left) sorts first
    idx.sort_by_key(|&i| view.rows[i][feature] > threshold);
    let mid = idx
        .iter()
        .filter(|&&i| view.rows[i][feature] <= threshold)
        .count();

    nodes.push(leaf(counts));
    let (left_idx, right_idx) = idx.split_at_mut(mid);
    let left = grow(nodes, view, left_idx, depth + 1, params, rng);
    let right = grow(nodes, view, right_idx, depth + 1, params, rng);
    nodes[node_id] = TreeNode::Split {
        feature,
        threshold,
        left,
        right,
    };
    node_id
}

fn best_split(
    view: &TrainView<'_>,
    idx: &[usize],
    parent: &[usize; CLASSES],
    params: &ForestParams,
    rng: &mut StdRng,
) -> Option<(usize, f64)> {
    let width = view.rows[idx[0]].len();
    let n = idx.len();
    let min_leaf = params.min_samples_leaf.max(1);
    let mut best_impurity = gini(parent, n) - 1e-12;
    let mut best = None;

    let mut candidates = rand::seq::index::sample(rng, width, view.features_per_split).into_vec();
    candidates.sort_unstable();

    let mut order = idx.to_vec();
    for feature in candidates {
        order.sort_by(|a, b| {
            view.rows[*a][feature]
                .partial_cmp(&view.rows[*b][feature])
                .unwrap_or(Ordering::Equal)
        });
        let mut left = [0usize; CLASSES];
        let mut right = *parent;
        for pos in 0..n - 1 {
            let label = view.labels[order[pos]];
            left[label] += 1;
            right[label] -= 1;
            let (n_left, n_right) = (pos + 1, n - pos - 1);
            if n_left < min_leaf || n_right < min_leaf {
                continue;
            }
            let here = view.rows[order[pos]][feature];
            let next = view.rows[order[pos + 1]][feature];
            if next - here <= 1e-12 {
                continue;
            }
            let impurity = (n_left as f64 * gini(&left, n_left)
                + n_right as f64 * gini(&right, n_right))
                / n as f64;
            if impurity < best_impurity {
                best_impurity = impurity;
                best = Some((feature, here + (next - here) / 2.0));
            }
        }
    }
    best
}
