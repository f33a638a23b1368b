//! CART classification tree builder
//!
//! Exact-greedy binary splits on Gini impurity with midpoint thresholds and
//! deterministic tie-breaking.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::rng::{LcgRng, SplitTieBreaker};

/// Minimum impurity decrease for a split to be kept.
const MIN_GAIN: f64 = 1e-12;

/// Tree node. Leaves carry `value` (fraction of positive samples).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub feature_index: usize,
    pub threshold: f64,
    pub left: usize,
    pub right: usize,
    pub value: Option<f64>,
}

impl Node {
    fn leaf(value: f64) -> Self {
        Self {
            feature_index: 0,
            threshold: 0.0,
            left: 0,
            right: 0,
            value: Some(value),
        }
    }
}

/// Flat tree; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    /// Positive-class probability for one feature row.
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            let Some(node) = self.nodes.get(idx) else {
                return 0.0;
            };
            if let Some(value) = node.value {
                return value;
            }
            let x = row.get(node.feature_index).copied().unwrap_or(0.0);
            idx = if x <= node.threshold { node.left } else { node.right };
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(node) if node.value.is_none() => {
                    1 + walk(nodes, node.left).max(walk(nodes, node.right))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Training parameters for a single tree
#[derive(Clone, Debug)]
pub struct TreeConfig {
    /// `None` grows until leaves are pure or too small to split.
    pub max_depth: Option<usize>,
    pub min_samples_leaf: usize,
    /// Candidate features drawn per split.
    pub max_features: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_leaf: 1,
            max_features: usize::MAX,
        }
    }
}

/// Split candidate with gain and tie-breaker
#[derive(Debug, Clone)]
struct SplitCandidate {
    feature_idx: usize,
    threshold: f64,
    gain: f64,
    tie_breaker: SplitTieBreaker,
}

impl SplitCandidate {
    fn new(feature_idx: usize, threshold: f64, gain: f64) -> Self {
        Self {
            feature_idx,
            threshold,
            gain,
            tie_breaker: SplitTieBreaker::new(feature_idx, threshold),
        }
    }

    fn beats(&self, other: &SplitCandidate) -> bool {
        self.gain > other.gain || (self.gain == other.gain && self.tie_breaker < other.tie_breaker)
    }
}

/// Build a classification tree over a (possibly repeated) sample of rows.
pub struct CartBuilder<'a> {
    config: TreeConfig,
    features: &'a Array2<f64>,
    labels: &'a [bool],
}

impl<'a> CartBuilder<'a> {
    pub fn new(features: &'a Array2<f64>, labels: &'a [bool], config: TreeConfig) -> Self {
        Self {
            config,
            features,
            labels,
        }
    }

    /// Build a tree from the rows named by `sample`.
    pub fn build(&self, sample: &[usize], rng: &mut LcgRng) -> Tree {
        let mut nodes = Vec::new();
        self.build_node(sample, 0, &mut nodes, rng);
        Tree { nodes }
    }

    fn build_node(
        &self,
        indices: &[usize],
        depth: usize,
        nodes: &mut Vec<Node>,
        rng: &mut LcgRng,
    ) -> usize {
        let current_idx = nodes.len();
        let positives = self.count_positives(indices);
        let leaf_value = if indices.is_empty() {
            0.0
        } else {
            positives as f64 / indices.len() as f64
        };

        let pure = positives == 0 || positives == indices.len();
        let depth_reached = self.config.max_depth.is_some_and(|max| depth >= max);
        if pure || depth_reached || indices.len() < 2 * self.config.min_samples_leaf {
            nodes.push(Node::leaf(leaf_value));
            return current_idx;
        }

        let Some(split) = self.find_best_split(indices, rng) else {
            nodes.push(Node::leaf(leaf_value));
            return current_idx;
        };

        let (left_indices, right_indices) =
            self.split_samples(indices, split.feature_idx, split.threshold);

        // Reserve space for current node
        nodes.push(Node {
            feature_index: split.feature_idx,
            threshold: split.threshold,
            left: 0,
            right: 0,
            value: None,
        });

        let left_idx = self.build_node(&left_indices, depth + 1, nodes, rng);
        let right_idx = self.build_node(&right_indices, depth + 1, nodes, rng);

        nodes[current_idx].left = left_idx;
        nodes[current_idx].right = right_idx;

        current_idx
    }

    fn find_best_split(&self, indices: &[usize], rng: &mut LcgRng) -> Option<SplitCandidate> {
        let n_features = self.features.ncols();
        let mut candidates = rng.sample_indices(n_features, self.config.max_features.max(1));
        candidates.sort_unstable();

        let total = indices.len();
        let total_pos = self.count_positives(indices);
        let parent_gini = gini(total_pos, total);
        let min_leaf = self.config.min_samples_leaf.max(1);

        let mut best: Option<SplitCandidate> = None;

        for feature_idx in candidates {
            let mut sorted: Vec<(f64, bool)> = indices
                .iter()
                .map(|&i| (self.features[[i, feature_idx]], self.labels[i]))
                .collect();
            sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

            // Sweep left to right, evaluating a split between distinct values
            let mut left_pos = 0;
            for k in 0..sorted.len() - 1 {
                if sorted[k].1 {
                    left_pos += 1;
                }
                let left_n = k + 1;
                let right_n = total - left_n;
                if sorted[k].0 == sorted[k + 1].0 || left_n < min_leaf || right_n < min_leaf {
                    continue;
                }

                let right_pos = total_pos - left_pos;
                let weighted = (left_n as f64 * gini(left_pos, left_n)
                    + right_n as f64 * gini(right_pos, right_n))
                    / total as f64;
                let gain = parent_gini - weighted;
                if gain <= MIN_GAIN {
                    continue;
                }

                let threshold = (sorted[k].0 + sorted[k + 1].0) / 2.0;
                let candidate = SplitCandidate::new(feature_idx, threshold, gain);
                best = match best {
                    Some(current) if !candidate.beats(&current) => Some(current),
                    _ => Some(candidate),
                };
            }
        }

        best
    }

    fn split_samples(
        &self,
        indices: &[usize],
        feature_idx: usize,
        threshold: f64,
    ) -> (Vec<usize>, Vec<usize>) {
        indices
            .iter()
            .copied()
            .partition(|&i| self.features[[i, feature_idx]] <= threshold)
    }

    fn count_positives(&self, indices: &[usize]) -> usize {
        indices.iter().filter(|&&i| self.labels[i]).count()
    }
}

/// Gini impurity of a node with `positives` out of `n` samples.
fn gini(positives: usize, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = positives as f64 / n as f64;
    1.0 - p * p - (1.0 - p) * (1.0 - p)
}
