//! Random forest of CART classification trees.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::cart::{CartBuilder, Tree, TreeConfig};
use super::rng::LcgRng;
use crate::error::{PipelineError, Result};

fn default_ensemble_size() -> usize {
    100
}

fn default_random_seed() -> u64 {
    42
}

fn default_min_samples_leaf() -> usize {
    1
}

/// Forest training configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hyperparameters {
    #[serde(default = "default_ensemble_size")]
    pub ensemble_size: usize,
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
    /// `None` grows each tree until its leaves are pure.
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: usize,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            ensemble_size: default_ensemble_size(),
            random_seed: default_random_seed(),
            max_depth: None,
            min_samples_leaf: default_min_samples_leaf(),
        }
    }
}

impl Hyperparameters {
    pub fn validate(&self) -> Result<()> {
        if self.ensemble_size == 0 {
            return Err(PipelineError::Training(
                "ensemble_size must be at least 1".to_string(),
            ));
        }
        if self.max_depth == Some(0) {
            return Err(PipelineError::Training(
                "max_depth must be at least 1 when set".to_string(),
            ));
        }
        if self.min_samples_leaf == 0 {
            return Err(PipelineError::Training(
                "min_samples_leaf must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fitted forest; the positive-class probability is the mean leaf value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub num_features: usize,
    pub trees: Vec<Tree>,
}

impl RandomForest {
    /// Fit on `features` (one row per example) and binary `labels`.
    pub fn fit(features: &Array2<f64>, labels: &[bool], params: &Hyperparameters) -> Result<Self> {
        params.validate()?;

        let n_samples = features.nrows();
        if n_samples == 0 || n_samples != labels.len() {
            return Err(PipelineError::Training(format!(
                "{} feature rows for {} labels",
                n_samples,
                labels.len()
            )));
        }

        let num_features = features.ncols();
        let tree_config = TreeConfig {
            max_depth: params.max_depth,
            min_samples_leaf: params.min_samples_leaf,
            max_features: max_features(num_features),
        };
        let builder = CartBuilder::new(features, labels, tree_config);

        let mut rng = LcgRng::new(params.random_seed);
        let mut trees = Vec::with_capacity(params.ensemble_size);

        for tree_idx in 0..params.ensemble_size {
            let mut tree_rng = rng.fork();
            let sample: Vec<usize> = (0..n_samples)
                .map(|_| tree_rng.next_range(n_samples))
                .collect();

            let tree = builder.build(&sample, &mut tree_rng);
            tracing::trace!(
                tree = tree_idx + 1,
                nodes = tree.nodes.len(),
                depth = tree.depth(),
                "tree fitted"
            );
            trees.push(tree);
        }

        Ok(Self {
            num_features,
            trees,
        })
    }

    /// Positive-class probability per row, each in `[0, 1]`.
    pub fn predict_proba(&self, features: &Array2<f64>) -> Result<Vec<f64>> {
        if features.ncols() != self.num_features {
            return Err(PipelineError::SchemaMismatch(format!(
                "forest expects {} features, got {}",
                self.num_features,
                features.ncols()
            )));
        }
        if self.trees.is_empty() {
            return Err(PipelineError::Training("forest has no trees".to_string()));
        }

        let n_trees = self.trees.len() as f64;
        Ok(features
            .rows()
            .into_iter()
            .map(|row| {
                let row = row.to_vec();
                let sum: f64 = self.trees.iter().map(|t| t.predict(&row)).sum();
                (sum / n_trees).clamp(0.0, 1.0)
            })
            .collect())
    }
}

/// Candidate features per split: floor(sqrt(n)), at least one.
fn max_features(num_features: usize) -> usize {
    ((num_features as f64).sqrt() as usize).max(1)
}
