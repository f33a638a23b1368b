//! Inference against the currently published artifact.

use std::cmp::Ordering;
use std::sync::Arc;

use ndarray::Array2;
use parking_lot::RwLock;

use crate::error::{PipelineError, Result};
use crate::features::{FeatureBuilder, FeatureVector};
use crate::registry::ModelRegistry;
use crate::trainer::ModelArtifact;
use crate::types::{Entrant, RaceKey, RaceSessionRecord};

/// Ranked `(driver_id, win_probability)` pairs.
pub type Ranking = Vec<(String, f64)>;

/// Serves predictions from a shared, swappable artifact.
///
/// Readers clone the `Arc` under a short read lock and score without
/// holding it, so a reload never blocks or alters an in-flight prediction.
pub struct Predictor {
    registry: ModelRegistry,
    current: RwLock<Option<Arc<ModelArtifact>>>,
}

impl Predictor {
    /// Open against `registry`, loading the current artifact if there is one.
    pub fn open(registry: ModelRegistry) -> Result<Self> {
        let current = match registry.load() {
            Ok(artifact) => {
                tracing::info!(version = %artifact.version, "model loaded");
                Some(Arc::new(artifact))
            }
            Err(PipelineError::NoModelAvailable) => {
                tracing::warn!(dir = %registry.dir().display(), "registry has no published model");
                None
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            registry,
            current: RwLock::new(current),
        })
    }

    pub fn snapshot(&self) -> Option<Arc<ModelArtifact>> {
        self.current.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.current.read().is_some()
    }

    /// Swap in whatever the registry currently publishes.
    pub fn reload(&self) -> Result<Arc<ModelArtifact>> {
        let artifact = Arc::new(self.registry.load()?);
        let previous = self.current.write().replace(artifact.clone());
        tracing::info!(
            from = previous.as_ref().map(|a| a.version.as_str()).unwrap_or("none"),
            to = %artifact.version,
            "model reloaded"
        );
        Ok(artifact)
    }

    /// Score prepared feature vectors with the current artifact.
    pub fn predict(&self, features: &[FeatureVector]) -> Result<Ranking> {
        let artifact = self.snapshot().ok_or(PipelineError::NoModelAvailable)?;
        predict_with(&artifact, features)
    }

    /// Build features for an upcoming race from `history` and score them.
    ///
    /// Features are built with the same artifact snapshot that scores them.
    pub fn predict_race(
        &self,
        history: &[RaceSessionRecord],
        race: &RaceKey,
        entrants: &[Entrant],
    ) -> Result<(Arc<ModelArtifact>, Ranking)> {
        let artifact = self.snapshot().ok_or(PipelineError::NoModelAvailable)?;
        let builder = FeatureBuilder::new(artifact.schema.clone());
        let vectors = builder.build(history, race, entrants);
        let ranking = predict_with(&artifact, &vectors)?;
        Ok((artifact, ranking))
    }
}

/// Validate every vector, then score them all with `artifact`.
///
/// Probabilities are independent per driver and need not sum to 1.
pub fn predict_with(artifact: &ModelArtifact, features: &[FeatureVector]) -> Result<Ranking> {
    for vector in features {
        artifact.schema.validate(&artifact.encoding, vector)?;
    }
    if features.is_empty() {
        return Ok(Vec::new());
    }

    let n_cols = artifact.schema.feature_names.len();
    let flat: Vec<f64> = features.iter().flat_map(|v| v.values.iter().copied()).collect();
    let matrix = Array2::from_shape_vec((features.len(), n_cols), flat)
        .map_err(|e| PipelineError::SchemaMismatch(e.to_string()))?;

    let probabilities = artifact.predict_proba(&matrix)?;
    let pairs = features
        .iter()
        .map(|v| v.driver_id.clone())
        .zip(probabilities)
        .collect();

    Ok(rank(pairs))
}

/// Sort by probability descending, ties by driver id ascending.
pub fn rank(mut pairs: Ranking) -> Ranking {
    pairs.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureSchema, Vocabulary, NUM_FEATURES};
    use crate::metrics::EvaluationReport;
    use crate::model::cart::{Node, Tree};
    use crate::model::{Hyperparameters, RandomForest};
    use chrono::Utc;

    /// Forest with one stump: grid_position <= 2.5 -> 0.8, else 0.1.
    fn artifact(version: &str) -> ModelArtifact {
        let schema = FeatureSchema::new(
            5,
            Vocabulary::from_ids(["alo", "ham", "ver"]),
            Vocabulary::from_ids(["aston", "mercedes", "red_bull"]),
        );
        let encoding = schema.fingerprint();
        let stump = Tree {
            nodes: vec![
                Node {
                    feature_index: 0,
                    threshold: 2.5,
                    left: 1,
                    right: 2,
                    value: None,
                },
                Node {
                    feature_index: 0,
                    threshold: 0.0,
                    left: 0,
                    right: 0,
                    value: Some(0.8),
                },
                Node {
                    feature_index: 0,
                    threshold: 0.0,
                    left: 0,
                    right: 0,
                    value: Some(0.1),
                },
            ],
        };
        ModelArtifact {
            version: version.to_string(),
            created_at: Utc::now(),
            forest: RandomForest {
                num_features: NUM_FEATURES,
                trees: vec![stump],
            },
            schema,
            encoding,
            hyperparameters: Hyperparameters::default(),
            evaluation: EvaluationReport::default(),
            train_samples: 0,
        }
    }

    fn vector(artifact: &ModelArtifact, driver: &str, grid: f64) -> FeatureVector {
        let mut values = vec![0.0; NUM_FEATURES];
        values[0] = grid;
        FeatureVector {
            race_id: "2023-03".to_string(),
            driver_id: driver.to_string(),
            columns: artifact.schema.feature_names.clone(),
            values,
            encoding: artifact.encoding.clone(),
        }
    }

    fn predictor_with(artifact: &ModelArtifact) -> (tempfile::TempDir, Predictor) {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path()).unwrap();
        registry.save(artifact).unwrap();
        (dir, Predictor::open(registry).unwrap())
    }

    #[test]
    fn test_rank_orders_and_breaks_ties() {
        let ranked = rank(vec![
            ("ver".to_string(), 0.4),
            ("alo".to_string(), 0.4),
            ("ham".to_string(), 0.9),
        ]);
        let order: Vec<&str> = ranked.iter().map(|(d, _)| d.as_str()).collect();
        assert_eq!(order, vec!["ham", "alo", "ver"]);
    }

    #[test]
    fn test_predict_ranks_drivers() {
        let artifact = artifact("v1");
        let (_dir, predictor) = predictor_with(&artifact);

        let features = vec![
            vector(&artifact, "ham", 5.0),
            vector(&artifact, "ver", 1.0),
            vector(&artifact, "alo", 9.0),
        ];
        let ranking = predictor.predict(&features).unwrap();

        assert_eq!(ranking.len(), 3);
        assert_eq!(ranking[0], ("ver".to_string(), 0.8));
        assert_eq!(ranking[1].0, "alo");
        assert_eq!(ranking[2].0, "ham");
    }

    #[test]
    fn test_no_model_available() {
        let dir = tempfile::tempdir().unwrap();
        let predictor = Predictor::open(ModelRegistry::new(dir.path()).unwrap()).unwrap();

        assert!(!predictor.is_ready());
        assert!(matches!(
            predictor.predict(&[]),
            Err(PipelineError::NoModelAvailable)
        ));
        assert!(matches!(
            predictor.reload(),
            Err(PipelineError::NoModelAvailable)
        ));
    }

    #[test]
    fn test_extra_field_rejected_before_scoring() {
        let artifact = artifact("v1");
        let mut bad = vector(&artifact, "ham", 5.0);
        bad.columns.push("finish_position".to_string());
        bad.values.push(1.0);

        let features = vec![vector(&artifact, "ver", 1.0), bad];
        let err = predict_with(&artifact, &features).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch(ref m) if m.contains("finish_position")));
    }

    #[test]
    fn test_missing_field_rejected() {
        let artifact = artifact("v1");
        let mut bad = vector(&artifact, "ham", 5.0);
        bad.columns.remove(3);
        bad.values.remove(3);

        assert!(matches!(
            predict_with(&artifact, &[bad]),
            Err(PipelineError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_reload_keeps_old_snapshot_alive() {
        let first = artifact("v1");
        let (dir, predictor) = predictor_with(&first);
        let held = predictor.snapshot().unwrap();

        let registry = ModelRegistry::new(dir.path()).unwrap();
        registry.save(&artifact("v2")).unwrap();
        predictor.reload().unwrap();

        assert_eq!(held.version, "v1");
        assert_eq!(predictor.snapshot().unwrap().version, "v2");
    }

    #[test]
    fn test_predict_race_builds_with_artifact_schema() {
        let artifact = artifact("v1");
        let (_dir, predictor) = predictor_with(&artifact);

        let race = RaceKey {
            race_id: "2023-03".to_string(),
            season: 2023,
            round: 3,
            circuit_id: "bahrain".to_string(),
        };
        let entrants = vec![
            Entrant {
                driver_id: "ver".to_string(),
                team_id: "red_bull".to_string(),
                grid_position: Some(1),
            },
            Entrant {
                driver_id: "pia".to_string(),
                team_id: "mclaren".to_string(),
                grid_position: None,
            },
        ];
        let (used, ranking) = predictor.predict_race(&[], &race, &entrants).unwrap();

        assert_eq!(used.version, "v1");
        // Unknown grid encodes as 0.0 which falls on the left branch
        assert_eq!(ranking, vec![("pia".to_string(), 0.8), ("ver".to_string(), 0.8)]);
    }

    #[test]
    fn test_prepared_vectors_score_like_predict_race() {
        let artifact = artifact("v1");
        let (_dir, predictor) = predictor_with(&artifact);

        let race = RaceKey {
            race_id: "2023-03".to_string(),
            season: 2023,
            round: 3,
            circuit_id: "bahrain".to_string(),
        };
        let entrants = vec![
            Entrant {
                driver_id: "ham".to_string(),
                team_id: "mercedes".to_string(),
                grid_position: Some(4),
            },
            Entrant {
                driver_id: "alo".to_string(),
                team_id: "aston".to_string(),
                grid_position: Some(2),
            },
        ];

        // Vectors written out and read back, as `features` then `predict --features` do
        let vectors = FeatureBuilder::new(artifact.schema.clone()).build(&[], &race, &entrants);
        let json = serde_json::to_string(&vectors).unwrap();
        let prepared: Vec<FeatureVector> = serde_json::from_str(&json).unwrap();
        assert_eq!(prepared[0].get("grid_position"), Some(2.0));

        let (_, expected) = predictor.predict_race(&[], &race, &entrants).unwrap();
        assert_eq!(predictor.predict(&prepared).unwrap(), expected);
        assert_eq!(expected[0], ("alo".to_string(), 0.8));
    }
}
