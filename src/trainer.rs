//! Model training and the artifact it produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dataset::Partition;
use crate::error::{PipelineError, Result};
use crate::features::FeatureSchema;
use crate::metrics::EvaluationReport;
use crate::model::{Hyperparameters, RandomForest};

/// A trained model together with everything needed to use it safely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub schema: FeatureSchema,
    /// Fingerprint of `schema` at training time.
    pub encoding: String,
    pub forest: RandomForest,
    pub hyperparameters: Hyperparameters,
    pub evaluation: EvaluationReport,
    pub train_samples: usize,
}

impl ModelArtifact {
    /// Positive-class probabilities for validated rows.
    pub fn predict_proba(&self, features: &ndarray::Array2<f64>) -> Result<Vec<f64>> {
        self.forest.predict_proba(features)
    }
}

/// Random-forest trainer bound to the feature schema in force.
pub struct Trainer {
    schema: FeatureSchema,
    encoding: String,
    params: Hyperparameters,
}

impl Trainer {
    pub fn new(schema: FeatureSchema, params: Hyperparameters) -> Self {
        let encoding = schema.fingerprint();
        Self {
            schema,
            encoding,
            params,
        }
    }

    /// Fit on `train`, evaluate on `test`.
    ///
    /// Fails when `train` is empty or single-class, or when either partition
    /// was built with different columns or encoding than this schema.
    pub fn train(
        &self,
        train: &Partition,
        test: &Partition,
    ) -> Result<(ModelArtifact, EvaluationReport)> {
        self.params.validate()?;
        self.check_partition("train", train)?;
        self.check_partition("test", test)?;

        if train.is_empty() {
            return Err(PipelineError::Training("train partition is empty".to_string()));
        }
        let positives = train.positives();
        if positives == 0 || positives == train.len() {
            return Err(PipelineError::Training(format!(
                "train partition has a single class ({} of {} positive)",
                positives,
                train.len()
            )));
        }

        tracing::info!(
            samples = train.len(),
            features = train.columns.len(),
            trees = self.params.ensemble_size,
            seed = self.params.random_seed,
            "training random forest"
        );

        let x_train = train.to_array()?;
        let forest = RandomForest::fit(&x_train, &train.labels, &self.params)?;

        let evaluation = if test.is_empty() {
            EvaluationReport::default()
        } else {
            let probs = forest.predict_proba(&test.to_array()?)?;
            EvaluationReport::evaluate(&probs, &test.labels)
        };

        tracing::info!(
            accuracy = evaluation.accuracy,
            brier = evaluation.brier_score,
            win_f1 = evaluation.win.f1,
            "evaluation finished"
        );

        let created_at = Utc::now();
        let artifact = ModelArtifact {
            version: created_at.format("%Y%m%dT%H%M%S%3fZ").to_string(),
            created_at,
            schema: self.schema.clone(),
            encoding: self.encoding.clone(),
            forest,
            hyperparameters: self.params.clone(),
            evaluation: evaluation.clone(),
            train_samples: train.len(),
        };

        Ok((artifact, evaluation))
    }

    fn check_partition(&self, side: &str, partition: &Partition) -> Result<()> {
        if partition.columns != self.schema.feature_names {
            return Err(PipelineError::Training(format!(
                "{} partition columns {:?} differ from schema {:?}",
                side, partition.columns, self.schema.feature_names
            )));
        }
        if partition.encoding != self.encoding {
            return Err(PipelineError::Training(format!(
                "{} partition encoding {} differs from schema encoding {}",
                side, partition.encoding, self.encoding
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{Vocabulary, NUM_FEATURES};

    fn schema() -> FeatureSchema {
        FeatureSchema::new(5, Vocabulary::from_ids(["a", "b"]), Vocabulary::from_ids(["t"]))
    }

    fn partition(schema: &FeatureSchema, labels: Vec<bool>) -> Partition {
        let rows = labels
            .iter()
            .enumerate()
            .map(|(i, win)| {
                let mut row = vec![0.0; NUM_FEATURES];
                row[0] = if *win { 1.0 } else { 5.0 + i as f64 };
                row
            })
            .collect();
        Partition {
            columns: schema.feature_names.clone(),
            encoding: schema.fingerprint(),
            race_ids: labels.iter().map(|_| "r1".to_string()).collect(),
            driver_ids: (0..labels.len()).map(|i| format!("d{}", i)).collect(),
            rows,
            labels,
        }
    }

    fn params() -> Hyperparameters {
        Hyperparameters {
            ensemble_size: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_train_produces_artifact_and_report() {
        let schema = schema();
        let train = partition(&schema, vec![true, false, false, true, false, false]);
        let test = partition(&schema, vec![true, false, false]);

        let (artifact, report) = Trainer::new(schema.clone(), params()).train(&train, &test).unwrap();
        assert_eq!(artifact.schema, schema);
        assert_eq!(artifact.encoding, schema.fingerprint());
        assert_eq!(artifact.forest.trees.len(), 10);
        assert_eq!(artifact.train_samples, 6);
        assert_eq!(report.samples, 3);
        assert_eq!(artifact.evaluation, report);
    }

    #[test]
    fn test_single_class_rejected() {
        let schema = schema();
        let train = partition(&schema, vec![false, false, false]);
        let test = partition(&schema, vec![true, false]);
        let result = Trainer::new(schema, params()).train(&train, &test);
        assert!(matches!(result, Err(PipelineError::Training(_))));
    }

    #[test]
    fn test_empty_train_rejected() {
        let schema = schema();
        let train = partition(&schema, vec![]);
        let test = partition(&schema, vec![true, false]);
        let result = Trainer::new(schema, params()).train(&train, &test);
        assert!(matches!(result, Err(PipelineError::Training(_))));
    }

    #[test]
    fn test_foreign_encoding_rejected() {
        let schema = schema();
        let mut train = partition(&schema, vec![true, false, false]);
        train.encoding = "stale".to_string();
        let test = partition(&schema, vec![true, false]);
        let result = Trainer::new(schema, params()).train(&train, &test);
        assert!(matches!(result, Err(PipelineError::Training(ref m)) if m.contains("encoding")));
    }
}
