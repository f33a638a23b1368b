//! Training pipeline: records to a published artifact.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dataset::{self, LabeledExample};
use crate::error::{PipelineError, Result};
use crate::features::{FeatureBuilder, FeatureSchema, FeatureVector, Vocabulary};
use crate::metrics::EvaluationReport;
use crate::model::Hyperparameters;
use crate::trainer::{ModelArtifact, Trainer};
use crate::types::RaceSessionRecord;

/// Everything that shapes a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingOptions {
    pub rolling_window: usize,
    pub test_fraction: f64,
    pub split_seed: u64,
    pub hyperparameters: Hyperparameters,
}

impl TrainingOptions {
    pub fn validate(&self) -> Result<()> {
        check_window(self.rolling_window)?;
        self.hyperparameters.validate()
    }
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            rolling_window: 5,
            test_fraction: 0.2,
            split_seed: 42,
            hyperparameters: Hyperparameters::default(),
        }
    }
}

fn check_window(rolling_window: usize) -> Result<()> {
    if rolling_window == 0 {
        return Err(PipelineError::Training(
            "rolling_window must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Schema for a record set: window plus vocabularies of every id seen.
///
/// With a `previous` schema its vocabularies are extended rather than
/// rebuilt, so ids keep the codes earlier models were trained on.
pub fn schema_for(
    records: &[RaceSessionRecord],
    rolling_window: usize,
    previous: Option<&FeatureSchema>,
) -> Result<FeatureSchema> {
    check_window(rolling_window)?;

    let (drivers, teams) = match previous {
        Some(schema) => (schema.drivers.clone(), schema.teams.clone()),
        None => (Vocabulary::default(), Vocabulary::default()),
    };
    Ok(FeatureSchema::new(
        rolling_window,
        drivers.extended(records.iter().map(|r| r.driver_id.as_str())),
        teams.extended(records.iter().map(|r| r.team_id.as_str())),
    ))
}

/// Race ids in race order.
pub fn races_in_order(records: &[RaceSessionRecord]) -> Vec<String> {
    let mut races: BTreeMap<(i32, u32), String> = BTreeMap::new();
    for record in records {
        races
            .entry(record.race_order())
            .or_insert_with(|| record.race_id.clone());
    }
    races.into_values().collect()
}

/// Pre-race features for every historical race, in race order.
pub fn feature_table(records: &[RaceSessionRecord], builder: &FeatureBuilder) -> Vec<FeatureVector> {
    races_in_order(records)
        .iter()
        .filter_map(|race_id| builder.build_for_race(records, race_id))
        .flat_map(|(_, vectors)| vectors)
        .collect()
}

/// Pair each historical feature vector with whether that driver won.
pub fn labeled_examples(
    records: &[RaceSessionRecord],
    builder: &FeatureBuilder,
) -> Vec<LabeledExample> {
    feature_table(records, builder)
        .into_iter()
        .map(|features| {
            let win = records.iter().any(|r| {
                r.race_id == features.race_id
                    && r.driver_id == features.driver_id
                    && r.finish.is_win()
            });
            LabeledExample { features, win }
        })
        .collect()
}

/// Build features, split, fit and evaluate. Nothing is persisted.
///
/// `previous` is the schema of the currently published model, if any.
pub fn train_from_records(
    records: &[RaceSessionRecord],
    options: &TrainingOptions,
    previous: Option<&FeatureSchema>,
) -> Result<(ModelArtifact, EvaluationReport)> {
    options.validate()?;

    let schema = schema_for(records, options.rolling_window, previous)?;
    tracing::info!(
        records = records.len(),
        drivers = schema.drivers.len(),
        teams = schema.teams.len(),
        window = schema.rolling_window,
        "building training set"
    );

    let builder = FeatureBuilder::new(schema.clone());
    let examples = labeled_examples(records, &builder);
    let (train, test) = dataset::assemble(&examples, options.test_fraction, options.split_seed)?;

    Trainer::new(schema, options.hyperparameters.clone()).train(&train, &test)
}
