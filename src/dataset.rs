//! Dataset assembly: labeled feature vectors into train/test partitions.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::features::FeatureVector;
use crate::model::LcgRng;

/// Columns that describe the outcome of the race being labeled.
pub const LABEL_COLUMNS: [&str; 10] = [
    "win",
    "finish_position",
    "position",
    "points",
    "status",
    "laps_completed",
    "best_lap_ms",
    "avg_lap_ms",
    "pit_stops",
    "fastest_lap",
];

/// A feature vector with its training label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledExample {
    pub features: FeatureVector,
    /// True iff the driver finished first in that race.
    pub win: bool,
}

/// One side of a split. Rows keep the order they had in the input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub columns: Vec<String>,
    pub encoding: String,
    pub race_ids: Vec<String>,
    pub driver_ids: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub labels: Vec<bool>,
}

impl Partition {
    fn empty(columns: Vec<String>, encoding: String) -> Self {
        Self {
            columns,
            encoding,
            race_ids: Vec::new(),
            driver_ids: Vec::new(),
            rows: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|l| **l).count()
    }

    /// Feature matrix of shape (rows, columns).
    pub fn to_array(&self) -> Result<Array2<f64>> {
        let n_cols = self.columns.len();
        let flat: Vec<f64> = self.rows.iter().flatten().copied().collect();
        Array2::from_shape_vec((self.rows.len(), n_cols), flat)
            .map_err(|e| PipelineError::SchemaMismatch(format!("ragged feature rows: {}", e)))
    }

    fn has_both_classes(&self) -> bool {
        let pos = self.positives();
        pos > 0 && pos < self.labels.len()
    }
}

/// Split `examples` into stratified, reproducible train/test partitions.
///
/// Each label class contributes `round(n * test_fraction)` rows to the test
/// side, clamped to `[1, n - 1]`. Outcome columns are removed from the
/// feature side.
pub fn assemble(
    examples: &[LabeledExample],
    test_fraction: f64,
    seed: u64,
) -> Result<(Partition, Partition)> {
    if examples.len() < 2 {
        return Err(PipelineError::InsufficientData(format!(
            "need at least 2 examples, got {}",
            examples.len()
        )));
    }
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(PipelineError::InsufficientData(format!(
            "test_fraction must be in (0, 1), got {}",
            test_fraction
        )));
    }

    let first = &examples[0].features;
    let keep: Vec<usize> = first
        .columns
        .iter()
        .enumerate()
        .filter(|(_, name)| !LABEL_COLUMNS.contains(&name.as_str()))
        .map(|(i, _)| i)
        .collect();
    let stripped = first.columns.len() - keep.len();
    if stripped > 0 {
        tracing::warn!(stripped, "removed outcome columns from feature set");
    }
    let columns: Vec<String> = keep.iter().map(|&i| first.columns[i].clone()).collect();

    for example in examples {
        let fv = &example.features;
        if fv.columns != first.columns || fv.values.len() != fv.columns.len() {
            return Err(PipelineError::SchemaMismatch(format!(
                "example {}/{} has different columns",
                fv.race_id, fv.driver_id
            )));
        }
        if fv.encoding != first.encoding {
            return Err(PipelineError::SchemaMismatch(format!(
                "example {}/{} has encoding {}, expected {}",
                fv.race_id, fv.driver_id, fv.encoding, first.encoding
            )));
        }
    }

    let mut rng = LcgRng::new(seed);
    let mut test_mask = vec![false; examples.len()];

    for class in [false, true] {
        let mut members: Vec<usize> = examples
            .iter()
            .enumerate()
            .filter(|(_, e)| e.win == class)
            .map(|(i, _)| i)
            .collect();
        let n = members.len();
        if n < 2 {
            continue;
        }

        rng.shuffle(&mut members);
        let n_test = ((n as f64 * test_fraction).round() as usize).clamp(1, n - 1);
        for &i in &members[..n_test] {
            test_mask[i] = true;
        }
    }

    let mut train = Partition::empty(columns.clone(), first.encoding.clone());
    let mut test = Partition::empty(columns, first.encoding.clone());

    for (example, in_test) in examples.iter().zip(&test_mask) {
        let target = if *in_test { &mut test } else { &mut train };
        let fv = &example.features;
        target.race_ids.push(fv.race_id.clone());
        target.driver_ids.push(fv.driver_id.clone());
        target.rows.push(keep.iter().map(|&i| fv.values[i]).collect());
        target.labels.push(example.win);
    }

    if !train.has_both_classes() || !test.has_both_classes() {
        return Err(PipelineError::InsufficientData(format!(
            "both partitions need winners and non-winners \
             (train {}/{} positive, test {}/{} positive)",
            train.positives(),
            train.len(),
            test.positives(),
            test.len()
        )));
    }

    tracing::info!(
        train = train.len(),
        test = test.len(),
        train_positive = train.positives(),
        test_positive = test.positives(),
        "dataset assembled"
    );

    Ok((train, test))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(race: usize, driver: usize, win: bool) -> LabeledExample {
        LabeledExample {
            features: FeatureVector {
                race_id: format!("r{}", race),
                driver_id: format!("d{}", driver),
                columns: vec!["grid_position".to_string(), "career_starts".to_string()],
                values: vec![driver as f64 + 1.0, race as f64],
                encoding: "enc".to_string(),
            },
            win,
        }
    }

    fn examples(races: usize, drivers: usize) -> Vec<LabeledExample> {
        (0..races)
            .flat_map(|r| (0..drivers).map(move |d| example(r, d, d == r % drivers)))
            .collect()
    }

    #[test]
    fn test_assemble_is_deterministic() {
        let data = examples(10, 5);
        let a = assemble(&data, 0.2, 42).unwrap();
        let b = assemble(&data, 0.2, 42).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_stratified_counts() {
        let data = examples(10, 5);
        let (train, test) = assemble(&data, 0.2, 7).unwrap();

        assert_eq!(train.len() + test.len(), 50);
        // 10 winners -> 2 in test, 40 others -> 8 in test
        assert_eq!(test.positives(), 2);
        assert_eq!(test.len(), 10);
        assert_eq!(train.positives(), 8);
    }

    #[test]
    fn test_every_example_in_one_partition() {
        let data = examples(6, 4);
        let (train, test) = assemble(&data, 0.3, 3).unwrap();

        let mut keys: Vec<(String, String)> = train
            .race_ids
            .iter()
            .zip(&train.driver_ids)
            .chain(test.race_ids.iter().zip(&test.driver_ids))
            .map(|(r, d)| (r.clone(), d.clone()))
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), data.len());
    }

    #[test]
    fn test_rejects_single_example() {
        let data = examples(1, 1);
        assert!(matches!(
            assemble(&data, 0.2, 42),
            Err(PipelineError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_rejects_all_false_labels() {
        let data: Vec<LabeledExample> = (0..10).map(|d| example(0, d, false)).collect();
        assert!(matches!(
            assemble(&data, 0.2, 42),
            Err(PipelineError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_rejects_bad_fraction() {
        let data = examples(4, 4);
        assert!(assemble(&data, 0.0, 42).is_err());
        assert!(assemble(&data, 1.0, 42).is_err());
    }

    #[test]
    fn test_strips_outcome_columns() {
        let mut data = examples(4, 4);
        for e in &mut data {
            e.features.columns.push("points".to_string());
            e.features.values.push(25.0);
        }
        let (train, test) = assemble(&data, 0.25, 1).unwrap();
        assert_eq!(train.columns, vec!["grid_position", "career_starts"]);
        assert!(train.rows.iter().chain(&test.rows).all(|r| r.len() == 2));
        assert_eq!(train.to_array().unwrap().ncols(), 2);
    }

    #[test]
    fn test_rejects_mixed_encodings() {
        let mut data = examples(4, 4);
        data[3].features.encoding = "other".to_string();
        assert!(matches!(
            assemble(&data, 0.25, 1),
            Err(PipelineError::SchemaMismatch(_))
        ));
    }
}
