//! Feature schema shared by training and inference.

use serde::{Deserialize, Serialize};

use super::vocabulary::Vocabulary;
use crate::error::{PipelineError, Result};

/// Feature names in model input order.
pub const FEATURE_NAMES: [&str; 17] = [
    "grid_position",
    "has_grid",
    "rolling_avg_finish",
    "rolling_dnf_rate",
    "has_history",
    "career_starts",
    "career_win_rate",
    "season_points",
    "has_season_history",
    "team_season_points",
    "team_has_season_history",
    "circuit_win_rate",
    "has_circuit_history",
    "recent_pace_ratio",
    "has_pace_history",
    "driver_code",
    "team_code",
];

/// Number of input features
pub const NUM_FEATURES: usize = FEATURE_NAMES.len();

/// Ordered feature names plus the encodings a model was trained with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub feature_names: Vec<String>,
    pub rolling_window: usize,
    pub drivers: Vocabulary,
    pub teams: Vocabulary,
}

impl FeatureSchema {
    pub fn new(rolling_window: usize, drivers: Vocabulary, teams: Vocabulary) -> Self {
        Self {
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            rolling_window,
            drivers,
            teams,
        }
    }

    /// BLAKE3 digest of the canonical JSON form.
    ///
    /// Two schemas share a fingerprint only when names, order, window and
    /// both vocabularies are identical.
    pub fn fingerprint(&self) -> String {
        // Serializing plain strings, numbers and vectors cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(blake3::hash(&bytes).as_bytes())
    }

    /// Check that `vector` has exactly this schema's fields, order and encoding.
    pub fn validate(&self, fingerprint: &str, vector: &FeatureVector) -> Result<()> {
        if vector.columns.len() != vector.values.len() {
            return Err(PipelineError::SchemaMismatch(format!(
                "driver {}: {} columns but {} values",
                vector.driver_id,
                vector.columns.len(),
                vector.values.len()
            )));
        }

        if vector.columns != self.feature_names {
            let missing: Vec<&str> = self
                .feature_names
                .iter()
                .filter(|n| !vector.columns.contains(n))
                .map(String::as_str)
                .collect();
            let extra: Vec<&str> = vector
                .columns
                .iter()
                .filter(|n| !self.feature_names.contains(n))
                .map(String::as_str)
                .collect();
            let detail = if missing.is_empty() && extra.is_empty() {
                "field order differs".to_string()
            } else {
                format!("missing {:?}, unexpected {:?}", missing, extra)
            };
            return Err(PipelineError::SchemaMismatch(format!(
                "driver {}: {}",
                vector.driver_id, detail
            )));
        }

        if vector.encoding != fingerprint {
            return Err(PipelineError::SchemaMismatch(format!(
                "driver {}: encoding {} does not match trained encoding {}",
                vector.driver_id, vector.encoding, fingerprint
            )));
        }

        Ok(())
    }
}

/// One row per (race, driver).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub race_id: String,
    pub driver_id: String,
    pub columns: Vec<String>,
    pub values: Vec<f64>,
    /// Fingerprint of the schema that produced this vector.
    pub encoding: String,
}

impl FeatureVector {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| self.values.get(i).copied())
    }
}
