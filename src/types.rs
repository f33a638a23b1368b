//! Race records and request/response types for the F1 prediction API.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Finishing result of a driver in a race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Finish {
    Classified(u32),
    DidNotFinish,
}

impl Finish {
    /// Parse a results-table cell: a position number, or DNF/DNS/DSQ/R/NC.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw.to_ascii_uppercase().as_str() {
            "DNF" | "DNS" | "DSQ" | "DQ" | "R" | "NC" | "RET" => Some(Finish::DidNotFinish),
            _ => raw
                .parse::<u32>()
                .ok()
                .filter(|p| *p >= 1)
                .map(Finish::Classified),
        }
    }

    pub fn is_win(&self) -> bool {
        matches!(self, Finish::Classified(1))
    }

    /// Position used for averaging; a DNF counts as the back of the field.
    pub fn position_or(&self, field_size: u32) -> u32 {
        match self {
            Finish::Classified(p) => *p,
            Finish::DidNotFinish => field_size,
        }
    }
}

/// Optional lap-level aggregates for one driver in one race.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LapStats {
    pub best_lap_ms: Option<f64>,
    pub avg_lap_ms: Option<f64>,
    pub pit_stops: Option<u32>,
}

/// One row per (race, driver). Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceSessionRecord {
    pub race_id: String,
    pub season: i32,
    pub round: u32,
    pub circuit_id: String,
    #[serde(default)]
    pub race_date: Option<NaiveDate>,
    pub driver_id: String,
    pub team_id: String,
    /// Grid slot; `None` for pit-lane starts or unknown grids.
    pub grid_position: Option<u32>,
    pub finish: Finish,
    pub points: f64,
    #[serde(default)]
    pub laps: Option<LapStats>,
}

impl RaceSessionRecord {
    /// Ordering key of the race this row belongs to.
    pub fn race_order(&self) -> (i32, u32) {
        (self.season, self.round)
    }

    pub fn race_key(&self) -> RaceKey {
        RaceKey {
            race_id: self.race_id.clone(),
            season: self.season,
            round: self.round,
            circuit_id: self.circuit_id.clone(),
        }
    }
}

/// Identity of a race; races are ordered by `(season, round)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RaceKey {
    pub race_id: String,
    pub season: i32,
    pub round: u32,
    pub circuit_id: String,
}

impl RaceKey {
    pub fn order(&self) -> (i32, u32) {
        (self.season, self.round)
    }

    /// True when `record` belongs to a race strictly before this one.
    pub fn is_after(&self, record: &RaceSessionRecord) -> bool {
        record.race_order() < self.order()
    }
}

/// A driver entering the race being predicted. Carries pre-race data only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entrant {
    pub driver_id: String,
    pub team_id: String,
    #[serde(default)]
    pub grid_position: Option<u32>,
}

/// Prediction request from the serving layer.
#[derive(Debug, Clone, Deserialize)]
pub struct PredictRequest {
    pub race: RaceKey,
    pub drivers: Vec<Entrant>,
}

/// One ranked driver in a prediction response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedDriver {
    pub driver_id: String,
    pub win_probability: f64,
}

/// Prediction response.
#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub race_id: String,
    pub model_version: String,
    pub predicted_winner: Option<String>,
    pub ranking: Vec<RankedDriver>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Model info response
#[derive(Debug, Serialize)]
pub struct ModelInfoResponse {
    pub model_version: String,
    pub created_at: String,
    pub num_features: usize,
    pub feature_names: Vec<String>,
    pub encoding: String,
    pub ensemble_size: usize,
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
