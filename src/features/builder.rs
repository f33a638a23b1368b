//! Feature builder for model input.
//!
//! Turns historical session rows into one leakage-free feature vector per
//! driver entering a race.

use std::collections::HashMap;

use super::schema::{FeatureSchema, FeatureVector, NUM_FEATURES};
use crate::types::{Entrant, Finish, RaceKey, RaceSessionRecord};

/// Pre-race features for one driver, in model input order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DriverFeatures {
    // Grid (2)
    pub grid_position: f64,
    pub has_grid: f64,
    // Recent form (3)
    pub rolling_avg_finish: f64,
    pub rolling_dnf_rate: f64,
    pub has_history: f64,
    // Career (2)
    pub career_starts: f64,
    pub career_win_rate: f64,
    // Season to date (4)
    pub season_points: f64,
    pub has_season_history: f64,
    pub team_season_points: f64,
    pub team_has_season_history: f64,
    // Circuit (2)
    pub circuit_win_rate: f64,
    pub has_circuit_history: f64,
    // Pace (2)
    pub recent_pace_ratio: f64,
    pub has_pace_history: f64,
    // Identity (2)
    pub driver_code: f64,
    pub team_code: f64,
}

impl DriverFeatures {
    /// Convert to array for model input
    pub fn to_array(&self) -> [f64; NUM_FEATURES] {
        [
            // Grid (2)
            self.grid_position,
            self.has_grid,
            // Recent form (3)
            self.rolling_avg_finish,
            self.rolling_dnf_rate,
            self.has_history,
            // Career (2)
            self.career_starts,
            self.career_win_rate,
            // Season to date (4)
            self.season_points,
            self.has_season_history,
            self.team_season_points,
            self.team_has_season_history,
            // Circuit (2)
            self.circuit_win_rate,
            self.has_circuit_history,
            // Pace (2)
            self.recent_pace_ratio,
            self.has_pace_history,
            // Identity (2)
            self.driver_code,
            self.team_code,
        ]
    }
}

/// Default values for missing data.
///
/// Averages and rates default to -1.0, a value no real statistic can take,
/// and always travel with a `has_*` flag set to 0.0.
pub struct Defaults;

impl Defaults {
    pub const GRID_POSITION: f64 = 0.0;
    pub const NO_HISTORY: f64 = -1.0;
    pub const POINTS: f64 = 0.0;
}

/// Per-race facts needed to normalise a driver's row.
struct RaceSummary {
    field_size: u32,
    fastest_avg_lap_ms: Option<f64>,
}

/// Feature builder bound to one schema (window and vocabularies).
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    schema: FeatureSchema,
    fingerprint: String,
}

impl FeatureBuilder {
    pub fn new(schema: FeatureSchema) -> Self {
        let fingerprint = schema.fingerprint();
        Self {
            schema,
            fingerprint,
        }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Build features for every entrant of the race `as_of`.
    ///
    /// Only rows from races strictly before `as_of` contribute; later rows
    /// (including the target race itself) are discarded here. Output is
    /// sorted by driver identifier.
    pub fn build(
        &self,
        records: &[RaceSessionRecord],
        as_of: &RaceKey,
        entrants: &[Entrant],
    ) -> Vec<FeatureVector> {
        let history: Vec<&RaceSessionRecord> =
            records.iter().filter(|r| as_of.is_after(r)).collect();

        let dropped = records.len() - history.len();
        if dropped > 0 {
            tracing::debug!(
                race = %as_of.race_id,
                dropped,
                "ignoring rows at or after the target race"
            );
        }

        let summaries = Self::summarize_races(&history);

        let mut entrants: Vec<&Entrant> = entrants.iter().collect();
        entrants.sort_by(|a, b| a.driver_id.cmp(&b.driver_id));
        entrants.dedup_by(|a, b| {
            let duplicate = a.driver_id == b.driver_id;
            if duplicate {
                tracing::warn!(driver = %a.driver_id, race = %as_of.race_id, "duplicate entrant ignored");
            }
            duplicate
        });

        entrants
            .into_iter()
            .map(|entrant| {
                let features = self.driver_features(&history, &summaries, as_of, entrant);
                FeatureVector {
                    race_id: as_of.race_id.clone(),
                    driver_id: entrant.driver_id.clone(),
                    columns: self.schema.feature_names.clone(),
                    values: features.to_array().to_vec(),
                    encoding: self.fingerprint.clone(),
                }
            })
            .collect()
    }

    /// Build features for a historical race, taking the entrants (driver,
    /// team and grid only) from that race's own rows.
    ///
    /// Returns `None` when `race_id` has no rows.
    pub fn build_for_race(
        &self,
        records: &[RaceSessionRecord],
        race_id: &str,
    ) -> Option<(RaceKey, Vec<FeatureVector>)> {
        let race_rows: Vec<&RaceSessionRecord> =
            records.iter().filter(|r| r.race_id == race_id).collect();
        let key = race_rows.first()?.race_key();

        let entrants: Vec<Entrant> = race_rows
            .iter()
            .map(|r| Entrant {
                driver_id: r.driver_id.clone(),
                team_id: r.team_id.clone(),
                grid_position: r.grid_position,
            })
            .collect();

        let vectors = self.build(records, &key, &entrants);
        Some((key, vectors))
    }

    fn summarize_races(history: &[&RaceSessionRecord]) -> HashMap<String, RaceSummary> {
        let mut summaries: HashMap<String, RaceSummary> = HashMap::new();

        for record in history {
            let summary = summaries
                .entry(record.race_id.clone())
                .or_insert(RaceSummary {
                    field_size: 0,
                    fastest_avg_lap_ms: None,
                });
            summary.field_size += 1;

            if let Some(avg) = record.laps.and_then(|l| l.avg_lap_ms).filter(|v| *v > 0.0) {
                summary.fastest_avg_lap_ms = Some(match summary.fastest_avg_lap_ms {
                    Some(best) => best.min(avg),
                    None => avg,
                });
            }
        }

        summaries
    }

    fn driver_features(
        &self,
        history: &[&RaceSessionRecord],
        summaries: &HashMap<String, RaceSummary>,
        as_of: &RaceKey,
        entrant: &Entrant,
    ) -> DriverFeatures {
        let window = self.schema.rolling_window;

        // Most recent race first
        let mut driver_rows: Vec<&RaceSessionRecord> = history
            .iter()
            .copied()
            .filter(|r| r.driver_id == entrant.driver_id)
            .collect();
        driver_rows.sort_by(|a, b| b.race_order().cmp(&a.race_order()));

        let mut features = DriverFeatures {
            grid_position: entrant
                .grid_position
                .map(f64::from)
                .unwrap_or(Defaults::GRID_POSITION),
            has_grid: flag(entrant.grid_position.is_some()),
            driver_code: f64::from(self.schema.drivers.encode(&entrant.driver_id)),
            team_code: f64::from(self.schema.teams.encode(&entrant.team_id)),
            ..Default::default()
        };

        // Recent form
        let recent: Vec<&RaceSessionRecord> = driver_rows.iter().copied().take(window).collect();
        if recent.is_empty() {
            features.rolling_avg_finish = Defaults::NO_HISTORY;
            features.rolling_dnf_rate = Defaults::NO_HISTORY;
        } else {
            let positions: Vec<f64> = recent
                .iter()
                .map(|r| {
                    let field = summaries.get(&r.race_id).map(|s| s.field_size).unwrap_or(1);
                    f64::from(r.finish.position_or(field))
                })
                .collect();
            let dnfs = recent
                .iter()
                .filter(|r| r.finish == Finish::DidNotFinish)
                .count();
            features.rolling_avg_finish = mean(&positions);
            features.rolling_dnf_rate = dnfs as f64 / recent.len() as f64;
        }
        features.has_history = flag(!driver_rows.is_empty());

        // Career
        let wins = driver_rows.iter().filter(|r| r.finish.is_win()).count();
        features.career_starts = driver_rows.len() as f64;
        features.career_win_rate = rate(wins, driver_rows.len());

        // Season to date
        let season_rows: Vec<&RaceSessionRecord> = driver_rows
            .iter()
            .copied()
            .filter(|r| r.season == as_of.season)
            .collect();
        features.season_points = season_rows.iter().map(|r| r.points).sum::<f64>() + Defaults::POINTS;
        features.has_season_history = flag(!season_rows.is_empty());

        let team_rows: Vec<&RaceSessionRecord> = history
            .iter()
            .copied()
            .filter(|r| r.team_id == entrant.team_id && r.season == as_of.season)
            .collect();
        features.team_season_points = team_rows.iter().map(|r| r.points).sum::<f64>() + Defaults::POINTS;
        features.team_has_season_history = flag(!team_rows.is_empty());

        // Circuit
        let circuit_rows: Vec<&RaceSessionRecord> = driver_rows
            .iter()
            .copied()
            .filter(|r| r.circuit_id == as_of.circuit_id)
            .collect();
        let circuit_wins = circuit_rows.iter().filter(|r| r.finish.is_win()).count();
        features.circuit_win_rate = rate(circuit_wins, circuit_rows.len());
        features.has_circuit_history = flag(!circuit_rows.is_empty());

        // Pace: sessions without lap statistics are skipped
        let ratios: Vec<f64> = driver_rows
            .iter()
            .filter_map(|r| {
                let avg = r.laps.and_then(|l| l.avg_lap_ms).filter(|v| *v > 0.0)?;
                let fastest = summaries.get(&r.race_id)?.fastest_avg_lap_ms?;
                Some(avg / fastest)
            })
            .take(window)
            .collect();
        features.recent_pace_ratio = if ratios.is_empty() {
            Defaults::NO_HISTORY
        } else {
            mean(&ratios)
        };
        features.has_pace_history = flag(!ratios.is_empty());

        features
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn rate(hits: usize, total: usize) -> f64 {
    if total == 0 {
        Defaults::NO_HISTORY
    } else {
        hits as f64 / total as f64
    }
}
