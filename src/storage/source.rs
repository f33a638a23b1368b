//! Raw session acquisition.
//!
//! A [`SessionSource`] supplies per-race result rows. The bundled
//! implementation reads one CSV export per race; a timing-API client would
//! implement the same trait. [`CachedSource`] puts a [`SessionCache`] in
//! front of any source.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use polars::prelude::*;
use std::path::{Path, PathBuf};

use super::cache::SessionCache;
use crate::types::{Finish, LapStats, RaceSessionRecord};

/// Session name under which race results are cached.
pub const RACE_SESSION: &str = "race";

/// Supplier of completed race sessions.
pub trait SessionSource {
    /// Identifiers of every race the source can supply.
    fn list_races(&self) -> Result<Vec<String>>;

    /// All driver rows of one race.
    fn fetch_session(&self, race_id: &str) -> Result<Vec<RaceSessionRecord>>;
}

/// Directory of `<race_id>.csv` session exports.
///
/// Required columns: `race_id`, `season`, `round`, `circuit_id`,
/// `driver_id`, `team_id`, `finish`, `points`. Optional: `race_date`,
/// `grid`, `best_lap_ms`, `avg_lap_ms`, `pit_stops`.
pub struct CsvDirectorySource {
    dir: PathBuf,
}

impl CsvDirectorySource {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn race_path(&self, race_id: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", race_id))
    }
}

impl SessionSource for CsvDirectorySource {
    fn list_races(&self) -> Result<Vec<String>> {
        let mut races = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read session directory {}", self.dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("csv") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    races.push(stem.to_string());
                }
            }
        }
        races.sort();
        Ok(races)
    }

    fn fetch_session(&self, race_id: &str) -> Result<Vec<RaceSessionRecord>> {
        let path = self.race_path(race_id);
        read_session_csv(&path).with_context(|| format!("Failed to load {}", path.display()))
    }
}

/// Parse one session export into records; malformed rows are skipped.
pub fn read_session_csv(path: &Path) -> Result<Vec<RaceSessionRecord>> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    let race_ids = required_strings(&df, "race_id")?;
    let seasons = required_floats(&df, "season")?;
    let rounds = required_floats(&df, "round")?;
    let circuits = required_strings(&df, "circuit_id")?;
    let drivers = required_strings(&df, "driver_id")?;
    let teams = required_strings(&df, "team_id")?;
    let finishes = required_strings(&df, "finish")?;
    let points = required_floats(&df, "points")?;

    let dates = optional_strings(&df, "race_date")?;
    let grids = optional_floats(&df, "grid")?;
    let best_laps = optional_floats(&df, "best_lap_ms")?;
    let avg_laps = optional_floats(&df, "avg_lap_ms")?;
    let pit_stops = optional_floats(&df, "pit_stops")?;

    let mut records = Vec::with_capacity(df.height());
    let mut skipped = 0;

    for i in 0..df.height() {
        let (
            Some(race_id),
            Some(season),
            Some(round),
            Some(circuit_id),
            Some(driver_id),
            Some(team_id),
            Some(finish),
        ) = (
            race_ids.get(i),
            seasons.get(i),
            rounds.get(i),
            circuits.get(i),
            drivers.get(i),
            teams.get(i),
            finishes.get(i).and_then(Finish::parse),
        )
        else {
            skipped += 1;
            continue;
        };

        let laps = LapStats {
            best_lap_ms: cell(&best_laps, i),
            avg_lap_ms: cell(&avg_laps, i),
            pit_stops: cell(&pit_stops, i).map(|v| v as u32),
        };
        let has_laps = laps.best_lap_ms.is_some() || laps.avg_lap_ms.is_some() || laps.pit_stops.is_some();

        records.push(RaceSessionRecord {
            race_id: race_id.to_string(),
            season: season as i32,
            round: round as u32,
            circuit_id: circuit_id.to_string(),
            race_date: dates
                .as_ref()
                .and_then(|c| c.get(i))
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()),
            driver_id: driver_id.to_string(),
            team_id: team_id.to_string(),
            // Grid 0 marks a pit-lane start
            grid_position: cell(&grids, i).filter(|g| *g >= 1.0).map(|g| g as u32),
            finish,
            points: points.get(i).unwrap_or(0.0).max(0.0),
            laps: has_laps.then_some(laps),
        });
    }

    if skipped > 0 {
        tracing::warn!(path = %path.display(), skipped, "skipped malformed session rows");
    }

    Ok(records)
}

fn required_strings(df: &DataFrame, name: &str) -> Result<StringChunked> {
    let col = df.column(name)?.cast(&DataType::String)?;
    Ok(col.str()?.clone())
}

fn required_floats(df: &DataFrame, name: &str) -> Result<Float64Chunked> {
    let col = df.column(name)?.cast(&DataType::Float64)?;
    Ok(col.f64()?.clone())
}

fn optional_strings(df: &DataFrame, name: &str) -> Result<Option<StringChunked>> {
    if df.column(name).is_err() {
        return Ok(None);
    }
    required_strings(df, name).map(Some)
}

fn optional_floats(df: &DataFrame, name: &str) -> Result<Option<Float64Chunked>> {
    if df.column(name).is_err() {
        return Ok(None);
    }
    required_floats(df, name).map(Some)
}

fn cell(col: &Option<Float64Chunked>, i: usize) -> Option<f64> {
    col.as_ref().and_then(|c| c.get(i))
}

/// Source wrapper that serves repeated fetches from a [`SessionCache`].
pub struct CachedSource<S> {
    inner: S,
    cache: SessionCache,
}

impl<S: SessionSource> CachedSource<S> {
    pub fn new(inner: S, cache: SessionCache) -> Self {
        Self { inner, cache }
    }
}

impl<S: SessionSource> SessionSource for CachedSource<S> {
    fn list_races(&self) -> Result<Vec<String>> {
        self.inner.list_races()
    }

    fn fetch_session(&self, race_id: &str) -> Result<Vec<RaceSessionRecord>> {
        if let Some(records) = self.cache.get(race_id, RACE_SESSION) {
            tracing::debug!(race_id, "session cache hit");
            return Ok(records);
        }

        let records = self.inner.fetch_session(race_id)?;
        self.cache.set(race_id, RACE_SESSION, &records)?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::cell::Cell;

    const CSV: &str = "\
race_id,season,round,circuit_id,race_date,driver_id,team_id,grid,finish,points,best_lap_ms,avg_lap_ms,pit_stops
2023-05,2023,5,miami,2023-05-07,ver,red_bull,9,1,26,89708,93010.5,1
2023-05,2023,5,miami,2023-05-07,per,red_bull,1,2,18,90100,93100.0,1
2023-05,2023,5,miami,2023-05-07,str,aston_martin,0,DNF,0,,,
2023-05,2023,5,miami,2023-05-07,xxx,unknown,5,??,0,,,
";

    fn write_fixture(dir: &Path) {
        std::fs::write(dir.join("2023-05.csv"), CSV).unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();
    }

    #[test]
    fn test_csv_source_parses_rows() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let source = CsvDirectorySource::new(dir.path());

        assert_eq!(source.list_races().unwrap(), vec!["2023-05"]);

        let records = source.fetch_session("2023-05").unwrap();
        // Unparseable finish row is skipped
        assert_eq!(records.len(), 3);

        let ver = &records[0];
        assert_eq!(ver.finish, Finish::Classified(1));
        assert_eq!(ver.grid_position, Some(9));
        assert_eq!(ver.race_date, NaiveDate::from_ymd_opt(2023, 5, 7));
        assert_eq!(ver.laps.unwrap().avg_lap_ms, Some(93010.5));

        let str_ = &records[2];
        assert_eq!(str_.finish, Finish::DidNotFinish);
        assert_eq!(str_.grid_position, None);
        assert_eq!(str_.laps, None);
    }

    struct CountingSource {
        calls: Cell<usize>,
    }

    impl SessionSource for CountingSource {
        fn list_races(&self) -> Result<Vec<String>> {
            Ok(vec!["r1".to_string()])
        }

        fn fetch_session(&self, race_id: &str) -> Result<Vec<RaceSessionRecord>> {
            self.calls.set(self.calls.get() + 1);
            Ok(vec![RaceSessionRecord {
                race_id: race_id.to_string(),
                season: 2023,
                round: 1,
                circuit_id: "bahrain".to_string(),
                race_date: None,
                driver_id: "ver".to_string(),
                team_id: "red_bull".to_string(),
                grid_position: Some(1),
                finish: Finish::Classified(1),
                points: 25.0,
                laps: None,
            }])
        }
    }

    #[test]
    fn test_cached_source_hits_inner_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path().to_path_buf(), Duration::hours(1));
        let source = CachedSource::new(
            CountingSource {
                calls: Cell::new(0),
            },
            cache,
        );

        let first = source.fetch_session("r1").unwrap();
        let second = source.fetch_session("r1").unwrap();
        assert_eq!(first, second);
        assert_eq!(source.inner.calls.get(), 1);

        source.cache.invalidate("r1", RACE_SESSION).unwrap();
        source.fetch_session("r1").unwrap();
        assert_eq!(source.inner.calls.get(), 2);
    }
}
