//! SQLite repository for historical session results

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};
use std::path::Path;

use super::schema::create_tables;
use crate::types::{Finish, LapStats, RaceKey, RaceSessionRecord};

const STATUS_CLASSIFIED: &str = "classified";
const STATUS_DNF: &str = "dnf";

const SELECT_COLUMNS: &str = r#"
    SELECT race_id, season, round, circuit_id, race_date, driver_id, team_id,
           grid_position, finish_position, status, points,
           best_lap_ms, avg_lap_ms, pit_stops
    FROM session_results
"#;

/// Repository for historical session data
pub struct RaceRepository {
    conn: Connection,
}

impl RaceRepository {
    /// Create a new repository, initializing the database if needed
    pub fn new(db_path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(db_path).context("Failed to open database")?;

        // Create tables if they don't exist
        create_tables(&conn)?;

        Ok(Self { conn })
    }

    /// Create an in-memory repository (for testing)
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        create_tables(&conn)?;
        Ok(Self { conn })
    }

    // ==================== Insert Operations ====================

    /// Insert a session row. Existing (race, driver) rows are never
    /// overwritten; returns false when the row was already present.
    pub fn insert_record(&self, record: &RaceSessionRecord) -> Result<bool> {
        insert_on(&self.conn, record)
    }

    /// Insert many rows in one transaction; returns how many were new.
    pub fn insert_records(&mut self, records: &[RaceSessionRecord]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        for record in records {
            if insert_on(&tx, record)? {
                inserted += 1;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    // ==================== Query Operations ====================

    /// Every stored row ordered by (season, round, driver).
    pub fn all_records(&self) -> Result<Vec<RaceSessionRecord>> {
        let sql = format!("{} ORDER BY season, round, driver_id", SELECT_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map([], map_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Rows of races strictly before `race`.
    pub fn records_before(&self, race: &RaceKey) -> Result<Vec<RaceSessionRecord>> {
        let sql = format!(
            "{} WHERE season < ?1 OR (season = ?1 AND round < ?2) ORDER BY season, round, driver_id",
            SELECT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![race.season, race.round], map_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Rows of one race ordered by driver.
    pub fn race_records(&self, race_id: &str) -> Result<Vec<RaceSessionRecord>> {
        let sql = format!("{} WHERE race_id = ?1 ORDER BY driver_id", SELECT_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map([race_id], map_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Check if a race already exists
    pub fn race_exists(&self, race_id: &str) -> Result<bool> {
        let count: i32 = self.conn.query_row(
            "SELECT COUNT(*) FROM session_results WHERE race_id = ?1",
            [race_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Get number of distinct races
    pub fn race_count(&self) -> Result<i32> {
        let count: i32 = self.conn.query_row(
            "SELECT COUNT(DISTINCT race_id) FROM session_results",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Get number of stored rows
    pub fn record_count(&self) -> Result<i32> {
        let count: i32 =
            self.conn
                .query_row("SELECT COUNT(*) FROM session_results", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn insert_on(conn: &Connection, record: &RaceSessionRecord) -> Result<bool> {
    let (finish_position, status) = match record.finish {
        Finish::Classified(p) => (Some(p), STATUS_CLASSIFIED),
        Finish::DidNotFinish => (None, STATUS_DNF),
    };
    let laps = record.laps.unwrap_or(LapStats {
        best_lap_ms: None,
        avg_lap_ms: None,
        pit_stops: None,
    });

    let inserted = conn.execute(
        r#"
        INSERT OR IGNORE INTO session_results
        (race_id, season, round, circuit_id, race_date, driver_id, team_id,
         grid_position, finish_position, status, points,
         best_lap_ms, avg_lap_ms, pit_stops)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        "#,
        params![
            record.race_id,
            record.season,
            record.round,
            record.circuit_id,
            record.race_date.map(|d| d.to_string()),
            record.driver_id,
            record.team_id,
            record.grid_position,
            finish_position,
            status,
            record.points,
            laps.best_lap_ms,
            laps.avg_lap_ms,
            laps.pit_stops,
        ],
    )?;

    Ok(inserted > 0)
}

fn map_record(row: &Row<'_>) -> rusqlite::Result<RaceSessionRecord> {
    let race_date: Option<String> = row.get(4)?;
    let finish_position: Option<u32> = row.get(8)?;
    let status: String = row.get(9)?;
    let best_lap_ms: Option<f64> = row.get(11)?;
    let avg_lap_ms: Option<f64> = row.get(12)?;
    let pit_stops: Option<u32> = row.get(13)?;

    let finish = match (status.as_str(), finish_position) {
        (STATUS_CLASSIFIED, Some(p)) => Finish::Classified(p),
        _ => Finish::DidNotFinish,
    };
    let laps = if best_lap_ms.is_none() && avg_lap_ms.is_none() && pit_stops.is_none() {
        None
    } else {
        Some(LapStats {
            best_lap_ms,
            avg_lap_ms,
            pit_stops,
        })
    };

    Ok(RaceSessionRecord {
        race_id: row.get(0)?,
        season: row.get(1)?,
        round: row.get(2)?,
        circuit_id: row.get(3)?,
        race_date: race_date.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        driver_id: row.get(5)?,
        team_id: row.get(6)?,
        grid_position: row.get(7)?,
        finish,
        points: row.get(10)?,
        laps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(race: u32, driver: &str, finish: Finish) -> RaceSessionRecord {
        RaceSessionRecord {
            race_id: format!("2023-{:02}", race),
            season: 2023,
            round: race,
            circuit_id: "monza".to_string(),
            race_date: NaiveDate::from_ymd_opt(2023, 3, race),
            driver_id: driver.to_string(),
            team_id: "ferrari".to_string(),
            grid_position: Some(4),
            finish,
            points: if finish.is_win() { 25.0 } else { 0.0 },
            laps: Some(LapStats {
                best_lap_ms: Some(81_500.0),
                avg_lap_ms: Some(84_200.5),
                pit_stops: Some(1),
            }),
        }
    }

    #[test]
    fn test_insert_and_read_back() {
        let repo = RaceRepository::in_memory().unwrap();
        let original = record(1, "lec", Finish::Classified(1));
        assert!(repo.insert_record(&original).unwrap());

        let stored = repo.race_records("2023-01").unwrap();
        assert_eq!(stored, vec![original]);
        assert!(repo.race_exists("2023-01").unwrap());
        assert!(!repo.race_exists("2023-02").unwrap());
    }

    #[test]
    fn test_insert_is_append_only() {
        let repo = RaceRepository::in_memory().unwrap();
        assert!(repo.insert_record(&record(1, "lec", Finish::Classified(1))).unwrap());
        // Same (race, driver) with a different result is ignored
        assert!(!repo.insert_record(&record(1, "lec", Finish::DidNotFinish)).unwrap());

        let stored = repo.race_records("2023-01").unwrap();
        assert_eq!(stored[0].finish, Finish::Classified(1));
        assert_eq!(repo.record_count().unwrap(), 1);
    }

    #[test]
    fn test_dnf_and_missing_laps_round_trip() {
        let repo = RaceRepository::in_memory().unwrap();
        let mut dnf = record(2, "sai", Finish::DidNotFinish);
        dnf.laps = None;
        dnf.grid_position = None;
        dnf.race_date = None;
        repo.insert_record(&dnf).unwrap();

        let stored = repo.race_records("2023-02").unwrap();
        assert_eq!(stored, vec![dnf]);
    }

    #[test]
    fn test_records_before_excludes_target_and_later() {
        let mut repo = RaceRepository::in_memory().unwrap();
        let rows = vec![
            record(1, "lec", Finish::Classified(1)),
            record(2, "lec", Finish::Classified(2)),
            record(3, "lec", Finish::Classified(3)),
        ];
        assert_eq!(repo.insert_records(&rows).unwrap(), 3);
        assert_eq!(repo.insert_records(&rows).unwrap(), 0);

        let key = rows[1].race_key();
        let before = repo.records_before(&key).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].round, 1);

        assert_eq!(repo.all_records().unwrap().len(), 3);
        assert_eq!(repo.race_count().unwrap(), 3);
    }
}
