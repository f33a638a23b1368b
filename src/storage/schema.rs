//! SQLite schema definitions for historical session data
//!
//! Tables:
//! - session_results: one row per (race, driver), append-only

use rusqlite::{Connection, Result};

/// Create all tables in the database
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS session_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            race_id TEXT NOT NULL,
            season INTEGER NOT NULL,
            round INTEGER NOT NULL,
            circuit_id TEXT NOT NULL,
            race_date TEXT,
            driver_id TEXT NOT NULL,
            team_id TEXT NOT NULL,
            grid_position INTEGER,
            finish_position INTEGER,
            status TEXT NOT NULL,
            points REAL NOT NULL DEFAULT 0,
            best_lap_ms REAL,
            avg_lap_ms REAL,
            pit_stops INTEGER,
            ingested_at TEXT DEFAULT (datetime('now')),
            UNIQUE(race_id, driver_id)
        )
        "#,
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_session_results_order ON session_results(season, round)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_session_results_driver ON session_results(driver_id)",
        [],
    )?;

    Ok(())
}
