//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the ledger database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track stage runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    stage TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    submitted INTEGER NOT NULL DEFAULT 0,
    succeeded INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_runs_stage ON runs(stage);

-- Chunk files whose details were fully fetched
CREATE TABLE IF NOT EXISTS processed_chunks (
    chunk_key TEXT PRIMARY KEY,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    processed_at TEXT NOT NULL
);

-- Flattened listing rows
CREATE TABLE IF NOT EXISTS cars (
    row_id INTEGER PRIMARY KEY AUTOINCREMENT,
    ad_id TEXT,
    price INTEGER,
    subject TEXT,
    brand TEXT,
    model TEXT,
    model_family TEXT,
    model_year TEXT,
    mileage INTEGER,
    fuel TEXT,
    gearbox TEXT,
    horsepower TEXT,
    color TEXT,
    drive_wheels TEXT,
    body_type TEXT,
    first_traffic_date TEXT,
    equipment_count INTEGER,
    advertiser_type TEXT,
    region TEXT,
    municipality TEXT
);

CREATE INDEX IF NOT EXISTS idx_cars_ad_id ON cars(ad_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_initializes() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in ["runs", "processed_chunks", "cars"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "table {} should exist", table);
        }
    }
}
