//! SQLite ledger implementation
//!
//! This module provides a SQLite-based implementation of the Ledger trait.

use crate::pipeline::FlatRecord;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Ledger, StorageError, StorageResult};
use crate::storage::{RunCounts, RunRecord, RunStatus, Stage};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::Path;

const RUN_COLUMNS: &str =
    "id, stage, started_at, finished_at, config_hash, status, submitted, succeeded, failed";

/// SQLite ledger backend
pub struct SqliteLedger {
    conn: Connection,
}

impl SqliteLedger {
    /// Creates a new SqliteLedger instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteLedger)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<(RunRecord, String, String)> {
    let stage: String = row.get(1)?;
    let status: String = row.get(5)?;
    let record = RunRecord {
        id: row.get(0)?,
        stage: Stage::Pages,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        config_hash: row.get(4)?,
        status: RunStatus::Running,
        counts: RunCounts {
            submitted: row.get::<_, i64>(6)? as u64,
            succeeded: row.get::<_, i64>(7)? as u64,
            failed: row.get::<_, i64>(8)? as u64,
        },
    };
    Ok((record, stage, status))
}

fn decode_run((mut record, stage, status): (RunRecord, String, String)) -> StorageResult<RunRecord> {
    record.stage = Stage::from_db_string(&stage)
        .ok_or_else(|| StorageError::Corrupt(format!("unknown stage '{}'", stage)))?;
    record.status = RunStatus::from_db_string(&status)
        .ok_or_else(|| StorageError::Corrupt(format!("unknown run status '{}'", status)))?;
    Ok(record)
}

impl Ledger for SqliteLedger {
    // ===== Run Management =====

    fn begin_run(&mut self, stage: Stage, config_hash: &str) -> StorageResult<i64> {
        let stale = self.interrupt_stale_runs(stage)?;
        if stale > 0 {
            tracing::warn!("Marked {} stale {} run(s) as interrupted", stale, stage);
        }

        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (stage, started_at, config_hash, status) VALUES (?1, ?2, ?3, ?4)",
            params![
                stage.to_db_string(),
                now,
                config_hash,
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        counts: RunCounts,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs
             SET finished_at = ?1, status = ?2, submitted = ?3, succeeded = ?4, failed = ?5
             WHERE id = ?6",
            params![
                now,
                status.to_db_string(),
                counts.submitted as i64,
                counts.succeeded as i64,
                counts.failed as i64,
                run_id
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let sql = format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS);
        let raw = self
            .conn
            .query_row(&sql, params![run_id], run_from_row)
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))?;
        decode_run(raw)
    }

    fn latest_run(&self, stage: Stage) -> StorageResult<Option<RunRecord>> {
        let sql = format!(
            "SELECT {} FROM runs WHERE stage = ?1 ORDER BY id DESC LIMIT 1",
            RUN_COLUMNS
        );
        self.conn
            .query_row(&sql, params![stage.to_db_string()], run_from_row)
            .optional()?
            .map(decode_run)
            .transpose()
    }

    fn recent_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let sql = format!("SELECT {} FROM runs ORDER BY id DESC LIMIT ?1", RUN_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], run_from_row)?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(decode_run(row?)?);
        }
        Ok(runs)
    }

    fn interrupt_stale_runs(&mut self, stage: Stage) -> StorageResult<usize> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE stage = ?3 AND status = ?4",
            params![
                RunStatus::Interrupted.to_db_string(),
                now,
                stage.to_db_string(),
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(changed)
    }

    // ===== ProcessedSet =====

    fn processed_chunks(&self) -> StorageResult<BTreeSet<String>> {
        let mut stmt = self.conn.prepare("SELECT chunk_key FROM processed_chunks")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(keys)
    }

    fn mark_chunk_processed(&mut self, chunk_key: &str, run_id: i64) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT OR REPLACE INTO processed_chunks (chunk_key, run_id, processed_at)
             VALUES (?1, ?2, ?3)",
            params![chunk_key, run_id, now],
        )?;
        Ok(())
    }

    fn clear_processed_chunks(&mut self) -> StorageResult<usize> {
        let removed = self.conn.execute("DELETE FROM processed_chunks", [])?;
        Ok(removed)
    }

    // ===== Loaded rows =====

    fn replace_cars(&mut self, rows: &[FlatRecord]) -> StorageResult<usize> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM cars", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO cars (
                    ad_id, price, subject, brand, model, model_family, model_year, mileage,
                    fuel, gearbox, horsepower, color, drive_wheels, body_type,
                    first_traffic_date, equipment_count, advertiser_type, region, municipality
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                          ?16, ?17, ?18, ?19)",
            )?;

            for r in rows {
                stmt.execute(params![
                    r.ad_id,
                    r.price,
                    r.subject,
                    r.brand,
                    r.model,
                    r.model_family,
                    r.model_year,
                    r.mileage.map(|m| m as i64),
                    r.fuel,
                    r.gearbox,
                    r.horsepower,
                    r.color,
                    r.drive_wheels,
                    r.body_type,
                    r.first_traffic_date,
                    r.equipment_count,
                    r.advertiser_type,
                    r.region,
                    r.municipality,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    fn count_cars(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM cars", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
