//! libSQL result store for batch runs.
//!
//! The [`ResultStore`] keeps batch jobs, assembled directory entries, and
//! failed records so that review queues and exports can be produced after
//! the batch process has exited.
//!
//! **Access rules:**
//! - `provdir run`: read-write via [`ResultStore::open`]
//! - `provdir report`: read-only via [`ResultStore::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use serde::de::DeserializeOwned;

use provdir_shared::{
    BatchId, BatchSummary, DirectoryEntry, FailedRecord, ProvDirError, ProviderId, RecordOutcome,
    Result, RiskLevel,
};

fn db_err(e: impl std::fmt::Display) -> ProvDirError {
    ProvDirError::Storage(e.to_string())
}

fn from_json<T: DeserializeOwned>(json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| ProvDirError::Storage(format!("corrupt row: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(db_err)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ProvDirError::Storage(format!("invalid date: {e}")))
}

/// A stored batch job.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchJob {
    pub id: BatchId,
    pub total: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub summary: Option<BatchSummary>,
}

/// Filter for [`ResultStore::list_entries`]. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub batch_id: Option<BatchId>,
    pub risk: Option<RiskLevel>,
    pub min_confidence: Option<f64>,
    pub limit: Option<u32>,
}

/// Primary storage handle wrapping a libSQL database.
pub struct ResultStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl ResultStore {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ProvDirError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        Self::from_database(db, false).await
    }

    /// Open a transient in-memory database.
    pub async fn open_in_memory() -> Result<Self> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(db_err)?;
        Self::from_database(db, false).await
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ProvDirError::Storage(format!(
                "database not found: {}",
                path.display()
            )));
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        Self::from_database(db, true).await
    }

    async fn from_database(db: Database, readonly: bool) -> Result<Self> {
        let conn = db.connect().map_err(db_err)?;
        let store = Self { db, conn, readonly };
        if !readonly {
            store.run_migrations().await?;
        }
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        ProvDirError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ProvDirError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Batch jobs
    // -----------------------------------------------------------------------

    /// Record the start of a batch.
    pub async fn insert_batch(&self, id: &BatchId, total: usize) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO batch_jobs (id, total, started_at) VALUES (?1, ?2, ?3)",
                params![id.to_string(), total as i64, now.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Mark a batch finished and store its summary.
    pub async fn finish_batch(&self, id: &BatchId, summary: &BatchSummary) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let json = to_json(summary)?;
        let updated = self
            .conn
            .execute(
                "UPDATE batch_jobs SET finished_at = ?1, summary_json = ?2 WHERE id = ?3",
                params![now.as_str(), json.as_str(), id.to_string()],
            )
            .await
            .map_err(db_err)?;
        if updated == 0 {
            return Err(ProvDirError::Storage(format!("unknown batch {id}")));
        }
        Ok(())
    }

    /// All batches, newest first.
    pub async fn list_batches(&self) -> Result<Vec<BatchJob>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, total, started_at, finished_at, summary_json
                 FROM batch_jobs ORDER BY started_at DESC, id DESC",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let id: String = row.get(0).map_err(db_err)?;
            let started_at: String = row.get(2).map_err(db_err)?;
            let finished_at: Option<String> = row.get(3).ok();
            let summary_json: Option<String> = row.get(4).ok();
            results.push(BatchJob {
                id: id
                    .parse()
                    .map_err(|e| ProvDirError::Storage(format!("invalid batch id: {e}")))?,
                total: row.get::<i64>(1).map_err(db_err)? as usize,
                started_at: parse_time(&started_at)?,
                finished_at: finished_at.as_deref().map(parse_time).transpose()?,
                summary: summary_json.as_deref().map(from_json).transpose()?,
            });
        }
        Ok(results)
    }

    /// The most recently started batch, if any.
    pub async fn latest_batch(&self) -> Result<Option<BatchJob>> {
        Ok(self.list_batches().await?.into_iter().next())
    }

    // -----------------------------------------------------------------------
    // Entries and failures
    // -----------------------------------------------------------------------

    /// Insert or replace an assembled entry.
    pub async fn save_entry(&self, batch_id: &BatchId, entry: &DirectoryEntry) -> Result<()> {
        self.check_writable()?;
        self.save_entry_on(&self.conn, batch_id, entry).await
    }

    async fn save_entry_on(
        &self,
        conn: &Connection,
        batch_id: &BatchId,
        entry: &DirectoryEntry,
    ) -> Result<()> {
        let json = to_json(entry)?;
        conn.execute(
            "INSERT INTO directory_entries
               (batch_id, provider_id, name, risk_level, confidence_score, needs_review,
                fingerprint, assembled_at, entry_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(batch_id, provider_id) DO UPDATE SET
               name = excluded.name,
               risk_level = excluded.risk_level,
               confidence_score = excluded.confidence_score,
               needs_review = excluded.needs_review,
               fingerprint = excluded.fingerprint,
               assembled_at = excluded.assembled_at,
               entry_json = excluded.entry_json",
            params![
                batch_id.to_string(),
                entry.provider_id.0.as_str(),
                entry.name.as_str(),
                entry.assessment.risk_level.as_str(),
                entry.assessment.confidence_score,
                i64::from(entry.assessment.needs_manual_review()),
                entry.fingerprint.as_str(),
                entry.assembled_at.to_rfc3339(),
                json.as_str(),
            ],
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Insert or replace a failed record.
    pub async fn save_failure(&self, batch_id: &BatchId, failed: &FailedRecord) -> Result<()> {
        self.check_writable()?;
        self.save_failure_on(&self.conn, batch_id, failed).await
    }

    async fn save_failure_on(
        &self,
        conn: &Connection,
        batch_id: &BatchId,
        failed: &FailedRecord,
    ) -> Result<()> {
        let json = to_json(failed)?;
        conn.execute(
            "INSERT INTO failed_records (batch_id, provider_id, reason, detail, record_json)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(batch_id, provider_id) DO UPDATE SET
               reason = excluded.reason,
               detail = excluded.detail,
               record_json = excluded.record_json",
            params![
                batch_id.to_string(),
                failed.input.id.0.as_str(),
                failed.reason.as_str(),
                failed.detail.as_str(),
                json.as_str(),
            ],
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Persist every outcome of a batch in one transaction.
    pub async fn save_outcomes(&self, batch_id: &BatchId, outcomes: &[RecordOutcome]) -> Result<()> {
        self.check_writable()?;
        let tx = self.conn.transaction().await.map_err(db_err)?;
        for outcome in outcomes {
            match outcome {
                RecordOutcome::Done { entry, .. } => {
                    self.save_entry_on(&tx, batch_id, entry).await?
                }
                RecordOutcome::Failed(failed) => {
                    self.save_failure_on(&tx, batch_id, failed).await?
                }
            }
        }
        tx.commit().await.map_err(db_err)?;
        tracing::debug!(batch = %batch_id, count = outcomes.len(), "outcomes saved");
        Ok(())
    }

    /// Entries matching `filter`, lowest confidence first.
    pub async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<DirectoryEntry>> {
        let batch = filter.batch_id.as_ref().map(ToString::to_string);
        let risk = filter.risk.map(RiskLevel::as_str);
        let limit = filter.limit.map(i64::from).unwrap_or(-1);

        let mut rows = self
            .conn
            .query(
                "SELECT entry_json FROM directory_entries
                 WHERE (?1 IS NULL OR batch_id = ?1)
                   AND (?2 IS NULL OR risk_level = ?2)
                   AND confidence_score >= ?3
                 ORDER BY confidence_score ASC, provider_id ASC
                 LIMIT ?4",
                params![batch, risk, filter.min_confidence.unwrap_or(0.0), limit],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let json: String = row.get(0).map_err(db_err)?;
            results.push(from_json(&json)?);
        }
        Ok(results)
    }

    /// Failed records, optionally restricted to one batch.
    pub async fn list_failures(&self, batch_id: Option<&BatchId>) -> Result<Vec<FailedRecord>> {
        let batch = batch_id.map(ToString::to_string);
        let mut rows = self
            .conn
            .query(
                "SELECT record_json FROM failed_records
                 WHERE (?1 IS NULL OR batch_id = ?1)
                 ORDER BY provider_id",
                params![batch],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let json: String = row.get(0).map_err(db_err)?;
            results.push(from_json(&json)?);
        }
        Ok(results)
    }

    /// The most recently assembled entry for a provider.
    pub async fn get_entry(&self, provider_id: &ProviderId) -> Result<Option<DirectoryEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT entry_json FROM directory_entries
                 WHERE provider_id = ?1
                 ORDER BY assembled_at DESC LIMIT 1",
                params![provider_id.0.as_str()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => {
                let json: String = row.get(0).map_err(db_err)?;
                Ok(Some(from_json(&json)?))
            }
            None => Ok(None),
        }
    }
}
