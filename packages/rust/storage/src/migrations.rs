//! SQL migration definitions for the result store.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: batch_jobs, directory_entries, failed_records",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per submitted batch
CREATE TABLE IF NOT EXISTS batch_jobs (
    id           TEXT PRIMARY KEY,
    total        INTEGER NOT NULL,
    started_at   TEXT NOT NULL,
    finished_at  TEXT,
    summary_json TEXT
);

-- Assembled entries; the full entry is kept as JSON, hot columns are copied out
CREATE TABLE IF NOT EXISTS directory_entries (
    batch_id         TEXT NOT NULL REFERENCES batch_jobs(id) ON DELETE CASCADE,
    provider_id      TEXT NOT NULL,
    name             TEXT NOT NULL,
    risk_level       TEXT NOT NULL,
    confidence_score REAL NOT NULL,
    needs_review     INTEGER NOT NULL,
    fingerprint      TEXT NOT NULL,
    assembled_at     TEXT NOT NULL,
    entry_json       TEXT NOT NULL,
    PRIMARY KEY (batch_id, provider_id)
);

CREATE INDEX IF NOT EXISTS idx_entries_provider ON directory_entries(provider_id);
CREATE INDEX IF NOT EXISTS idx_entries_risk ON directory_entries(risk_level);

-- Records that ended in Failed
CREATE TABLE IF NOT EXISTS failed_records (
    batch_id    TEXT NOT NULL REFERENCES batch_jobs(id) ON DELETE CASCADE,
    provider_id TEXT NOT NULL,
    reason      TEXT NOT NULL,
    detail      TEXT NOT NULL,
    record_json TEXT NOT NULL,
    PRIMARY KEY (batch_id, provider_id)
);

CREATE INDEX IF NOT EXISTS idx_failed_reason ON failed_records(reason);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
    ]
}
