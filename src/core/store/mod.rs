mod integrations;
mod investigations;
mod monitoring;
mod runbooks;
pub mod types;

use anyhow::Result;
use chrono::Utc;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use types::OrgRecord;

/// SQLite persistence layer. One connection guarded by a mutex; the schema is
/// created on open so every startup is self-contained.
pub struct Store {
    db: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Connection::open(path)?;
        Self::init_schema(&db)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Shared connection handle, used by the secrets vault which lives in the
    /// same database file.
    pub fn db(&self) -> Arc<Mutex<Connection>> {
        self.db.clone()
    }

    fn init_schema(db: &Connection) -> Result<()> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS organizations (
                id TEXT PRIMARY KEY,
                slug TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS investigations (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                trigger_type TEXT NOT NULL,
                trigger_payload TEXT NOT NULL,
                alert_id TEXT,
                alert_name TEXT NOT NULL,
                service TEXT,
                environment TEXT,
                severity TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                duration_ms INTEGER,
                summary TEXT,
                root_cause TEXT,
                confidence_score REAL,
                findings TEXT NOT NULL DEFAULT '[]',
                suggested_actions TEXT NOT NULL DEFAULT '[]',
                deployments_found TEXT NOT NULL DEFAULT '[]',
                trace_ref TEXT,
                tool_call_count INTEGER NOT NULL DEFAULT 0,
                runbook_id TEXT,
                feedback_rating TEXT,
                feedback_comment TEXT
            )",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_investigations_org_created
             ON investigations (org_id, created_at DESC)",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS runbooks (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                trigger_type TEXT NOT NULL,
                trigger_config TEXT NOT NULL DEFAULT '{}',
                investigation_steps TEXT NOT NULL DEFAULT '[]',
                if_found_actions TEXT NOT NULL DEFAULT '{}',
                enabled INTEGER NOT NULL DEFAULT 1,
                priority INTEGER NOT NULL DEFAULT 100,
                times_triggered INTEGER NOT NULL DEFAULT 0,
                times_matched INTEGER NOT NULL DEFAULT 0,
                avg_confidence REAL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS monitoring_jobs (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                name TEXT NOT NULL,
                job_type TEXT NOT NULL,
                schedule_interval_minutes INTEGER NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                config TEXT NOT NULL DEFAULT '{}',
                notify_on TEXT NOT NULL DEFAULT 'issues',
                last_run_at TEXT,
                next_run_at TEXT,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS monitoring_job_runs (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                org_id TEXT NOT NULL,
                status TEXT NOT NULL,
                summary TEXT,
                findings TEXT NOT NULL DEFAULT '[]',
                error_message TEXT,
                alert_sent INTEGER NOT NULL DEFAULT 0,
                alert_severity TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS integrations (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                status TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (org_id, provider)
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                org_id TEXT,
                source TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    // === Organizations ===

    pub async fn upsert_org(&self, slug: &str, name: &str) -> Result<OrgRecord> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO organizations (id, slug, name, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(slug) DO UPDATE SET name=excluded.name",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                slug,
                name,
                Utc::now().to_rfc3339()
            ],
        )?;
        let mut stmt =
            db.prepare("SELECT id, slug, name, created_at FROM organizations WHERE slug = ?1")?;
        let org = stmt.query_row([slug], |row| {
            Ok(OrgRecord {
                id: row.get(0)?,
                slug: row.get(1)?,
                name: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        Ok(org)
    }

    pub async fn org_by_slug(&self, slug: &str) -> Result<Option<OrgRecord>> {
        let db = self.db.lock().await;
        let mut stmt =
            db.prepare("SELECT id, slug, name, created_at FROM organizations WHERE slug = ?1")?;
        let mut rows = stmt.query([slug])?;
        match rows.next()? {
            Some(row) => Ok(Some(OrgRecord {
                id: row.get(0)?,
                slug: row.get(1)?,
                name: row.get(2)?,
                created_at: row.get(3)?,
            })),
            None => Ok(None),
        }
    }

    // === Audit log (write-only, best-effort callers) ===

    pub async fn record_audit(
        &self,
        org_id: Option<&str>,
        source: &str,
        payload: &str,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO audit_log (id, org_id, source, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                org_id,
                source,
                payload,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }
}

/// Map a bad enum/JSON column onto a rusqlite conversion error so row mappers
/// can stay inside `query_map` closures.
pub(crate) fn bad_column(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unrecognized {what}: {value}").into(),
    )
}
