//! Optional durable audit trail for messages and task transitions.
//!
//! The sink is a collaborator, not a source of truth: a missing or failing
//! sink is logged and otherwise ignored so delivery never blocks on audit.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MeshError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub component: String,
    pub category: String,
    pub subject: String,
    pub tags: Vec<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        component: impl Into<String>,
        category: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            category: category.into(),
            subject: subject.into(),
            tags: Vec::new(),
            body: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

pub trait AuditSink: Send + Sync {
    /// Best-effort write. Implementations swallow and log their own failures.
    fn record(&self, record: AuditRecord);
}

/// Sink that drops every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _record: AuditRecord) {}
}

pub struct SqliteAuditLog {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteAuditLog {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MeshError::Audit(format!("Failed to create audit dir: {}", e)))?;
        }

        let conn = Connection::open(&db_path)
            .map_err(|e| MeshError::Audit(format!("Failed to open audit log: {}", e)))?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                component TEXT NOT NULL,
                category TEXT NOT NULL,
                subject TEXT NOT NULL,
                tags TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_component
                ON audit_log(component, category);
            CREATE INDEX IF NOT EXISTS idx_audit_created
                ON audit_log(created_at);
            ",
        )
        .map_err(|e| MeshError::Audit(format!("Failed to init audit schema: {}", e)))?;

        Ok(())
    }

    fn insert(&self, record: &AuditRecord) -> Result<()> {
        let tags = serde_json::to_string(&record.tags)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO audit_log (component, category, subject, tags, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &record.component,
                &record.category,
                &record.subject,
                &tags,
                &record.body,
                record.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| MeshError::Audit(format!("Failed to insert audit record: {}", e)))?;

        Ok(())
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT component, category, subject, tags, body, created_at
                 FROM audit_log
                 ORDER BY id DESC
                 LIMIT ?1",
            )
            .map_err(|e| MeshError::Audit(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(|e| MeshError::Audit(format!("Failed to query audit log: {}", e)))?;

        let mut records = Vec::new();
        for row in rows {
            let (component, category, subject, tags, body, created_at) =
                row.map_err(|e| MeshError::Audit(format!("Failed to read audit row: {}", e)))?;
            records.push(AuditRecord {
                component,
                category,
                subject,
                tags: serde_json::from_str(&tags).unwrap_or_default(),
                body,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            });
        }

        Ok(records)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))
            .map_err(|e| MeshError::Audit(format!("Failed to count audit records: {}", e)))?;
        Ok(count as usize)
    }

    /// Drop records older than the cutoff. Returns how many were deleted.
    pub fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        let deleted = conn
            .execute(
                "DELETE FROM audit_log WHERE created_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .map_err(|e| MeshError::Audit(format!("Failed to cleanup audit log: {}", e)))?;

        if deleted > 0 {
            debug!(deleted, "Cleaned up audit records");
        }
        Ok(deleted)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

impl AuditSink for SqliteAuditLog {
    fn record(&self, record: AuditRecord) {
        if let Err(e) = self.insert(&record) {
            warn!(
                error = %e,
                component = %record.component,
                subject = %record.subject,
                "Audit write failed, dropping record"
            );
        }
    }
}

impl Clone for SqliteAuditLog {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            db_path: self.db_path.clone(),
        }
    }
}
