//! libSQL backend: async `AssessmentStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Value, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    AssessmentFilter, AssessmentRecord, AssessmentStore, NewAssessmentRecord,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests and ephemeral runs).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

const ASSESSMENT_COLUMNS: &str = "id, session_id, age, gender, conversation_history, \
    probable_groups, final_focus_group, psychometric_scores, assessment_stage, \
    psych_report, full_report, status, created_at";

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn to_json<T: serde::Serialize>(field: &str, value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value)
        .map_err(|e| DatabaseError::Serialization(format!("{field}: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(field: &str, raw: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(raw).map_err(|e| DatabaseError::Serialization(format!("{field}: {e}")))
}

fn text(row: &libsql::Row, idx: i32, name: &str) -> Result<String, DatabaseError> {
    row.get::<String>(idx)
        .map_err(|e| DatabaseError::Query(format!("read column {name}: {e}")))
}

fn row_to_record(row: &libsql::Row) -> Result<AssessmentRecord, DatabaseError> {
    let id_str = text(row, 0, "id")?;
    let session_str = text(row, 1, "session_id")?;
    // NULL columns fail the typed read
    let age: Option<u32> = row.get::<i64>(2).ok().and_then(|a| u32::try_from(a).ok());
    let gender: Option<String> = row.get::<String>(3).ok();
    let history = text(row, 4, "conversation_history")?;
    let probable = text(row, 5, "probable_groups")?;
    let final_group = text(row, 6, "final_focus_group")?;
    let scores = text(row, 7, "psychometric_scores")?;
    let stage = text(row, 8, "assessment_stage")?;
    let psych_report = text(row, 9, "psych_report")?;
    let full_report = text(row, 10, "full_report")?;
    let status = text(row, 11, "status")?;
    let created_at = text(row, 12, "created_at")?;

    let parse_uuid = |field: &str, s: &str| {
        Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("{field}: {e}")))
    };

    Ok(AssessmentRecord {
        id: parse_uuid("id", &id_str)?,
        created_at: parse_datetime(&created_at),
        record: NewAssessmentRecord {
            session_id: parse_uuid("session_id", &session_str)?,
            age,
            gender,
            conversation_history: from_json("conversation_history", &history)?,
            probable_groups: from_json("probable_groups", &probable)?,
            final_focus_group: final_group
                .parse()
                .map_err(DatabaseError::Serialization)?,
            psychometric_scores: from_json("psychometric_scores", &scores)?,
            assessment_stage: stage.parse().map_err(DatabaseError::Serialization)?,
            psych_report,
            full_report: from_json("full_report", &full_report)?,
            status: status.parse().map_err(DatabaseError::Serialization)?,
        },
    })
}

fn optional_text(value: Option<String>) -> Value {
    value.map(Value::Text).unwrap_or(Value::Null)
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl AssessmentStore for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn create_assessment(
        &self,
        record: NewAssessmentRecord,
    ) -> Result<AssessmentRecord, DatabaseError> {
        let id = Uuid::new_v4();
        let created_at = Utc::now();

        let age = record
            .age
            .map(|a| Value::Integer(i64::from(a)))
            .unwrap_or(Value::Null);

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO assessments ({ASSESSMENT_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    id.to_string(),
                    record.session_id.to_string(),
                    age,
                    optional_text(record.gender.clone()),
                    to_json("conversation_history", &record.conversation_history)?,
                    to_json("probable_groups", &record.probable_groups)?,
                    record.final_focus_group.as_str(),
                    to_json("psychometric_scores", &record.psychometric_scores)?,
                    record.assessment_stage.to_string(),
                    record.psych_report.clone(),
                    to_json("full_report", &record.full_report)?,
                    record.status.as_str(),
                    created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_assessment: {e}")))?;

        debug!(
            record_id = %id,
            session_id = %record.session_id,
            group = %record.final_focus_group,
            "Assessment stored"
        );

        Ok(AssessmentRecord {
            id,
            created_at,
            record,
        })
    }

    async fn get_assessment(&self, id: Uuid) -> Result<Option<AssessmentRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ASSESSMENT_COLUMNS} FROM assessments WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_assessment: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_record(&row).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_assessment: {e}"))),
        }
    }

    async fn filter_assessments(
        &self,
        filter: &AssessmentFilter,
    ) -> Result<Vec<AssessmentRecord>, DatabaseError> {
        let group = optional_text(filter.final_focus_group.map(|g| g.as_str().to_string()));
        let status = optional_text(filter.status.map(|s| s.as_str().to_string()));

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ASSESSMENT_COLUMNS} FROM assessments \
                     WHERE (?1 IS NULL OR final_focus_group = ?1) \
                       AND (?2 IS NULL OR status = ?2) \
                     ORDER BY created_at ASC, rowid ASC"
                ),
                params![group, status],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("filter_assessments: {e}")))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_record(&row) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("Skipping assessment row: {e}");
                }
            }
        }
        Ok(records)
    }
}
