//! Relational store: sources, processing jobs, processing artifacts.
//!
//! A single SQLite file holds all queue and ingestion state. The connection
//! runs in WAL mode with foreign keys on and is shared behind a mutex;
//! the queued -> running job transition is guarded so two workers can never
//! lease the same job.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::{ZbError, ZbResult};

// Job types. Model-specific transcription jobs carry the model tag after a
// colon so the worker can pick the engine.
pub const JOB_TYPE_TRANSCRIBE: &str = "transcribe";
pub const JOB_TYPE_TRANSCRIBE_REAZONSPEECH: &str = "transcribe:reazonspeech";
pub const JOB_TYPE_TRANSCRIBE_SENSEVOICE: &str = "transcribe:sensevoice";

// Job priorities; lower runs earlier.
pub const JOB_PRIORITY_IMMEDIATE: i64 = 0;
pub const JOB_PRIORITY_NORMAL: i64 = 5;
pub const JOB_PRIORITY_BATCH: i64 = 9;

pub const ARTIFACT_TYPE_TRANSCRIPTION: &str = "transcription";
pub const ARTIFACT_TYPE_SUMMARY: &str = "summary";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn parse(value: &str) -> ZbResult<Self> {
        match value {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ZbError::Storage(format!("unknown job status `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SourceStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn parse(value: &str) -> ZbResult<Self> {
        match value {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ZbError::Storage(format!("unknown source status `{other}`"))),
        }
    }
}

/// An ingested upload. Destroying a source cascades to its jobs and
/// artifacts.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub id: String,
    pub kind: String,
    pub file_path: Option<String>,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: SourceStatus,
}

impl SourceRecord {
    #[must_use]
    pub fn new(kind: &str, file_path: Option<String>, metadata: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.to_owned(),
            file_path,
            metadata,
            created_at: Utc::now(),
            status: SourceStatus::Pending,
        }
    }
}

/// A unit of scheduled work.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub source_id: Option<String>,
    pub kind: String,
    pub status: JobStatus,
    pub priority: i64,
    pub progress: i64,
    pub current_step: Option<String>,
    pub retry_count: i64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    #[must_use]
    pub fn new(kind: &str, source_id: Option<String>, priority: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_id,
            kind: kind.to_owned(),
            status: JobStatus::Queued,
            priority,
            progress: 0,
            current_step: None,
            retry_count: 0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// A persisted derivative of a source, e.g. the JSON transcription.
#[derive(Debug, Clone)]
pub struct ArtifactRecord {
    pub id: String,
    pub source_id: Option<String>,
    pub kind: String,
    pub content: Option<String>,
    pub format: Option<String>,
    pub file_path: Option<String>,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ArtifactRecord {
    #[must_use]
    pub fn new(source_id: &str, kind: &str, content: String, format: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_id: Some(source_id.to_owned()),
            kind: kind.to_owned(),
            content: Some(content),
            format: Some(format.to_owned()),
            file_path: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sources (
    id          TEXT PRIMARY KEY,
    type        TEXT NOT NULL,
    file_path   TEXT,
    metadata    TEXT,
    created_at  TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'pending'
);

CREATE TABLE IF NOT EXISTS processing_jobs (
    id           TEXT PRIMARY KEY,
    source_id    TEXT REFERENCES sources(id) ON DELETE CASCADE,
    type         TEXT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'queued',
    priority     INTEGER NOT NULL DEFAULT 5,
    progress     INTEGER NOT NULL DEFAULT 0,
    current_step TEXT,
    retry_count  INTEGER NOT NULL DEFAULT 0,
    error        TEXT,
    created_at   TEXT NOT NULL,
    started_at   TEXT,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS processing_artifacts (
    id          TEXT PRIMARY KEY,
    source_id   TEXT REFERENCES sources(id) ON DELETE CASCADE,
    type        TEXT NOT NULL,
    content     TEXT,
    format      TEXT,
    file_path   TEXT,
    metadata    TEXT,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_status ON processing_jobs(status);
CREATE INDEX IF NOT EXISTS idx_jobs_priority_created ON processing_jobs(priority, created_at);
CREATE INDEX IF NOT EXISTS idx_sources_status ON sources(status);
";

pub struct Database {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    pub fn open(path: &Path) -> ZbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    pub fn open_in_memory() -> ZbResult<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> ZbResult<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> ZbResult<T>) -> ZbResult<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| ZbError::Storage("database mutex poisoned".to_owned()))?;
        f(&conn)
    }

    // -- sources ------------------------------------------------------------

    pub fn create_source(&self, source: &SourceRecord) -> ZbResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sources (id, type, file_path, metadata, created_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    source.id,
                    source.kind,
                    source.file_path,
                    source.metadata,
                    encode_time(source.created_at),
                    source.status.as_str(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_source(&self, id: &str) -> ZbResult<Option<SourceRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, type, file_path, metadata, created_at, status
                 FROM sources WHERE id = ?1",
                params![id],
                source_from_row,
            )
            .optional()
            .map_err(ZbError::from)
        })
    }

    pub fn update_source_status(&self, id: &str, status: SourceStatus) -> ZbResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sources SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )?;
            Ok(())
        })
    }

    /// Delete a source row. Jobs and artifacts referencing it cascade; the
    /// caller owns on-disk file removal.
    pub fn delete_source(&self, id: &str) -> ZbResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM sources WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    pub fn list_sources(&self, limit: usize, offset: usize) -> ZbResult<Vec<SourceRecord>> {
        let limit = if limit == 0 { 20 } else { limit };
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, type, file_path, metadata, created_at, status
                 FROM sources ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt.query_map(params![limit as i64, offset as i64], source_from_row)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(ZbError::from)
        })
    }

    // -- jobs ---------------------------------------------------------------

    pub fn create_job(&self, job: &JobRecord) -> ZbResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO processing_jobs
                 (id, source_id, type, status, priority, progress, current_step,
                  retry_count, error, created_at, started_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    job.id,
                    job.source_id,
                    job.kind,
                    job.status.as_str(),
                    job.priority,
                    job.progress,
                    job.current_step,
                    job.retry_count,
                    job.error,
                    encode_time(job.created_at),
                    job.started_at.map(encode_time),
                    job.completed_at.map(encode_time),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_job(&self, id: &str) -> ZbResult<Option<JobRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{JOB_SELECT} WHERE id = ?1"),
                params![id],
                job_from_row,
            )
            .optional()
            .map_err(ZbError::from)
        })
    }

    /// The single queued job minimising `(priority, created_at)`.
    pub fn get_next_queued(&self) -> ZbResult<Option<JobRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "{JOB_SELECT} WHERE status = 'queued'
                     ORDER BY priority ASC, created_at ASC LIMIT 1"
                ),
                [],
                job_from_row,
            )
            .optional()
            .map_err(ZbError::from)
        })
    }

    /// Transition queued -> running. The update is guarded on the current
    /// status, so a second `start_job` on the same id fails and no two
    /// workers can run the same job.
    pub fn start_job(&self, id: &str) -> ZbResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE processing_jobs SET status = 'running', started_at = ?1
                 WHERE id = ?2 AND status = 'queued'",
                params![encode_time(Utc::now()), id],
            )?;
            if changed == 0 {
                return Err(ZbError::Storage(format!("job {id} is not queued")));
            }
            Ok(())
        })
    }

    /// Cheap enough to call many times a second.
    pub fn update_job_progress(
        &self,
        id: &str,
        progress: i64,
        step: Option<&str>,
    ) -> ZbResult<()> {
        self.with_conn(|conn| {
            match step {
                Some(step) => conn.execute(
                    "UPDATE processing_jobs SET progress = ?1, current_step = ?2 WHERE id = ?3",
                    params![progress, step, id],
                )?,
                None => conn.execute(
                    "UPDATE processing_jobs SET progress = ?1 WHERE id = ?2",
                    params![progress, id],
                )?,
            };
            Ok(())
        })
    }

    pub fn complete_job(&self, id: &str) -> ZbResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE processing_jobs
                 SET status = 'completed', progress = 100, completed_at = ?1
                 WHERE id = ?2 AND status = 'running'",
                params![encode_time(Utc::now()), id],
            )?;
            Ok(())
        })
    }

    pub fn fail_job(&self, id: &str, error: &str) -> ZbResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE processing_jobs
                 SET status = 'failed', error = ?1, completed_at = ?2
                 WHERE id = ?3",
                params![error, encode_time(Utc::now()), id],
            )?;
            Ok(())
        })
    }

    /// Return a running job to the queue, bumping its retry count and
    /// clearing the stored error.
    pub fn retry_job(&self, id: &str) -> ZbResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE processing_jobs
                 SET status = 'queued', retry_count = retry_count + 1,
                     error = NULL, started_at = NULL
                 WHERE id = ?1 AND status = 'running'",
                params![id],
            )?;
            Ok(())
        })
    }

    pub fn delete_job(&self, id: &str) -> ZbResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM processing_jobs WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    /// Bulk-delete completed jobs finished before the cutoff. Returns the
    /// number of rows removed.
    pub fn cleanup_completed_jobs(&self, older_than: DateTime<Utc>) -> ZbResult<usize> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM processing_jobs
                 WHERE status = 'completed' AND completed_at < ?1",
                params![encode_time(older_than)],
            )?;
            Ok(deleted)
        })
    }

    pub fn list_jobs_by_status(&self, status: JobStatus, limit: usize) -> ZbResult<Vec<JobRecord>> {
        let limit = if limit == 0 { 50 } else { limit };
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{JOB_SELECT} WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![status.as_str(), limit as i64], job_from_row)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(ZbError::from)
        })
    }

    pub fn list_recent_jobs(&self, limit: usize) -> ZbResult<Vec<JobRecord>> {
        let limit = if limit == 0 { 50 } else { limit };
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("{JOB_SELECT} ORDER BY created_at DESC LIMIT ?1"))?;
            let rows = stmt.query_map(params![limit as i64], job_from_row)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(ZbError::from)
        })
    }

    pub fn jobs_by_source(&self, source_id: &str) -> ZbResult<Vec<JobRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{JOB_SELECT} WHERE source_id = ?1 ORDER BY created_at DESC"
            ))?;
            let rows = stmt.query_map(params![source_id], job_from_row)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(ZbError::from)
        })
    }

    pub fn count_jobs_by_status(&self) -> ZbResult<HashMap<String, i64>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM processing_jobs GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            rows.collect::<Result<HashMap<_, _>, _>>()
                .map_err(ZbError::from)
        })
    }

    // -- artifacts ----------------------------------------------------------

    pub fn create_artifact(&self, artifact: &ArtifactRecord) -> ZbResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO processing_artifacts
                 (id, source_id, type, content, format, file_path, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    artifact.id,
                    artifact.source_id,
                    artifact.kind,
                    artifact.content,
                    artifact.format,
                    artifact.file_path,
                    artifact.metadata,
                    encode_time(artifact.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_artifact(&self, id: &str) -> ZbResult<Option<ArtifactRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{ARTIFACT_SELECT} WHERE id = ?1"),
                params![id],
                artifact_from_row,
            )
            .optional()
            .map_err(ZbError::from)
        })
    }

    pub fn artifacts_by_source(&self, source_id: &str) -> ZbResult<Vec<ArtifactRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{ARTIFACT_SELECT} WHERE source_id = ?1 ORDER BY created_at DESC"
            ))?;
            let rows = stmt.query_map(params![source_id], artifact_from_row)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(ZbError::from)
        })
    }

    pub fn update_artifact_content(&self, id: &str, content: &str) -> ZbResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE processing_artifacts SET content = ?1 WHERE id = ?2",
                params![content, id],
            )?;
            Ok(())
        })
    }

    pub fn delete_artifacts_by_source(&self, source_id: &str) -> ZbResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM processing_artifacts WHERE source_id = ?1",
                params![source_id],
            )?;
            Ok(())
        })
    }
}

const JOB_SELECT: &str = "SELECT id, source_id, type, status, priority, progress, current_step,
        retry_count, error, created_at, started_at, completed_at
 FROM processing_jobs";

const ARTIFACT_SELECT: &str =
    "SELECT id, source_id, type, content, format, file_path, metadata, created_at
 FROM processing_artifacts";

fn encode_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<SourceRecord> {
    Ok(SourceRecord {
        id: row.get(0)?,
        kind: row.get(1)?,
        file_path: row.get(2)?,
        metadata: row.get(3)?,
        created_at: decode_time(&row.get::<_, String>(4)?)?,
        status: SourceStatus::parse(&row.get::<_, String>(5)?).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::other(e.to_string())),
            )
        })?,
    })
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        id: row.get(0)?,
        source_id: row.get(1)?,
        kind: row.get(2)?,
        status: JobStatus::parse(&row.get::<_, String>(3)?).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::other(e.to_string())),
            )
        })?,
        priority: row.get(4)?,
        progress: row.get(5)?,
        current_step: row.get(6)?,
        retry_count: row.get(7)?,
        error: row.get(8)?,
        created_at: decode_time(&row.get::<_, String>(9)?)?,
        started_at: row
            .get::<_, Option<String>>(10)?
            .map(|s| decode_time(&s))
            .transpose()?,
        completed_at: row
            .get::<_, Option<String>>(11)?
            .map(|s| decode_time(&s))
            .transpose()?,
    })
}

fn artifact_from_row(row: &Row<'_>) -> rusqlite::Result<ArtifactRecord> {
    Ok(ArtifactRecord {
        id: row.get(0)?,
        source_id: row.get(1)?,
        kind: row.get(2)?,
        content: row.get(3)?,
        format: row.get(4)?,
        file_path: row.get(5)?,
        metadata: row.get(6)?,
        created_at: decode_time(&row.get::<_, String>(7)?)?,
    })
}
