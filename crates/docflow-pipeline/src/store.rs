// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Archive of finished jobs backed by SQLite.
//
// Terminal job records are written here so results stay retrievable after
// they leave memory and across restarts, until the retention sweep removes
// them. Only the record is stored; document bytes never are.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use docflow_core::error::{DocflowError, Result};
use docflow_core::{Job, JobId};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, instrument};

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        document_hash TEXT NOT NULL,
        finished_at TEXT NOT NULL,
        snapshot TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS jobs_finished_at ON jobs (finished_at);
"#;

/// Persistent store of terminal job records.
///
/// Calls are synchronous; the connection sits behind a mutex so the archive
/// can be shared between the lifecycle manager and the eviction sweeper.
pub struct JobArchive {
    conn: Mutex<Connection>,
}

impl JobArchive {
    /// Open (or create) the archive database at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| DocflowError::Database(format!("open: {e}")))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| DocflowError::Database(format!("WAL pragma: {e}")))?;

        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| DocflowError::Database(format!("create table: {e}")))?;

        info!("job archive opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DocflowError::Database(format!("open in-memory: {e}")))?;

        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| DocflowError::Database(format!("create table: {e}")))?;

        debug!("in-memory job archive opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a finished job, replacing any earlier record with the same id.
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub fn save(&self, job: &Job) -> Result<()> {
        if !job.status.is_terminal() {
            return Err(DocflowError::Database(format!(
                "job {} is {}; only finished jobs are archived",
                job.id, job.status
            )));
        }
        let finished_at = job.finished_at.unwrap_or_else(Utc::now);
        let snapshot = serde_json::to_string(job)?;

        self.conn()
            .execute(
                "INSERT OR REPLACE INTO jobs (id, status, document_hash, finished_at, snapshot)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    job.id.to_string(),
                    job.status.as_str(),
                    job.document.hash,
                    finished_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                    snapshot,
                ],
            )
            .map_err(|e| DocflowError::Database(format!("save job: {e}")))?;

        debug!(status = %job.status, "job archived");
        Ok(())
    }

    /// Load an archived job. Returns `None` if it was never archived or has
    /// been swept.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn load(&self, id: &JobId) -> Result<Option<Job>> {
        let snapshot: Option<String> = self
            .conn()
            .query_row(
                "SELECT snapshot FROM jobs WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| DocflowError::Database(format!("load job: {e}")))?;

        snapshot
            .map(|json| serde_json::from_str(&json).map_err(DocflowError::from))
            .transpose()
    }

    /// Delete records that finished before `cutoff`. Returns how many went.
    #[instrument(skip(self))]
    pub fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self
            .conn()
            .execute(
                "DELETE FROM jobs WHERE finished_at < ?1",
                params![cutoff.to_rfc3339_opts(SecondsFormat::Micros, true)],
            )
            .map_err(|e| DocflowError::Database(format!("delete finished: {e}")))?;

        if removed > 0 {
            info!(removed, "expired jobs removed from archive");
        }
        Ok(removed)
    }

    pub fn count(&self) -> Result<usize> {
        self.conn()
            .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .map_err(|e| DocflowError::Database(format!("count jobs: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use docflow_core::{DocumentRef, DocumentType, JobOptions, JobStatus};

    use super::*;

    fn finished_job(status: JobStatus, finished_at: DateTime<Utc>) -> Job {
        let created_at = finished_at - ChronoDuration::seconds(5);
        Job {
            id: JobId::new(),
            document: DocumentRef {
                name: "scan.pdf".into(),
                document_type: DocumentType::Pdf,
                hash: "abc123".into(),
                size_bytes: 42,
            },
            options: JobOptions::default(),
            status,
            stages: Vec::new(),
            created_at,
            deadline_at: created_at + ChronoDuration::hours(1),
            started_at: Some(created_at),
            finished_at: Some(finished_at),
            reason: None,
            output: None,
            cancel_requested: false,
        }
    }

    #[test]
    fn save_and_load() {
        let archive = JobArchive::open_in_memory().expect("open in-memory db");
        let job = finished_job(JobStatus::Failed, Utc::now());
        archive.save(&job).expect("save");

        let loaded = archive.load(&job.id).expect("load").expect("present");
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.status, JobStatus::Failed);
        assert_eq!(loaded.document, job.document);
        assert!(archive.load(&JobId::new()).expect("load").is_none());
    }

    #[test]
    fn running_jobs_are_refused() {
        let archive = JobArchive::open_in_memory().expect("open");
        let job = finished_job(JobStatus::Running, Utc::now());
        assert!(matches!(archive.save(&job), Err(DocflowError::Database(_))));
        assert_eq!(archive.count().expect("count"), 0);
    }

    #[test]
    fn saving_twice_replaces() {
        let archive = JobArchive::open_in_memory().expect("open");
        let mut job = finished_job(JobStatus::Cancelled, Utc::now());
        archive.save(&job).expect("save");
        job.reason = Some("cancelled by caller".into());
        archive.save(&job).expect("save again");

        assert_eq!(archive.count().expect("count"), 1);
        let loaded = archive.load(&job.id).expect("load").expect("present");
        assert_eq!(loaded.reason.as_deref(), Some("cancelled by caller"));
    }

    #[test]
    fn sweep_removes_only_expired() {
        let archive = JobArchive::open_in_memory().expect("open");
        let now = Utc::now();
        let old = finished_job(JobStatus::Completed, now - ChronoDuration::hours(2));
        let fresh = finished_job(JobStatus::Completed, now);
        archive.save(&old).expect("save");
        archive.save(&fresh).expect("save");

        let removed = archive
            .delete_finished_before(now - ChronoDuration::hours(1))
            .expect("sweep");
        assert_eq!(removed, 1);
        assert!(archive.load(&old.id).expect("load").is_none());
        assert!(archive.load(&fresh.id).expect("load").is_some());
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("jobs.db");
        let job = finished_job(JobStatus::DeadlineExceeded, Utc::now());
        {
            let archive = JobArchive::open(&path).expect("open");
            archive.save(&job).expect("save");
        }
        let archive = JobArchive::open(&path).expect("reopen");
        let loaded = archive.load(&job.id).expect("load").expect("present");
        assert_eq!(loaded.status, JobStatus::DeadlineExceeded);
    }
}
