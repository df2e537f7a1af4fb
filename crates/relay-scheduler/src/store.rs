//! Job Store Adapter: pending jobs and their append-only history.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    db::{from_db_time, init_db, to_db_time},
    error::{Result, SchedulerError},
    types::{JobStatus, JobType, NewJob, PastJob, PastJobStatus, ScheduledJob},
};

/// Storage operations the scheduler needs.
///
/// Every method is a single atomic unit against the backing store.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// `to_do` jobs with `scheduled_at <= now`, earliest first.
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>>;

    /// Move `id` from `expected` to `new` in one conditional write.
    ///
    /// Returns the updated record, or `None` when the job is gone or was not
    /// in `expected`. Entering `in_progress` stamps `claimed_at = at`; any
    /// other target clears it.
    async fn conditional_update(
        &self,
        id: &str,
        expected: JobStatus,
        new: JobStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<ScheduledJob>>;

    /// Write the history record and delete the pending job together.
    ///
    /// Fails with [`SchedulerError::JobNotFound`] (and writes nothing) when
    /// the pending job no longer exists.
    async fn archive(&self, past: PastJob) -> Result<()>;

    /// Hand an in-progress job back to the queue for a later attempt.
    async fn requeue(&self, id: &str, next_at: DateTime<Utc>, attempts: u32) -> Result<()>;

    /// In-progress jobs claimed before `before`.
    async fn find_stale(&self, before: DateTime<Utc>) -> Result<Vec<ScheduledJob>>;

    async fn create(&self, job: NewJob) -> Result<ScheduledJob>;

    /// All pending jobs, earliest `scheduled_at` first.
    async fn list_scheduled(&self) -> Result<Vec<ScheduledJob>>;

    /// Most recently resolved first.
    async fn list_past(&self, limit: usize) -> Result<Vec<PastJob>>;
}

/// SQLite-backed [`JobStore`].
///
/// One connection behind a mutex; every query runs on the blocking pool so
/// the tick loop and HTTP handlers never stall the runtime.
#[derive(Clone)]
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

const JOB_COLUMNS: &str = "id, client_name, job_name, job_type, payload, media_url,
     scheduled_at, status, attempts, claimed_at, created_at";

const PAST_COLUMNS: &str = "id, client_name, job_name, job_type, payload, media_url,
     status, error, attempts, scheduled_at, created_at, delivered_at";

impl SqliteJobStore {
    /// Wrap `conn`, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        })
        .await
        .map_err(|e| SchedulerError::Store(format!("store task failed: {e}")))?
    }
}

// ── Row mapping ─────────────────────────────────────────────────────────────

/// Text columns as stored; converted to typed records in a second step so a
/// single corrupt row is skipped instead of failing the whole query.
struct JobRow {
    id: String,
    client_name: String,
    job_name: String,
    job_type: String,
    payload: String,
    media_url: Option<String>,
    scheduled_at: String,
    status: String,
    attempts: u32,
    claimed_at: Option<String>,
    created_at: String,
}

impl JobRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            client_name: row.get(1)?,
            job_name: row.get(2)?,
            job_type: row.get(3)?,
            payload: row.get(4)?,
            media_url: row.get(5)?,
            scheduled_at: row.get(6)?,
            status: row.get(7)?,
            attempts: row.get(8)?,
            claimed_at: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn into_job(self) -> std::result::Result<ScheduledJob, String> {
        let claimed_at = match self.claimed_at.as_deref() {
            Some(s) => Some(from_db_time(s).map_err(|e| format!("claimed_at: {e}"))?),
            None => None,
        };
        Ok(ScheduledJob {
            job_type: self.job_type.parse::<JobType>()?,
            status: self.status.parse::<JobStatus>()?,
            payload: parse_payload(self.payload),
            scheduled_at: from_db_time(&self.scheduled_at).map_err(|e| format!("scheduled_at: {e}"))?,
            created_at: from_db_time(&self.created_at).map_err(|e| format!("created_at: {e}"))?,
            claimed_at,
            id: self.id,
            client_name: self.client_name,
            job_name: self.job_name,
            media_url: self.media_url,
            attempts: self.attempts,
        })
    }
}

struct PastRow {
    id: String,
    client_name: String,
    job_name: String,
    job_type: String,
    payload: String,
    media_url: Option<String>,
    status: String,
    error: Option<String>,
    attempts: u32,
    scheduled_at: String,
    created_at: String,
    delivered_at: String,
}

impl PastRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            client_name: row.get(1)?,
            job_name: row.get(2)?,
            job_type: row.get(3)?,
            payload: row.get(4)?,
            media_url: row.get(5)?,
            status: row.get(6)?,
            error: row.get(7)?,
            attempts: row.get(8)?,
            scheduled_at: row.get(9)?,
            created_at: row.get(10)?,
            delivered_at: row.get(11)?,
        })
    }

    fn into_past(self) -> std::result::Result<PastJob, String> {
        Ok(PastJob {
            job_type: self.job_type.parse::<JobType>()?,
            status: self.status.parse::<PastJobStatus>()?,
            payload: parse_payload(self.payload),
            scheduled_at: from_db_time(&self.scheduled_at).map_err(|e| format!("scheduled_at: {e}"))?,
            created_at: from_db_time(&self.created_at).map_err(|e| format!("created_at: {e}"))?,
            delivered_at: from_db_time(&self.delivered_at).map_err(|e| format!("delivered_at: {e}"))?,
            id: self.id,
            client_name: self.client_name,
            job_name: self.job_name,
            media_url: self.media_url,
            error: self.error,
            attempts: self.attempts,
        })
    }
}

/// Unparseable payloads are kept as a raw string; validation then rejects
/// the job instead of it being stuck in the queue.
fn parse_payload(raw: String) -> serde_json::Value {
    serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
}

fn collect_jobs(rows: impl Iterator<Item = rusqlite::Result<JobRow>>) -> Result<Vec<ScheduledJob>> {
    let mut jobs = Vec::new();
    for row in rows {
        let row = row?;
        let id = row.id.clone();
        match row.into_job() {
            Ok(job) => jobs.push(job),
            Err(e) => warn!(job_id = %id, error = %e, "skipping unreadable scheduled job row"),
        }
    }
    Ok(jobs)
}

fn query_jobs(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<ScheduledJob>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params, JobRow::read)?;
    collect_jobs(rows)
}

// ── JobStore impl ───────────────────────────────────────────────────────────

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>> {
        let now = to_db_time(now);
        self.with_conn(move |conn| {
            query_jobs(
                conn,
                &format!(
                    "SELECT {JOB_COLUMNS} FROM scheduled_jobs
                     WHERE status = 'to_do' AND scheduled_at <= ?1
                     ORDER BY scheduled_at ASC"
                ),
                [now],
            )
        })
        .await
    }

    async fn conditional_update(
        &self,
        id: &str,
        expected: JobStatus,
        new: JobStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<ScheduledJob>> {
        let id = id.to_string();
        let claimed_at = (new == JobStatus::InProgress).then(|| to_db_time(at));
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!(
                        "UPDATE scheduled_jobs SET status = ?1, claimed_at = ?2
                         WHERE id = ?3 AND status = ?4
                         RETURNING {JOB_COLUMNS}"
                    ),
                    params![new.to_string(), claimed_at, id, expected.to_string()],
                    JobRow::read,
                )
                .optional()?;
            match row {
                Some(row) => row
                    .into_job()
                    .map(Some)
                    .map_err(|e| SchedulerError::Store(format!("unreadable job {id}: {e}"))),
                None => Ok(None),
            }
        })
        .await
    }

    async fn archive(&self, past: PastJob) -> Result<()> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute("DELETE FROM scheduled_jobs WHERE id = ?1", [&past.id])?;
            if removed == 0 {
                // Dropping `tx` rolls back.
                return Err(SchedulerError::JobNotFound { id: past.id });
            }
            tx.execute(
                &format!(
                    "INSERT INTO past_jobs ({PAST_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                params![
                    past.id,
                    past.client_name,
                    past.job_name,
                    past.job_type.to_string(),
                    past.payload.to_string(),
                    past.media_url,
                    past.status.to_string(),
                    past.error,
                    past.attempts,
                    to_db_time(past.scheduled_at),
                    to_db_time(past.created_at),
                    to_db_time(past.delivered_at),
                ],
            )?;
            tx.commit()?;
            debug!(job_id = %past.id, status = %past.status, "job archived");
            Ok(())
        })
        .await
    }

    async fn requeue(&self, id: &str, next_at: DateTime<Utc>, attempts: u32) -> Result<()> {
        let id = id.to_string();
        let next_at = to_db_time(next_at);
        self.with_conn(move |conn| {
            let n = conn.execute(
                "UPDATE scheduled_jobs
                 SET status = 'to_do', scheduled_at = ?1, attempts = ?2, claimed_at = NULL
                 WHERE id = ?3 AND status = 'in_progress'",
                params![next_at, attempts, id],
            )?;
            if n == 0 {
                return Err(SchedulerError::JobNotFound { id });
            }
            Ok(())
        })
        .await
    }

    async fn find_stale(&self, before: DateTime<Utc>) -> Result<Vec<ScheduledJob>> {
        let before = to_db_time(before);
        self.with_conn(move |conn| {
            query_jobs(
                conn,
                &format!(
                    "SELECT {JOB_COLUMNS} FROM scheduled_jobs
                     WHERE status = 'in_progress'
                       AND (claimed_at IS NULL OR claimed_at < ?1)
                     ORDER BY scheduled_at ASC"
                ),
                [before],
            )
        })
        .await
    }

    async fn create(&self, job: NewJob) -> Result<ScheduledJob> {
        if job.client_name.trim().is_empty() || job.job_name.trim().is_empty() {
            return Err(SchedulerError::Validation(
                "client_name and job_name must be non-empty".to_string(),
            ));
        }
        // Stored precision is milliseconds; return exactly what a read gives back.
        let created_at = from_db_time(&to_db_time(Utc::now()))
            .map_err(|e| SchedulerError::Store(e.to_string()))?;
        let scheduled_at = from_db_time(&to_db_time(job.scheduled_at))
            .map_err(|e| SchedulerError::Store(e.to_string()))?;
        let record = ScheduledJob {
            id: Uuid::now_v7().to_string(),
            client_name: job.client_name,
            job_name: job.job_name,
            job_type: job.job_type,
            payload: job.payload,
            media_url: job.media_url,
            scheduled_at,
            status: JobStatus::ToDo,
            attempts: 0,
            claimed_at: None,
            created_at,
        };

        let row = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO scheduled_jobs ({JOB_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'to_do', 0, NULL, ?8)"
                ),
                params![
                    row.id,
                    row.client_name,
                    row.job_name,
                    row.job_type.to_string(),
                    row.payload.to_string(),
                    row.media_url,
                    to_db_time(row.scheduled_at),
                    to_db_time(row.created_at),
                ],
            )?;
            Ok(())
        })
        .await?;

        info!(job_id = %record.id, job_type = %record.job_type, scheduled_at = %record.scheduled_at, "job scheduled");
        Ok(record)
    }

    async fn list_scheduled(&self) -> Result<Vec<ScheduledJob>> {
        self.with_conn(|conn| {
            query_jobs(
                conn,
                &format!("SELECT {JOB_COLUMNS} FROM scheduled_jobs ORDER BY scheduled_at ASC"),
                [],
            )
        })
        .await
    }

    async fn list_past(&self, limit: usize) -> Result<Vec<PastJob>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {PAST_COLUMNS} FROM past_jobs ORDER BY delivered_at DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map([limit], PastRow::read)?;
            let mut past = Vec::new();
            for row in rows {
                let row = row?;
                let id = row.id.clone();
                match row.into_past() {
                    Ok(job) => past.push(job),
                    Err(e) => warn!(job_id = %id, error = %e, "skipping unreadable past job row"),
                }
            }
            Ok(past)
        })
        .await
    }
}
