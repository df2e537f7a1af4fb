use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of work a job represents. Only `Whatsapp` has a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Post,
    Video,
    Whatsapp,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobType::Post => "post",
            JobType::Video => "video",
            JobType::Whatsapp => "whatsapp",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "post" => Ok(JobType::Post),
            "video" => Ok(JobType::Video),
            "whatsapp" => Ok(JobType::Whatsapp),
            other => Err(format!("unknown job type: {other}")),
        }
    }
}

/// Pending-side lifecycle of a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Due (or waiting to become due) and unowned.
    ToDo,
    /// Claimed by a tick and not yet resolved.
    InProgress,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::ToDo => "to_do",
            JobStatus::InProgress => "in_progress",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "to_do" => Ok(JobStatus::ToDo),
            "in_progress" => Ok(JobStatus::InProgress),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Terminal outcome recorded in the history store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PastJobStatus {
    Delivered,
    Failed,
}

impl std::fmt::Display for PastJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PastJobStatus::Delivered => "delivered",
            PastJobStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for PastJobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "delivered" => Ok(PastJobStatus::Delivered),
            "failed" => Ok(PastJobStatus::Failed),
            other => Err(format!("unknown past job status: {other}")),
        }
    }
}

/// A job waiting in the pending store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    /// UUID v7 string — primary key, assigned by the store.
    pub id: String,
    pub client_name: String,
    pub job_name: String,
    pub job_type: JobType,
    /// Type-specific payload; for whatsapp `{"phone": ..., "message": ...}`.
    pub payload: serde_json::Value,
    /// Optional pointer to stored media.
    pub media_url: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub status: JobStatus,
    /// Failed dispatches so far (only grows under a retry policy).
    pub attempts: u32,
    /// When the current lease was taken; `None` while `to_do`.
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// What the intake boundary hands to [`JobStore::create`](crate::store::JobStore::create).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub client_name: String,
    pub job_name: String,
    pub job_type: JobType,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub media_url: Option<String>,
    pub scheduled_at: DateTime<Utc>,
}

/// Append-only history record. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PastJob {
    /// Same ID the job had while pending.
    pub id: String,
    pub client_name: String,
    pub job_name: String,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub media_url: Option<String>,
    pub status: PastJobStatus,
    /// Present iff `status == Failed`.
    pub error: Option<String>,
    pub attempts: u32,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: DateTime<Utc>,
}

impl PastJob {
    pub fn delivered(job: &ScheduledJob, at: DateTime<Utc>) -> Self {
        Self::from_job(job, PastJobStatus::Delivered, None, job.attempts, at)
    }

    /// `attempts` includes the dispatch that just failed.
    pub fn failed(job: &ScheduledJob, error: impl Into<String>, attempts: u32, at: DateTime<Utc>) -> Self {
        Self::from_job(job, PastJobStatus::Failed, Some(error.into()), attempts, at)
    }

    fn from_job(
        job: &ScheduledJob,
        status: PastJobStatus,
        error: Option<String>,
        attempts: u32,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: job.id.clone(),
            client_name: job.client_name.clone(),
            job_name: job.job_name.clone(),
            job_type: job.job_type,
            payload: job.payload.clone(),
            media_url: job.media_url.clone(),
            status,
            error,
            attempts,
            scheduled_at: job.scheduled_at,
            created_at: job.created_at,
            delivered_at: at,
        }
    }
}
