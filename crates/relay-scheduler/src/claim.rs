//! Claim Protocol: exclusive ownership of a due job.

use std::ops::Deref;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    error::Result,
    store::JobStore,
    types::{JobStatus, ScheduledJob},
};

/// A job this worker moved from `to_do` to `in_progress`.
///
/// Only [`claim`] constructs one, so holding a `ClaimedJob` means the caller
/// won the conditional update and owns the job until it is resolved.
#[derive(Debug, Clone)]
pub struct ClaimedJob(ScheduledJob);

impl ClaimedJob {
    pub fn into_inner(self) -> ScheduledJob {
        self.0
    }
}

impl Deref for ClaimedJob {
    type Target = ScheduledJob;

    fn deref(&self) -> &ScheduledJob {
        &self.0
    }
}

/// Atomically take ownership of `id`.
///
/// `Ok(None)` means another worker got there first or the job no longer
/// exists; callers skip it silently.
pub async fn claim(store: &dyn JobStore, id: &str, at: DateTime<Utc>) -> Result<Option<ClaimedJob>> {
    let claimed = store
        .conditional_update(id, JobStatus::ToDo, JobStatus::InProgress, at)
        .await?;
    if claimed.is_none() {
        debug!(job_id = %id, "claim lost");
    }
    Ok(claimed.map(ClaimedJob))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteJobStore;
    use crate::types::{JobType, NewJob};
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let store = Arc::new(SqliteJobStore::open_in_memory().unwrap());
        let job = store
            .create(NewJob {
                client_name: "acme".into(),
                job_name: "race".into(),
                job_type: JobType::Whatsapp,
                payload: serde_json::json!({ "phone": "1", "message": "x" }),
                media_url: None,
                scheduled_at: Utc::now(),
            })
            .await
            .unwrap();

        let attempts: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let id = job.id.clone();
                tokio::spawn(async move { claim(&*store, &id, Utc::now()).await })
            })
            .collect();

        let mut winners = 0;
        for a in attempts {
            if a.await.unwrap().unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
