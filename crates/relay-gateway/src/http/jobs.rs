//! Job endpoints: the manual trigger and read-only listings.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use relay_core::RelayError;
use relay_scheduler::{PastJob, ScheduledJob, TickOutcome};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

use super::{api_error, from_scheduler, ApiError};
use crate::{app::AppState, auth::verify_trigger};

const DEFAULT_PAST_LIMIT: usize = 50;
const MAX_PAST_LIMIT: usize = 500;

/// GET|POST /api/jobs/run — run one tick now.
///
/// Requires the `x-cron-secret` header. Returns `{success, processed}`;
/// a tick that could not run adds `skipped` with the reason.
pub async fn run_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    verify_trigger(&headers, state.config.gateway.trigger_secret()).map_err(api_error)?;

    // Own task: a dropped request must not abandon claimed jobs mid-tick.
    let engine = Arc::clone(&state.engine);
    let outcome = tokio::spawn(async move { engine.tick().await })
        .await
        .map_err(|e| {
            error!(error = %e, "manual tick task died");
            api_error(RelayError::Internal(format!("tick task failed: {e}")))
        })?
        .map_err(|e| {
            error!(error = %e, "manual tick failed");
            api_error(from_scheduler(e))
        })?;

    let body = match outcome {
        TickOutcome::Ran(report) => {
            info!(processed = report.processed(), "manual tick finished");
            json!({ "success": true, "processed": report.processed(), "report": report })
        }
        TickOutcome::Skipped(reason) => {
            json!({ "success": true, "processed": 0, "skipped": reason })
        }
    };
    Ok(Json(body))
}

/// GET /api/jobs/scheduled — pending jobs, earliest first.
pub async fn scheduled_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ScheduledJob>>, ApiError> {
    state
        .engine
        .store()
        .list_scheduled()
        .await
        .map(Json)
        .map_err(|e| api_error(from_scheduler(e)))
}

#[derive(Debug, Deserialize)]
pub struct PastQuery {
    pub limit: Option<usize>,
}

/// GET /api/jobs/past?limit=N — most recently resolved first.
pub async fn past_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PastQuery>,
) -> Result<Json<Vec<PastJob>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAST_LIMIT).clamp(1, MAX_PAST_LIMIT);
    state
        .engine
        .store()
        .list_past(limit)
        .await
        .map(Json)
        .map_err(|e| api_error(from_scheduler(e)))
}

#[cfg(test)]
mod tests {
    use crate::testing::{body_json, request, TestChannel, TestContext, SECRET};
    use axum::http::StatusCode;
    use chrono::Utc;
    use relay_scheduler::{JobStore, JobType, NewJob, PastJobStatus};
    use serde_json::json;
    use std::time::Duration;

    async fn due_job(ctx: &TestContext, phone: &str) {
        ctx.store
            .create(NewJob {
                client_name: "acme".into(),
                job_name: "reminder".into(),
                job_type: JobType::Whatsapp,
                payload: json!({ "phone": phone, "message": "hi" }),
                media_url: None,
                scheduled_at: Utc::now() - chrono::Duration::seconds(1),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn trigger_requires_secret() {
        let ctx = TestContext::ready(TestChannel::default()).await;
        due_job(&ctx, "9876543210").await;

        let res = request(&ctx, "POST", "/api/jobs/run", None, Some("wrong")).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(res).await["error"], "Unauthorized");

        let res = request(&ctx, "GET", "/api/jobs/run", None, None).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        // nothing was touched
        assert_eq!(ctx.store.list_scheduled().await.unwrap().len(), 1);
        assert!(ctx.channel.recipients().is_empty());
    }

    #[tokio::test]
    async fn trigger_runs_one_tick() {
        let ctx = TestContext::ready(TestChannel::default()).await;
        due_job(&ctx, "9876543210").await;
        due_job(&ctx, "919876543211").await;

        let res = request(&ctx, "POST", "/api/jobs/run", None, Some(SECRET)).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["processed"], 2);

        assert!(ctx.store.list_scheduled().await.unwrap().is_empty());
        assert_eq!(ctx.channel.recipients(), ["919876543210", "919876543211"]);
    }

    #[tokio::test]
    async fn dropped_trigger_still_resolves_claimed_jobs() {
        let ctx = TestContext::ready(TestChannel::slow(300)).await;
        due_job(&ctx, "919876543210").await;

        // Client gives up while the send is still in flight.
        let res = tokio::time::timeout(
            Duration::from_millis(50),
            request(&ctx, "POST", "/api/jobs/run", None, Some(SECRET)),
        )
        .await;
        assert!(res.is_err());

        for _ in 0..100 {
            if !ctx.store.list_past(10).await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(ctx.channel.recipients(), ["919876543210"]);
        assert!(ctx.store.list_scheduled().await.unwrap().is_empty());
        let past = ctx.store.list_past(10).await.unwrap();
        assert_eq!(past.len(), 1);
        assert_eq!(past[0].status, PastJobStatus::Delivered);
    }

    #[tokio::test]
    async fn trigger_reports_skip_when_channel_not_ready() {
        let ctx = TestContext::idle(TestChannel::default()).await;
        due_job(&ctx, "9876543210").await;

        let res = request(&ctx, "GET", "/api/jobs/run", None, Some(SECRET)).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert_eq!(body["processed"], 0);
        assert_eq!(body["skipped"], "channel_not_ready");
    }

    #[tokio::test]
    async fn listings_show_pending_and_history() {
        let ctx = TestContext::ready(TestChannel::default()).await;
        due_job(&ctx, "9876543210").await;

        let res = request(&ctx, "GET", "/api/jobs/scheduled", None, None).await;
        let pending = body_json(res).await;
        assert_eq!(pending.as_array().unwrap().len(), 1);
        assert_eq!(pending[0]["status"], "to_do");

        request(&ctx, "POST", "/api/jobs/run", None, Some(SECRET)).await;

        let res = request(&ctx, "GET", "/api/jobs/past?limit=5", None, None).await;
        let past = body_json(res).await;
        assert_eq!(past[0]["status"], "delivered");
        let res = request(&ctx, "GET", "/api/jobs/scheduled", None, None).await;
        assert!(body_json(res).await.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn health_is_public() {
        let ctx = TestContext::idle(TestChannel::default()).await;
        let res = request(&ctx, "GET", "/health", None, None).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["channel"], "disconnected");
    }
}
