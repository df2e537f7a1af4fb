pub mod health;
pub mod jobs;
pub mod whatsapp;

use axum::{http::StatusCode, Json};
use relay_channels::ChannelError;
use relay_core::RelayError;
use relay_scheduler::SchedulerError;
use serde_json::{json, Value};
use tracing::warn;

pub type ApiError = (StatusCode, Json<Value>);

// ── Error helpers ─────────────────────────────────────────────────────────────

/// Map a [`RelayError`] to its HTTP status and JSON body.
pub fn api_error(err: RelayError) -> ApiError {
    let status = match &err {
        RelayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        RelayError::Validation(_) => StatusCode::BAD_REQUEST,
        RelayError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        RelayError::Channel { .. } => StatusCode::BAD_GATEWAY,
        RelayError::Config(_) | RelayError::Database(_) | RelayError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let message = match &err {
        // Reason is logged, never returned.
        RelayError::Unauthorized(reason) => {
            warn!(%reason, "request rejected");
            "Unauthorized".to_string()
        }
        other => other.to_string(),
    };
    (status, Json(json!({ "error": message, "code": err.code() })))
}

pub fn from_channel(channel: &str, err: ChannelError) -> RelayError {
    match err {
        ChannelError::NotReady => RelayError::Unavailable(format!("{channel} is not ready")),
        ChannelError::GatewayClosed => RelayError::Internal(err.to_string()),
        other => RelayError::Channel {
            channel: channel.to_string(),
            reason: other.to_string(),
        },
    }
}

pub fn from_scheduler(err: SchedulerError) -> RelayError {
    match err {
        SchedulerError::Validation(msg) => RelayError::Validation(msg),
        SchedulerError::Database(e) => RelayError::Database(e.to_string()),
        SchedulerError::Store(msg) => RelayError::Database(msg),
        SchedulerError::Dispatch(e) => from_channel("channel", e),
        other => RelayError::Internal(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_kind() {
        assert_eq!(api_error(RelayError::Unauthorized("x".into())).0, StatusCode::UNAUTHORIZED);
        assert_eq!(
            api_error(from_channel("whatsapp", ChannelError::NotReady)).0,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            api_error(from_channel("whatsapp", ChannelError::Timeout { ms: 10 })).0,
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            api_error(from_scheduler(SchedulerError::Store("down".into()))).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn unauthorized_body_hides_reason() {
        let (_, Json(body)) = api_error(RelayError::Unauthorized("trigger secret mismatch".into()));
        assert_eq!(body["error"], "Unauthorized");
    }
}
