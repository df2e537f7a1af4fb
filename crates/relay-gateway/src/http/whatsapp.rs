//! Channel endpoints: status, connect, logout and direct send.
//!
//! Every send here goes through the [`SendGateway`](relay_channels::SendGateway),
//! never to the channel itself.

use axum::{extract::State, Json};
use relay_channels::{GatewayStatus, OutboundMessage};
use relay_core::RelayError;
use relay_scheduler::normalize_phone;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::{api_error, from_channel, ApiError};
use crate::app::AppState;

/// GET /api/whatsapp/status — read-only snapshot for pollers.
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<GatewayStatus> {
    Json(state.gateway.status())
}

/// POST /api/whatsapp/connect
///
/// Starts a connect attempt only when the channel is neither ready nor
/// waiting on a pairing challenge, then returns the current snapshot.
pub async fn connect_handler(State(state): State<Arc<AppState>>) -> Json<GatewayStatus> {
    let current = state.channel.status();
    if !current.is_ready() && current.auth_challenge.is_none() && state.channel.request_connect() {
        info!("whatsapp connect started via API");
    }
    Json(state.gateway.status())
}

/// POST /api/whatsapp/logout
pub async fn logout_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.channel.disconnect().await;
    Json(json!({ "success": true }))
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub phone: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
}

/// POST /api/whatsapp/send — immediate send through the gateway queue.
///
/// 400 on an unusable phone or empty content, 503 while the channel is not
/// ready, 502 when the channel rejects the message.
pub async fn send_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendRequest>,
) -> Result<Json<Value>, ApiError> {
    let recipient = normalize_phone(&req.phone, &state.phone).ok_or_else(|| {
        api_error(RelayError::Validation("phone must contain digits".into()))
    })?;
    let body = req.message.filter(|m| !m.trim().is_empty());
    let media_url = req.media_url.filter(|m| !m.trim().is_empty());
    if body.is_none() && media_url.is_none() {
        return Err(api_error(RelayError::Validation(
            "message or media_url is required".into(),
        )));
    }

    state
        .gateway
        .send(OutboundMessage {
            recipient: recipient.clone(),
            body,
            media_url,
        })
        .await
        .map_err(|e| api_error(from_channel("whatsapp", e)))?;

    info!(%recipient, "direct whatsapp send delivered");
    Ok(Json(json!({ "success": true, "to": recipient })))
}

#[cfg(test)]
mod tests {
    use crate::testing::{body_json, request, TestChannel, TestContext};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn status_reports_readiness_and_queue() {
        let ctx = TestContext::ready(TestChannel::default()).await;
        let res = request(&ctx, "GET", "/api/whatsapp/status", None, None).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert_eq!(body["ready"], true);
        assert_eq!(body["authChallenge"], serde_json::Value::Null);
        assert_eq!(body["sending"], false);
        assert_eq!(body["queueDepth"], 0);
    }

    #[tokio::test]
    async fn send_normalizes_and_goes_through_gateway() {
        let ctx = TestContext::ready(TestChannel::default()).await;
        let res = request(
            &ctx,
            "POST",
            "/api/whatsapp/send",
            Some(json!({ "phone": "98765 43210", "message": "hello" })),
            None,
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["to"], "919876543210");
        assert_eq!(ctx.channel.recipients(), ["919876543210"]);
    }

    #[tokio::test]
    async fn send_rejects_bad_input_and_unready_channel() {
        let ready = TestContext::ready(TestChannel::default()).await;
        let res = request(&ready, "POST", "/api/whatsapp/send", Some(json!({ "phone": "x", "message": "hi" })), None).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let res = request(&ready, "POST", "/api/whatsapp/send", Some(json!({ "phone": "919876543210" })), None).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let idle = TestContext::idle(TestChannel::default()).await;
        let res = request(&idle, "POST", "/api/whatsapp/send", Some(json!({ "phone": "919876543210", "message": "hi" })), None).await;
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn rejected_send_is_bad_gateway() {
        let ctx = TestContext::ready(TestChannel::rejecting("blocked by recipient")).await;
        let res = request(&ctx, "POST", "/api/whatsapp/send", Some(json!({ "phone": "919876543210", "message": "hi" })), None).await;
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(res).await;
        assert!(body["error"].as_str().unwrap().contains("blocked by recipient"));
    }

    #[tokio::test]
    async fn connect_then_logout() {
        let ctx = TestContext::idle(TestChannel::default()).await;
        let res = request(&ctx, "POST", "/api/whatsapp/connect", None, None).await;
        assert_eq!(res.status(), StatusCode::OK);
        ctx.wait_ready().await;

        // already ready: no second connection object
        request(&ctx, "POST", "/api/whatsapp/connect", None, None).await;
        assert_eq!(ctx.channel.connects(), 1);

        let res = request(&ctx, "POST", "/api/whatsapp/logout", None, None).await;
        assert_eq!(body_json(res).await["success"], true);
        assert!(!ctx.state.channel.is_ready());
    }
}
