//! Router test fixtures: an in-memory store and a scripted channel.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use relay_channels::{Channel, ChannelError, ChannelEvent, OutboundMessage};
use relay_core::RelayConfig;
use relay_scheduler::SqliteJobStore;
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;

use crate::app::{build_router, AppState};

pub const SECRET: &str = "s3cret";

/// Reaches ready on connect; records sends, optionally rejects them.
#[derive(Default)]
pub struct TestChannel {
    reject_with: Option<String>,
    delay_ms: u64,
    sent: Mutex<Vec<OutboundMessage>>,
    connects: AtomicUsize,
}

impl TestChannel {
    pub fn rejecting(reason: &str) -> Self {
        Self {
            reject_with: Some(reason.to_string()),
            ..Default::default()
        }
    }

    /// Every send takes `delay_ms` before it completes.
    pub fn slow(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            ..Default::default()
        }
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|m| m.recipient.clone()).collect()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for TestChannel {
    fn name(&self) -> &str {
        "test"
    }
    async fn connect(&self, events: mpsc::Sender<ChannelEvent>) -> Result<(), ChannelError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        events.send(ChannelEvent::Ready).await.ok();
        Ok(())
    }
    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        self.sent.lock().unwrap().push(msg.clone());
        match &self.reject_with {
            Some(reason) => Err(ChannelError::SendFailed(reason.clone())),
            None => Ok(()),
        }
    }
    async fn disconnect(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

pub struct TestContext {
    pub state: Arc<AppState>,
    pub store: Arc<SqliteJobStore>,
    pub channel: Arc<TestChannel>,
    router: Router,
}

impl TestContext {
    /// Wired but never connected.
    pub async fn idle(channel: TestChannel) -> Self {
        let mut config = RelayConfig::default();
        config.gateway.cron_secret = Some(SECRET.to_string());

        let channel = Arc::new(channel);
        let store = Arc::new(SqliteJobStore::open_in_memory().unwrap());
        let connect_to = Arc::clone(&channel);
        let state = AppState::new(config, store.clone(), move || -> Arc<dyn Channel> {
            connect_to.clone()
        });
        let router = build_router(Arc::clone(&state));
        Self {
            state,
            store,
            channel,
            router,
        }
    }

    pub async fn ready(channel: TestChannel) -> Self {
        let ctx = Self::idle(channel).await;
        ctx.state.channel.request_connect();
        ctx.wait_ready().await;
        ctx
    }

    pub async fn wait_ready(&self) {
        for _ in 0..100 {
            if self.state.channel.is_ready() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("channel never became ready");
    }
}

pub async fn request(
    ctx: &TestContext,
    method: &str,
    uri: &str,
    json: Option<Value>,
    secret: Option<&str>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(secret) = secret {
        builder = builder.header(crate::auth::SECRET_HEADER, secret);
    }
    let body = match json {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    ctx.router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap()
}

pub async fn body_json(res: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(res.into_body(), 1 << 20).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
