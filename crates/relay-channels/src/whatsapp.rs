//! WhatsApp channel backed by an HTTP bridge.
//!
//! The chat session itself (browser automation, pairing, encryption) lives
//! in a separate bridge process. This adapter drives it over a small JSON API:
//!
//! | Call | Purpose |
//! |------|---------|
//! | `POST /init` | start (or resume) the session |
//! | `GET /status` | `{"ready": bool, "qr": string?, "auth_failure": bool?}` |
//! | `POST /send` | `{"to": "<digits>@c.us", "message": ..., "mediaUrl": ...}` |
//! | `POST /logout` | destroy the session |

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::config::WhatsAppConfig;
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    channel::Channel,
    error::ChannelError,
    types::{ChannelEvent, OutboundMessage},
};

/// Request timeout for control calls (init/status/logout).
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WhatsAppBridge {
    base_url: String,
    poll_interval: Duration,
    client: reqwest::Client,
    poller: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct BridgeStatus {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    qr: Option<String>,
    #[serde(default)]
    auth_failure: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendBody<'a> {
    to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_url: Option<&'a str>,
}

impl WhatsAppBridge {
    pub fn new(config: &WhatsAppConfig) -> Self {
        Self {
            base_url: config.bridge_url.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_millis(config.status_poll_ms.max(100)),
            client: reqwest::Client::new(),
            poller: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn stop_poller(&self) {
        let handle = self
            .poller
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// WhatsApp addresses individual chats as `<digits>@c.us`.
pub fn chat_id(recipient: &str) -> String {
    if recipient.contains('@') {
        recipient.to_string()
    } else {
        format!("{recipient}@c.us")
    }
}

async fn fetch_status(client: &reqwest::Client, url: &str) -> Result<BridgeStatus, String> {
    let resp = client
        .get(url)
        .timeout(CONTROL_TIMEOUT)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("bridge status returned {}", resp.status()));
    }
    resp.json::<BridgeStatus>().await.map_err(|e| e.to_string())
}

/// Turns successive status polls into lifecycle events.
#[derive(Debug, Default)]
struct StatusTracker {
    ready: bool,
    last_qr: Option<String>,
    failed: bool,
}

impl StatusTracker {
    fn observe(&mut self, status: &BridgeStatus) -> Vec<ChannelEvent> {
        let mut events = Vec::new();

        if status.auth_failure {
            if !self.failed {
                self.failed = true;
                self.ready = false;
                self.last_qr = None;
                events.push(ChannelEvent::AuthFailure(
                    "bridge reported authentication failure".to_string(),
                ));
            }
            return events;
        }
        self.failed = false;

        if status.ready {
            if !self.ready {
                self.ready = true;
                self.last_qr = None;
                events.push(ChannelEvent::Ready);
            }
            return events;
        }

        if self.ready {
            self.ready = false;
            events.push(ChannelEvent::Disconnected("bridge session lost".to_string()));
        }
        if let Some(qr) = status.qr.as_ref().filter(|q| !q.is_empty()) {
            if self.last_qr.as_ref() != Some(qr) {
                self.last_qr = Some(qr.clone());
                events.push(ChannelEvent::AuthChallenge(qr.clone()));
            }
        }
        events
    }

    /// The bridge became unreachable.
    fn lost(&mut self, reason: &str) -> Option<ChannelEvent> {
        let was_ready = self.ready;
        *self = Self::default();
        was_ready.then(|| ChannelEvent::Disconnected(format!("bridge unreachable: {reason}")))
    }
}

async fn poll_status(
    client: reqwest::Client,
    url: String,
    every: Duration,
    events: mpsc::Sender<ChannelEvent>,
) {
    let mut tracker = StatusTracker::default();
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let batch = match fetch_status(&client, &url).await {
            Ok(status) => tracker.observe(&status),
            Err(e) => {
                debug!(error = %e, "whatsapp bridge status poll failed");
                tracker.lost(&e).into_iter().collect()
            }
        };
        for event in batch {
            if events.send(event).await.is_err() {
                // Manager dropped this connection.
                return;
            }
        }
    }
}

#[async_trait]
impl Channel for WhatsAppBridge {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn connect(&self, events: mpsc::Sender<ChannelEvent>) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(self.url("init"))
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionFailed(format!("WhatsApp bridge init failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(ChannelError::ConnectionFailed(format!(
                "WhatsApp bridge init returned {}",
                resp.status()
            )));
        }

        info!(bridge = %self.base_url, "WhatsApp: session initializing");

        self.stop_poller();
        let handle = tokio::spawn(poll_status(
            self.client.clone(),
            self.url("status"),
            self.poll_interval,
            events,
        ));
        *self
            .poller
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
        let body = SendBody {
            to: chat_id(&msg.recipient),
            message: msg.body.as_deref(),
            media_url: msg.media_url.as_deref(),
        };

        let resp = self
            .client
            .post(self.url("send"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(format!("WhatsApp bridge request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
                .unwrap_or_else(|| format!("WhatsApp bridge returned {status}"));
            return Err(ChannelError::SendFailed(detail));
        }

        debug!(to = %body.to, "WhatsApp message handed to bridge");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        self.stop_poller();
        let resp = self
            .client
            .post(self.url("logout"))
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionFailed(format!("WhatsApp bridge logout failed: {e}")))?;
        if !resp.status().is_success() {
            warn!(status = %resp.status(), "WhatsApp bridge logout rejected");
        }
        info!("WhatsApp: logged out");
        Ok(())
    }
}

impl Drop for WhatsAppBridge {
    fn drop(&mut self) {
        self.stop_poller();
    }
}
