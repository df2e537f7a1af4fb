use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use relay_channels::{ConnectionManager, Connector, SendGateway};
use relay_core::RelayConfig;
use relay_scheduler::{JobStore, PhoneRules, SchedulerEngine};

/// Process-wide context, built once at startup and handed to every handler
/// and background task as `Arc<AppState>`.
pub struct AppState {
    pub config: RelayConfig,
    /// Sole owner of the channel connection and its lifecycle state.
    pub channel: Arc<ConnectionManager>,
    /// The only way to send; wraps `channel`.
    pub gateway: Arc<SendGateway>,
    pub engine: Arc<SchedulerEngine>,
    pub phone: PhoneRules,
}

impl AppState {
    /// Wire the channel, send gateway and scheduler together.
    ///
    /// Must be called from within a Tokio runtime (the gateway spawns its
    /// worker).
    pub fn new(
        config: RelayConfig,
        store: Arc<dyn JobStore>,
        connector: impl Connector + 'static,
    ) -> Arc<Self> {
        let channel = ConnectionManager::new(connector);
        let gateway = SendGateway::spawn(
            Arc::clone(&channel),
            Duration::from_secs(config.whatsapp.send_timeout_secs.max(1)),
        );
        let phone = PhoneRules::from(&config.whatsapp);
        let engine = Arc::new(
            SchedulerEngine::new(store, Arc::clone(&gateway))
                .with_phone_rules(phone.clone())
                .with_policy(config.scheduler.failure_policy.clone())
                .with_lease_timeout(Duration::from_secs(config.scheduler.lease_timeout_secs)),
        );

        Arc::new(Self {
            config,
            channel,
            gateway,
            engine,
            phone,
        })
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/api/whatsapp/status", get(crate::http::whatsapp::status_handler))
        .route("/api/whatsapp/connect", post(crate::http::whatsapp::connect_handler))
        .route("/api/whatsapp/logout", post(crate::http::whatsapp::logout_handler))
        .route("/api/whatsapp/send", post(crate::http::whatsapp::send_handler))
        .route(
            "/api/jobs/run",
            get(crate::http::jobs::run_handler).post(crate::http::jobs::run_handler),
        )
        .route("/api/jobs/scheduled", get(crate::http::jobs::scheduled_handler))
        .route("/api/jobs/past", get(crate::http::jobs::past_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
