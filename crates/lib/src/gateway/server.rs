//! Gateway HTTP server (single port): webhooks, health, history.

use crate::backends::build_backends;
use crate::channels::{
    verify_signature, verify_subscription, ChannelHandle, ChannelRegistry, InboundMessage,
    SenderId, TelegramChannel, TelegramUpdate, WhatsAppChannel, WhatsAppWebhook,
};
use crate::config::{self, resolve_secret, Config};
use crate::init;
use crate::router::{MessageRouter, RouterSettings};
use crate::transcript::{build_transcript, Transcript, DEFAULT_HISTORY_LIMIT};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    routing::post,
    Json, Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

const MAX_HISTORY_LIMIT: usize = 100;

/// WhatsApp webhook settings resolved at startup.
#[derive(Clone)]
struct WhatsAppHook {
    phone_number_id: String,
    verify_token: String,
    app_secret: Option<String>,
}

/// Shared state for the gateway handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    /// When Some, /history requires `Authorization: Bearer <token>`.
    pub required_token: Option<String>,
    /// Webhook handlers push here; the inbound loop routes.
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    pub channel_registry: Arc<ChannelRegistry>,
    /// One router per channel id.
    pub routers: Arc<HashMap<String, Arc<MessageRouter>>>,
    pub transcript: Arc<dyn Transcript>,
    /// In-process channel connector tasks; awaited during graceful shutdown.
    pub channel_tasks: Arc<RwLock<Vec<JoinHandle<()>>>>,
    whatsapp: Option<WhatsAppHook>,
}

impl GatewayState {
    /// Senders with a message in flight, over all channels.
    pub fn busy_senders(&self) -> usize {
        self.routers.values().map(|r| r.busy_senders()).sum()
    }
}

/// When auth mode is token and a token is configured, returns it.
fn require_token(config: &Config) -> Option<String> {
    if config.gateway.auth.mode == config::GatewayAuthMode::Token {
        config::resolve_gateway_token(config)
    } else {
        None
    }
}

fn resolve_whatsapp(config: &Config) -> Option<(WhatsAppChannel, WhatsAppHook)> {
    let wa = &config.channels.whatsapp;
    let access_token = resolve_secret("WHATSAPP_ACCESS_TOKEN", &wa.access_token)?;
    let phone_number_id = wa
        .phone_number_id
        .clone()
        .filter(|p| !p.trim().is_empty())?;
    let app_secret = resolve_secret("WHATSAPP_APP_SECRET", &wa.app_secret);
    if app_secret.is_none() {
        log::warn!("whatsapp: no app secret, webhook signatures will not be checked");
    }
    let hook = WhatsAppHook {
        phone_number_id: phone_number_id.clone(),
        verify_token: wa.verify_token.clone().unwrap_or_default(),
        app_secret,
    };
    Some((
        WhatsAppChannel::new(&wa.api_base, phone_number_id, access_token),
        hook,
    ))
}

/// Route inbound messages in arrival order. Admission happens here; routing runs on
/// its own task so senders interleave.
async fn run_inbound_loop(
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
    routers: Arc<HashMap<String, Arc<MessageRouter>>>,
) {
    while let Some(msg) = inbound_rx.recv().await {
        match routers.get(&msg.channel_id) {
            Some(router) => {
                log::debug!("inbound {} from {}", msg.channel_id, msg.sender);
                router.spawn_handle(msg);
            }
            None => log::warn!("inbound message for unknown channel {}", msg.channel_id),
        }
    }
    log::debug!("inbound loop stopped");
}

/// Run the gateway server. Blocks until shutdown (e.g. Ctrl+C).
/// `config_path` locates the config directory (transcript file default).
/// Requires the configuration directory to be initialized (`sapa init`).
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    init::require_initialized(&config_path)?;
    let bind = config.gateway.bind.trim();
    if !config::is_loopback_bind(bind) {
        let token = config::resolve_gateway_token(&config);
        if token.is_none() || config.gateway.auth.mode != config::GatewayAuthMode::Token {
            anyhow::bail!(
                "refusing to bind gateway to {} without auth (set gateway.auth.mode to \"token\" and gateway.auth.token or SAPA_GATEWAY_TOKEN)",
                bind
            );
        }
    }

    let backends = build_backends(&config.backends);
    let transcript = build_transcript(&config, &config_path);
    let settings = RouterSettings::from_config(&config);
    let channel_registry = Arc::new(ChannelRegistry::new());
    let channel_tasks = Arc::new(RwLock::new(Vec::new()));
    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(64);

    let telegram = config::resolve_telegram_token(&config)
        .map(|token| Arc::new(TelegramChannel::new(Some(token))));
    if let Some(ref t) = telegram {
        channel_registry
            .register(t.id().to_string(), t.clone())
            .await;
    }
    let whatsapp = match resolve_whatsapp(&config) {
        Some((channel, hook)) => {
            channel_registry
                .register(channel.id().to_string(), Arc::new(channel))
                .await;
            log::info!("whatsapp channel registered (webhook mode)");
            Some(hook)
        }
        None => None,
    };

    let mut routers = HashMap::new();
    for id in channel_registry.ids().await {
        if let Some(handle) = channel_registry.get(&id).await {
            let router = MessageRouter::new(
                handle,
                backends.clone(),
                Arc::clone(&transcript),
                settings.clone(),
            );
            routers.insert(id, Arc::new(router));
        }
    }
    if routers.is_empty() {
        log::warn!("no channels configured; only health and history are served");
    }
    let routers = Arc::new(routers);
    tokio::spawn(run_inbound_loop(inbound_rx, Arc::clone(&routers)));

    let telegram_webhook_for_shutdown = match telegram {
        Some(t) => match config.channels.telegram.webhook_url {
            Some(ref url) => {
                let secret = config.channels.telegram.webhook_secret.as_deref();
                if let Err(e) = t.set_webhook(url, secret).await {
                    log::warn!("telegram set_webhook failed: {}", e);
                } else {
                    log::info!("telegram channel registered (webhook mode): {}", url);
                }
                Some(t)
            }
            None => {
                let handle = t.start_inbound(inbound_tx.clone());
                channel_tasks.write().await.push(handle);
                log::info!("telegram channel registered and getUpdates loop started");
                None
            }
        },
        None => None,
    };

    let state = GatewayState {
        config: Arc::new(config.clone()),
        required_token: require_token(&config),
        inbound_tx,
        channel_registry: channel_registry.clone(),
        routers: Arc::clone(&routers),
        transcript,
        channel_tasks: channel_tasks.clone(),
        whatsapp,
    };

    let app = Router::new()
        .route("/", get(health_http))
        .route("/telegram/webhook", post(telegram_webhook))
        .route(
            "/whatsapp/webhook",
            get(whatsapp_verify).post(whatsapp_webhook),
        )
        .route("/history/:sender", get(history_http))
        .with_state(state);

    let bind_addr = format!("{}:{}", bind, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(
            channel_registry,
            channel_tasks,
            telegram_webhook_for_shutdown,
        ))
        .await
        .context("gateway server exited")?;
    for router in routers.values() {
        router.flush_records().await;
    }
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Stops channel connectors, removes the Telegram webhook if used, then awaits channel tasks.
async fn shutdown_signal(
    channel_registry: Arc<ChannelRegistry>,
    channel_tasks: Arc<RwLock<Vec<JoinHandle<()>>>>,
    telegram_webhook: Option<Arc<TelegramChannel>>,
) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, stopping channels and draining connections");

    channel_registry.stop_all().await;

    if let Some(t) = telegram_webhook {
        if let Err(e) = t.delete_webhook().await {
            log::debug!("telegram delete_webhook on shutdown: {}", e);
        }
    }

    let handles = {
        let mut g = channel_tasks.write().await;
        std::mem::take(&mut *g)
    };
    for h in handles {
        let _ = h.await;
    }
    log::info!("channel tasks finished");
}

/// POST /telegram/webhook: receives Telegram update JSON; verifies optional secret, pushes InboundMessage.
async fn telegram_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if !state.routers.contains_key("telegram") {
        return StatusCode::NOT_FOUND;
    }
    if let Some(ref expected) = state.config.channels.telegram.webhook_secret {
        let provided = headers
            .get("X-Telegram-Bot-Api-Secret-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != expected.as_str() {
            return StatusCode::FORBIDDEN;
        }
    }
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(_) => return StatusCode::BAD_REQUEST,
    };
    let Some(inbound) = update.into_inbound() else {
        return StatusCode::OK;
    };
    if state.inbound_tx.send(inbound).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// GET /whatsapp/webhook: subscription handshake, echoes hub.challenge.
async fn whatsapp_verify(
    State(state): State<GatewayState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let Some(ref hook) = state.whatsapp else {
        return (StatusCode::NOT_FOUND, String::new());
    };
    match verify_subscription(
        params.get("hub.mode").map(String::as_str),
        params.get("hub.verify_token").map(String::as_str),
        params.get("hub.challenge").map(String::as_str),
        &hook.verify_token,
    ) {
        Some(challenge) => {
            log::info!("whatsapp webhook subscription verified");
            (StatusCode::OK, challenge)
        }
        None => (StatusCode::FORBIDDEN, String::new()),
    }
}

/// POST /whatsapp/webhook: checks X-Hub-Signature-256, pushes text messages.
async fn whatsapp_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(ref hook) = state.whatsapp else {
        return StatusCode::NOT_FOUND;
    };
    if let Some(ref secret) = hook.app_secret {
        let signature = headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !verify_signature(&body, signature, secret) {
            log::warn!("whatsapp webhook signature mismatch");
            return StatusCode::FORBIDDEN;
        }
    }
    let payload: WhatsAppWebhook = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(_) => return StatusCode::BAD_REQUEST,
    };
    for inbound in payload.into_inbound(&hook.phone_number_id) {
        if state.inbound_tx.send(inbound).await.is_err() {
            return StatusCode::SERVICE_UNAVAILABLE;
        }
    }
    StatusCode::OK
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
        "channels": state.channel_registry.ids().await,
        "busySenders": state.busy_senders(),
    }))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// GET /history/:sender?limit=N returns the latest transcript rows for a sender.
async fn history_http(
    State(state): State<GatewayState>,
    Path(sender): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> (StatusCode, Json<serde_json::Value>) {
    if let Some(ref expected) = state.required_token {
        if bearer_token(&headers) != Some(expected.as_str()) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "missing or invalid gateway token" })),
            );
        }
    }
    let limit = match params.get("limit").map(|l| l.parse::<usize>()) {
        None => DEFAULT_HISTORY_LIMIT,
        Some(Ok(n)) => n.min(MAX_HISTORY_LIMIT),
        Some(Err(_)) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "limit must be a non-negative integer" })),
            )
        }
    };
    let sender = SenderId::from(sender);
    match state.transcript.history(&sender, limit).await {
        Ok(entries) => (
            StatusCode::OK,
            Json(json!({ "sender": sender, "entries": entries })),
        ),
        Err(e) => {
            log::warn!("history for {} failed: {}", sender, e);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": "transcript unavailable" })),
            )
        }
    }
}
