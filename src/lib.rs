//! Core library for the funnel relay. Wires configuration, the Conversions
//! API forwarder and the chat turn orchestrator into an axum router.

pub mod capi;
pub mod chat;
mod config;
pub mod error;
pub mod util;

pub use config::{AppConfig, GeminiConfig, MetaConfig, DEFAULT_SYSTEM_PROMPT};
pub use error::RelayError;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{rejection::BytesRejection, ConnectInfo, DefaultBodyLimit, State};
use axum::http::{HeaderMap, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::capi::{CapiForwarder, ConversionEvent, ForwardReply};
use crate::chat::{GeminiClient, TurnModel, TurnOrchestrator, TurnRequest, TurnResponse};
use crate::util::{now_epoch_millis, now_epoch_secs, parse_json_body, RequestOrigin};

/// Read-only state shared by every handler. Built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// `None` when the pixel id or access token is missing.
    pub forwarder: Option<Arc<CapiForwarder>>,
    pub orchestrator: Arc<TurnOrchestrator>,
}

impl AppState {
    /// Replaces the chat backend, keeping the configured system prompt.
    pub fn with_model(mut self, model: Arc<dyn TurnModel>) -> Self {
        self.orchestrator = Arc::new(TurnOrchestrator::new(
            Some(model),
            self.config.gemini.system_prompt.clone(),
        ));
        self
    }
}

/// Build state from an explicit configuration.
pub fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    // One pooled client for both upstreams; transport-default timeouts.
    let client = reqwest::Client::builder().build()?;

    let forwarder = CapiForwarder::from_config(&config.meta, client.clone()).map(Arc::new);
    if forwarder.is_none() {
        tracing::info!("FB_PIXEL_ID/FB_ACCESS_TOKEN not set; conversion events will not be forwarded");
    }

    let model: Option<Arc<dyn TurnModel>> = match GeminiClient::from_config(&config.gemini, client) {
        Some(gemini) => Some(Arc::new(gemini)),
        None => {
            tracing::info!("GEMINI_API_KEY not set; chat turns use scripted replies");
            None
        }
    };
    let orchestrator = TurnOrchestrator::new(model, config.gemini.system_prompt.clone());

    Ok(AppState {
        config: Arc::new(config),
        forwarder,
        orchestrator: Arc::new(orchestrator),
    })
}

/// Build state from environment variables. See [`AppConfig::from_env`] for
/// the variables read.
pub fn build_state_from_env() -> anyhow::Result<AppState> {
    build_state(AppConfig::from_env()?)
}

/// Every origin is accepted for GET/POST/OPTIONS and echoed back.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Build the Axum router and attach handlers.
pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.config.max_request_bytes;

    let router = Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/capi", post(capi_handler))
        .route("/gemini/chat", post(chat_handler))
        .route("/webhook", post(webhook_handler));

    let router = if let Some(limit) = max_request_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().on_response(DefaultOnResponse::new().level(Level::INFO)))
                .layer(cors_layer())
                .layer(CatchPanicLayer::custom(error::panic_response)),
        )
        .with_state(state)
}

/// Liveness probe.
async fn healthz_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true, "ts": now_epoch_millis() }))
}

/// Relays one tracking event to the Conversions API. Without credentials the
/// body is not even parsed.
async fn capi_handler(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<ForwardReply>, RelayError> {
    let Some(forwarder) = state.forwarder.as_ref() else {
        tracing::debug!("conversion event not forwarded: credentials unset");
        return Ok(Json(ForwardReply::skipped()));
    };
    let event: ConversionEvent = parse_json_body(body)?;
    let origin = RequestOrigin::from_request(&headers, connect.map(|ConnectInfo(addr)| addr));
    let batch = forwarder.batch_for(&event, &origin, now_epoch_secs());
    let meta = forwarder.send(&batch).await?;
    tracing::info!(
        event_name = ?event.event_name,
        event_id = ?event.event_id,
        "conversion event forwarded"
    );
    Ok(Json(ForwardReply::forwarded(meta)))
}

async fn chat_handler(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<TurnResponse>, RelayError> {
    let turn: TurnRequest = parse_json_body(body)?;
    let reply = state.orchestrator.take_turn(&turn).await?;
    Ok(Json(reply))
}

/// Stub receiver; the body is never read.
async fn webhook_handler() -> Json<serde_json::Value> {
    tracing::debug!("webhook received");
    Json(serde_json::json!({ "ok": true }))
}
