//! HTTP API exposing the transfer session and picker state

use crate::amount;
use crate::balance::selectable_tokens;
use crate::chain::{chain_info, search_chains, ChainId, ChainInfo, ChainRegistry};
use crate::config::ApiConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::session::{BalanceState, TransferSession};
use crate::tokens::{search_tokens, TokenDescriptor};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Selection widgets with a dropdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Widget {
    FromChain,
    ToChain,
    FromToken,
    ToToken,
}

/// Open flag and search text of one picker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PickerState {
    pub open: bool,
    pub search: String,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<TransferSession>,
    /// Absent when running without RPC access
    pub registry: Option<Arc<ChainRegistry>>,
    pub pickers: Arc<RwLock<HashMap<Widget, PickerState>>>,
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(session: Arc<TransferSession>, registry: Option<Arc<ChainRegistry>>) -> Self {
        Self {
            session,
            registry,
            pickers: Arc::new(RwLock::new(HashMap::new())),
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }

    async fn close_picker(&self, widget: Widget) {
        self.pickers.write().await.remove(&widget);
    }
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/chains", get(get_chains))
        .route("/session", get(get_session))
        .route("/session/from-chain", post(set_from_chain))
        .route("/session/to-chain", post(set_to_chain))
        .route("/session/swap", post(swap_chains))
        .route("/session/from-token", post(set_from_token))
        .route("/session/to-token", post(set_to_token))
        .route("/session/amount", post(set_amount))
        .route("/session/percentage", post(set_percentage))
        .route("/session/recipient", post(set_recipient))
        .route("/session/recipient/commit", post(commit_recipient))
        .route("/session/execute", post(execute))
        .route("/pickers/:widget", get(get_picker).put(update_picker))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> BridgeResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| BridgeError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| BridgeError::Internal(format!("API server failed: {}", e)))?;

    Ok(())
}

/// Error response wrapper
pub struct ApiError(BridgeError);

impl From<BridgeError> for ApiError {
    fn from(error: BridgeError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BridgeError::QuoteUnavailable | BridgeError::ExecutionInProgress => StatusCode::CONFLICT,
            BridgeError::ChainNotFound { .. } => StatusCode::BAD_REQUEST,
            e if e.is_user_error() => StatusCode::BAD_REQUEST,
            e if e.is_transient() => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("error")
                .to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check endpoint - basic liveness
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = Utc::now().signed_duration_since(state.started_at);
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        session_id: state.session_id,
        started_at: state.started_at,
        uptime_seconds: uptime.num_seconds().max(0) as u64,
    })
}

/// Readiness check - verify RPC connectivity
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let chain_health = match &state.registry {
        Some(registry) => registry.health_check().await,
        None => Vec::new(),
    };
    let ready = chain_health.iter().all(|(_, healthy)| *healthy);

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready,
            details: chain_health
                .into_iter()
                .map(|(chain_id, healthy)| ChainHealth { chain_id, healthy })
                .collect(),
        }),
    )
}

/// Chain catalog and the chains with a configured RPC
async fn get_chains(State(state): State<AppState>) -> impl IntoResponse {
    let connected = state
        .registry
        .as_ref()
        .map(|registry| registry.connected_chains())
        .unwrap_or_default();

    Json(ChainsResponse {
        chains: search_chains(""),
        connected,
    })
}

async fn get_session(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.snapshot().await)
}

async fn set_from_chain(
    State(state): State<AppState>,
    Json(body): Json<ChainBody>,
) -> ApiResult<SessionView> {
    known_chain(body.chain_id)?;
    state.session.set_from_chain(body.chain_id).await;
    state.close_picker(Widget::FromChain).await;
    session_view(&state).await
}

async fn set_to_chain(
    State(state): State<AppState>,
    Json(body): Json<ChainBody>,
) -> ApiResult<SessionView> {
    known_chain(body.chain_id)?;
    state.session.set_to_chain(body.chain_id).await;
    state.close_picker(Widget::ToChain).await;
    session_view(&state).await
}

async fn swap_chains(State(state): State<AppState>) -> ApiResult<SessionView> {
    state.session.swap_chains().await;
    session_view(&state).await
}

async fn set_from_token(
    State(state): State<AppState>,
    Json(body): Json<TokenBody>,
) -> ApiResult<SessionView> {
    state.session.set_from_token(&body.address).await?;
    state.close_picker(Widget::FromToken).await;
    session_view(&state).await
}

async fn set_to_token(
    State(state): State<AppState>,
    Json(body): Json<TokenBody>,
) -> ApiResult<SessionView> {
    state.session.set_to_token(&body.address).await?;
    state.close_picker(Widget::ToToken).await;
    session_view(&state).await
}

async fn set_amount(
    State(state): State<AppState>,
    Json(body): Json<AmountBody>,
) -> ApiResult<SessionView> {
    state.session.set_amount(&body.amount).await?;
    session_view(&state).await
}

async fn set_percentage(
    State(state): State<AppState>,
    Json(body): Json<PercentageBody>,
) -> ApiResult<SessionView> {
    state.session.set_percentage(body.percentage).await?;
    session_view(&state).await
}

async fn set_recipient(
    State(state): State<AppState>,
    Json(body): Json<RecipientBody>,
) -> ApiResult<SessionView> {
    state.session.set_recipient(&body.recipient).await;
    session_view(&state).await
}

async fn commit_recipient(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.commit_recipient().await)
}

async fn execute(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.session.execute().await?;
    Ok(Json(outcome))
}

async fn get_picker(
    State(state): State<AppState>,
    Path(widget): Path<Widget>,
) -> impl IntoResponse {
    let picker = state
        .pickers
        .read()
        .await
        .get(&widget)
        .cloned()
        .unwrap_or_default();
    Json(picker_view(&state, widget, picker).await)
}

async fn update_picker(
    State(state): State<AppState>,
    Path(widget): Path<Widget>,
    Json(body): Json<PickerUpdate>,
) -> impl IntoResponse {
    let picker = {
        let mut pickers = state.pickers.write().await;
        let picker = pickers.entry(widget).or_default();
        if let Some(open) = body.open {
            picker.open = open;
        }
        if let Some(search) = body.search {
            picker.search = search;
        }
        picker.clone()
    };
    Json(picker_view(&state, widget, picker).await)
}

fn known_chain(chain_id: ChainId) -> Result<(), ApiError> {
    chain_info(chain_id)
        .map(|_| ())
        .ok_or(ApiError(BridgeError::ChainNotFound { chain_id }))
}

async fn session_view(state: &AppState) -> ApiResult<SessionView> {
    let snapshot = state.session.snapshot().await;
    Ok(Json(SessionView {
        from_balance: snapshot.from_token_balance().map(amount::format_balance),
        state: snapshot,
    }))
}

/// Picker state plus the options matching its search
async fn picker_view(state: &AppState, widget: Widget, picker: PickerState) -> PickerView {
    let options = match widget {
        Widget::FromChain | Widget::ToChain => {
            PickerOptions::Chains(search_chains(&picker.search).into_iter().cloned().collect())
        }
        Widget::FromToken => {
            let snapshot = state.session.snapshot().await;
            let balances = match &snapshot.balances {
                BalanceState::Ready(balances) => Some(balances),
                _ => None,
            };
            let tokens = selectable_tokens(&snapshot.from_tokens, balances);
            PickerOptions::Tokens(
                search_tokens(tokens, &picker.search)
                    .into_iter()
                    .map(|token| TokenOption {
                        balance: balances
                            .and_then(|b| b.balance_of(&token.address))
                            .map(amount::format_balance),
                        token: token.clone(),
                    })
                    .collect(),
            )
        }
        Widget::ToToken => {
            let snapshot = state.session.snapshot().await;
            PickerOptions::Tokens(
                search_tokens(&snapshot.to_tokens, &picker.search)
                    .into_iter()
                    .map(|token| TokenOption {
                        token: token.clone(),
                        balance: None,
                    })
                    .collect(),
            )
        }
    };

    PickerView {
        widget,
        open: picker.open,
        search: picker.search,
        options,
    }
}

// Request types

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainBody {
    chain_id: ChainId,
}

#[derive(Deserialize)]
struct TokenBody {
    address: String,
}

#[derive(Deserialize)]
struct AmountBody {
    amount: String,
}

#[derive(Deserialize)]
struct PercentageBody {
    percentage: u8,
}

#[derive(Deserialize)]
struct RecipientBody {
    recipient: String,
}

#[derive(Deserialize)]
struct PickerUpdate {
    open: Option<bool>,
    search: Option<String>,
}

// Response types

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    session_id: Uuid,
    started_at: DateTime<Utc>,
    uptime_seconds: u64,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    details: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain_id: u64,
    healthy: bool,
}

#[derive(Serialize)]
struct ChainsResponse {
    chains: Vec<&'static ChainInfo>,
    connected: Vec<ChainId>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionView {
    #[serde(flatten)]
    state: crate::session::SessionState,
    /// Display-formatted balance of the selected source token
    from_balance: Option<String>,
}

#[derive(Serialize)]
struct TokenOption {
    #[serde(flatten)]
    token: TokenDescriptor,
    #[serde(skip_serializing_if = "Option::is_none")]
    balance: Option<String>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum PickerOptions {
    Chains(Vec<ChainInfo>),
    Tokens(Vec<TokenOption>),
}

#[derive(Serialize)]
struct PickerView {
    widget: Widget,
    open: bool,
    search: String,
    options: PickerOptions,
}
