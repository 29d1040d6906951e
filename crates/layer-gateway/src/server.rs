//! Gateway HTTP server: Axum routes over the completion router and gate admin

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{ConnectInfo, Path, Query, Request, State};
use axum::http::{Extensions, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use layer_core::{
    CallerContext, CompletionRequest, CompletionRouter, Gate, GateAdmin, GateDraft, GatePatch,
};
use layer_store::{GateAnalytics, SqliteStore};
use serde::de::DeserializeOwned;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::auth::Authenticator;
use crate::error::ApiError;
use crate::protocol::{CompletionResponse, GateList, RequestList, RequestsQuery, StatusResponse};

/// Largest request body accepted on `/v1/complete`
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

const DEFAULT_REQUEST_LIMIT: usize = 50;
const MAX_REQUEST_LIMIT: usize = 500;

/// Shared state for all handlers
#[derive(Clone)]
pub struct GatewayState {
    pub router: CompletionRouter,
    pub admin: GateAdmin,
    pub store: Arc<SqliteStore>,
    pub auth: Arc<Authenticator>,
    pub start_time: std::time::Instant,
}

impl GatewayState {
    pub fn new(
        router: CompletionRouter,
        admin: GateAdmin,
        store: Arc<SqliteStore>,
        auth: Authenticator,
    ) -> Self {
        Self {
            router,
            admin,
            store,
            auth: Arc::new(auth),
            start_time: std::time::Instant::now(),
        }
    }

    fn owner(&self, headers: &HeaderMap) -> Result<String, ApiError> {
        self.auth.authenticate(headers).ok_or(ApiError::Unauthorized)
    }
}

/// The gateway server
pub struct GatewayServer {
    state: GatewayState,
    bind: SocketAddr,
}

impl GatewayServer {
    pub fn new(bind: SocketAddr, state: GatewayState) -> Self {
        Self { state, bind }
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Serve until `shutdown` resolves; in-flight requests are allowed to finish
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(self.bind).await?;
        info!("Gateway listening on {}", self.bind);

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        info!("Gateway stopped");
        Ok(())
    }
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/api/status", get(status_handler))
        .route("/v1/complete", post(complete_handler))
        .route("/v1/gates", get(list_gates_handler).post(create_gate_handler))
        .route(
            "/v1/gates/{id}",
            get(get_gate_handler)
                .patch(update_gate_handler)
                .delete(delete_gate_handler),
        )
        .route("/v1/gates/{id}/analytics", get(analytics_handler))
        .route("/v1/requests", get(requests_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {}", e)))
}

/// Caller metadata for the audit trail. A forwarding proxy's
/// `X-Forwarded-For` wins over the socket peer.
fn caller_context(owner_id: String, headers: &HeaderMap, extensions: &Extensions) -> CallerContext {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let forwarded = header("x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
        .filter(|ip| !ip.is_empty());
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    CallerContext {
        owner_id,
        user_agent: header("user-agent"),
        ip_address: forwarded.or(peer),
    }
}

// ── HTTP Handlers ──

async fn status_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let mut vendors: Vec<String> = state
        .router
        .providers()
        .vendors()
        .into_iter()
        .map(|v| v.to_string())
        .collect();
    vendors.sort();

    Json(StatusResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        vendors,
        models: state.router.registry().len(),
    })
}

async fn complete_handler(
    State(state): State<GatewayState>,
    request: Request,
) -> Result<Json<CompletionResponse>, ApiError> {
    let owner = state.owner(request.headers())?;
    let caller = caller_context(owner, request.headers(), request.extensions());

    let body = axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read request body: {}", e)))?;
    let completion: CompletionRequest = parse_body(&body)?;
    debug!(
        "Completion request from {} for gate '{}'",
        caller.owner_id, completion.gate
    );

    // detached so a client disconnect cannot cut the fallback chain short
    let outcome = state.router.spawn_complete(caller, completion).await?;
    Ok(Json(outcome.into()))
}

async fn list_gates_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Result<Json<GateList>, ApiError> {
    let owner = state.owner(&headers)?;
    let gates = state.admin.list(&owner).await?;
    Ok(Json(GateList { gates }))
}

async fn create_gate_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Gate>), ApiError> {
    let owner = state.owner(&headers)?;
    let draft: GateDraft = parse_body(&body)?;
    let gate = state.admin.create(&owner, draft).await?;
    Ok((StatusCode::CREATED, Json(gate)))
}

async fn get_gate_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Gate>, ApiError> {
    let owner = state.owner(&headers)?;
    Ok(Json(state.admin.get(&owner, &id).await?))
}

async fn update_gate_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Gate>, ApiError> {
    let owner = state.owner(&headers)?;
    let patch: GatePatch = parse_body(&body)?;
    Ok(Json(state.admin.update(&owner, &id, patch).await?))
}

async fn delete_gate_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let owner = state.owner(&headers)?;
    state.admin.delete(&owner, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn analytics_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<GateAnalytics>, ApiError> {
    let owner = state.owner(&headers)?;
    // ownership check; a foreign gate is a 404
    let gate = state.admin.get(&owner, &id).await?;
    Ok(Json(state.store.gate_analytics(&owner, &gate.id).await?))
}

async fn requests_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    query: Result<Query<RequestsQuery>, QueryRejection>,
) -> Result<Json<RequestList>, ApiError> {
    let owner = state.owner(&headers)?;
    let Query(query) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_REQUEST_LIMIT)
        .clamp(1, MAX_REQUEST_LIMIT);
    let requests = state.store.recent_requests(&owner, limit).await?;
    Ok(Json(RequestList { requests }))
}
