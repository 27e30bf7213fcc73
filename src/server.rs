//! Rolegate REST API
//!
//! Endpoints:
//!   GET  /status                              - Cache and store status
//!   POST /decide                              - Check one capability
//!   POST /explain                             - Check with audit detail
//!   GET  /principals/:principal/capabilities  - List granted capabilities
//!   GET  /principals/:principal/level         - Primary role level
//!   POST /mutations                           - Administrative writes, gated on the actor
//!
//! A principal that cannot be parsed is a 400 everywhere. A well-formed
//! principal that cannot be resolved still gets a fail-closed decision.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{
    AuthzAdmin, AuthzStore, Decision, Engine, EngineConfig, Explanation, Mutation, PrincipalRef,
    RoleLevel,
};

// ============================================================================
// State
// ============================================================================

pub struct AppState<S> {
    pub engine: Engine<S>,
    pub config: EngineConfig,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
struct DecideReq {
    principal: String,
    capability: String,
}

#[derive(Deserialize)]
struct MutationsReq {
    actor: String,
    mutations: Vec<Mutation>,
}

#[derive(Serialize)]
struct StatusRes {
    version: &'static str,
    cache_enabled: bool,
    cache_ttl_secs: u64,
}

#[derive(Serialize)]
struct LevelRes {
    level: RoleLevel,
}

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    fn err(msg: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(msg.into()) }
    }
}

type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

fn ok<T>(data: T) -> Reply<T> {
    (StatusCode::OK, Json(ApiResponse::ok(data)))
}

fn bad_request<T>(msg: impl Into<String>) -> Reply<T> {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::err(msg)))
}

// ============================================================================
// Handlers
// ============================================================================

async fn get_status<S: AuthzStore>(State(state): State<Arc<AppState<S>>>) -> Reply<StatusRes> {
    ok(StatusRes {
        version: env!("CARGO_PKG_VERSION"),
        cache_enabled: state.config.cache.is_active(),
        cache_ttl_secs: state.config.cache.ttl_secs,
    })
}

async fn post_decide<S: AuthzStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<DecideReq>,
) -> Reply<Decision> {
    match PrincipalRef::parse(&req.principal) {
        Ok(p) => ok(state.engine.decide(&p, &req.capability)),
        Err(e) => bad_request(e.to_string()),
    }
}

async fn post_explain<S: AuthzStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<DecideReq>,
) -> Reply<Explanation> {
    match PrincipalRef::parse(&req.principal) {
        Ok(p) => ok(state.engine.explain(&p, &req.capability)),
        Err(e) => bad_request(e.to_string()),
    }
}

async fn get_capabilities<S: AuthzStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(principal): Path<String>,
) -> Reply<Vec<String>> {
    match PrincipalRef::parse(&principal).and_then(|p| state.engine.list_granted_capabilities(&p)) {
        Ok(caps) => ok(caps),
        Err(e) => bad_request(e.to_string()),
    }
}

async fn get_level<S: AuthzStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(principal): Path<String>,
) -> Reply<LevelRes> {
    match PrincipalRef::parse(&principal).and_then(|p| state.engine.primary_level(&p)) {
        Ok(level) => ok(LevelRes { level }),
        Err(e) => bad_request(e.to_string()),
    }
}

async fn post_mutations<S: AuthzStore + AuthzAdmin>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<MutationsReq>,
) -> Reply<usize> {
    let actor = match PrincipalRef::parse(&req.actor) {
        Ok(actor) => actor,
        Err(e) => return bad_request(e.to_string()),
    };
    match state.engine.apply_as(&actor, &state.config.admin_capability, &req.mutations) {
        Ok(d) if d.allowed => ok(req.mutations.len()),
        Ok(d) => (
            StatusCode::FORBIDDEN,
            Json(ApiResponse::err(format!(
                "{} lacks {} ({:?})",
                actor, state.config.admin_capability, d.reason
            ))),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "mutation batch rejected");
            bad_request(e.to_string())
        }
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn build_router<S>(state: Arc<AppState<S>>) -> Router
where
    S: AuthzStore + AuthzAdmin + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/status", get(get_status::<S>))
        .route("/decide", post(post_decide::<S>))
        .route("/explain", post(post_explain::<S>))
        .route("/principals/:principal/capabilities", get(get_capabilities::<S>))
        .route("/principals/:principal/level", get(get_level::<S>))
        .route("/mutations", post(post_mutations::<S>))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
