//! HTTP-shaped endpoints over the local transport.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::de::DeserializeOwned;

use op_authd_core::PeerIdentity;

use crate::auth;
use crate::engine::ReadOutcome;
use crate::error::AppError;
use crate::models::{
    ReadRequest, ReadResponse, ReadsRequest, ReadsResponse, ResolveRequest, ResolveResponse,
    SessionStatus, SessionUnlockResponse, StatusResponse,
};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/status", get(status))
        .route("/v1/read", post(read))
        .route("/v1/reads", post(reads))
        .route("/v1/resolve", post(resolve))
        .route("/v1/session/unlock", post(session_unlock))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ))
        .layer(middleware::from_fn(auth::attach_peer))
        .with_state(state)
}

/// Strict JSON parsing with the 400 the wire contract promises; the stock
/// extractor would answer 415/422.
fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|err| AppError::invalid_request(format!("bad json: {err}")))
}

fn read_response(reference: String, outcome: ReadOutcome) -> ReadResponse {
    let resolved_at_unix = outcome.resolved_at_unix();
    ReadResponse {
        reference,
        value: outcome.value,
        from_cache: outcome.from_cache,
        expires_in_seconds: outcome.expires_in.as_secs(),
        resolved_at_unix,
    }
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let engine = &state.engine;
    let stats = engine.cache.stats();

    let session = engine.session.as_ref().map(|session| {
        let info = session.info();
        SessionStatus {
            state: info.state.to_string(),
            idle_timeout_seconds: info.idle_timeout.as_secs(),
            time_until_lock_seconds: info.time_until_lock().as_secs(),
            enabled: !info.idle_timeout.is_zero(),
        }
    });

    Json(StatusResponse {
        backend: engine.backend.name().to_string(),
        cache_size: stats.size,
        hits: stats.hits,
        misses: stats.misses,
        in_flight: stats.in_flight,
        ttl_seconds: engine.cache.ttl().as_secs(),
        socket_path: engine.socket_path.display().to_string(),
        session,
    })
}

async fn read(
    State(state): State<AppState>,
    Extension(peer): Extension<PeerIdentity>,
    body: Bytes,
) -> Result<Json<ReadResponse>, AppError> {
    let request: ReadRequest = parse_json(&body)?;
    let reference = request.reference.trim().to_string();
    let outcome = state
        .engine
        .read_one(&peer, &reference, &request.flags)
        .await?;
    Ok(Json(read_response(reference, outcome)))
}

async fn reads(
    State(state): State<AppState>,
    Extension(peer): Extension<PeerIdentity>,
    body: Bytes,
) -> Result<Json<ReadsResponse>, AppError> {
    let request: ReadsRequest = parse_json(&body)?;

    let mut results = BTreeMap::new();
    for reference in request.refs {
        let reference = reference.trim().to_string();
        if reference.is_empty() {
            continue;
        }
        let entry = match state
            .engine
            .read_one(&peer, &reference, &request.flags)
            .await
        {
            Ok(outcome) => read_response(reference.clone(), outcome),
            // Partial success: the error is recorded on the entry so the
            // caller decides what to do with the rest of the batch.
            Err(err) => ReadResponse {
                reference: reference.clone(),
                value: format!("ERROR: {}", err.client_message()),
                from_cache: false,
                expires_in_seconds: 0,
                resolved_at_unix: now_unix(),
            },
        };
        results.insert(reference, entry);
    }
    Ok(Json(ReadsResponse { results }))
}

async fn resolve(
    State(state): State<AppState>,
    Extension(peer): Extension<PeerIdentity>,
    body: Bytes,
) -> Result<Json<ResolveResponse>, AppError> {
    let request: ResolveRequest = parse_json(&body)?;

    // The caller needs every value to proceed, so the first failure aborts
    // the whole resolve.
    let mut env = BTreeMap::new();
    for (name, reference) in request.env {
        let outcome = state
            .engine
            .read_one(&peer, reference.trim(), &request.flags)
            .await?;
        env.insert(name, outcome.value);
    }
    Ok(Json(ResolveResponse { env }))
}

async fn session_unlock(State(state): State<AppState>, _body: Bytes) -> Response {
    let Some(session) = &state.engine.session else {
        return (
            StatusCode::BAD_REQUEST,
            Json(SessionUnlockResponse {
                success: false,
                state: "disabled".to_string(),
                message: Some("session management is disabled".to_string()),
            }),
        )
            .into_response();
    };

    match session.validate().await {
        Ok(()) => (
            StatusCode::OK,
            Json(SessionUnlockResponse {
                success: true,
                state: session.state().to_string(),
                message: Some("session unlocked".to_string()),
            }),
        )
            .into_response(),
        Err(err) => (
            StatusCode::UNAUTHORIZED,
            Json(SessionUnlockResponse {
                success: false,
                state: session.state().to_string(),
                message: Some(err.to_string()),
            }),
        )
            .into_response(),
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
