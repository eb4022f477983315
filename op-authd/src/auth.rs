//! Bearer-token authentication and peer-identity propagation.

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;

use op_authd_core::PeerIdentity;

use crate::error::AppError;
use crate::state::AppState;

/// Header carrying the daemon's bearer token.
pub const TOKEN_HEADER: &str = "x-opauthd-token";

/// Peer identity captured once per accepted connection by the Unix
/// listener's connect-info hook.
#[derive(Debug, Clone)]
pub struct PeerConnectInfo {
    pub identity: PeerIdentity,
}

/// Attaches the caller's [`PeerIdentity`] as a request extension. Prefers
/// an identity already injected (tests), then the connection's probe
/// result, then the empty identity.
pub async fn attach_peer(mut req: Request<Body>, next: Next) -> Response {
    if req.extensions().get::<PeerIdentity>().is_none() {
        let identity = req
            .extensions()
            .get::<ConnectInfo<PeerConnectInfo>>()
            .map(|info| info.0.identity.clone())
            .unwrap_or_default();
        req.extensions_mut().insert(identity);
    }
    next.run(req).await
}

/// Verifies the bearer token in constant time. Mismatches are audited and,
/// when configured, lock the session.
pub async fn require_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let engine = &state.engine;
    let peer = req
        .extensions()
        .get::<PeerIdentity>()
        .cloned()
        .unwrap_or_default();

    let presented = req
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if !token_matches(presented, &engine.token) {
        let reason = if presented.is_empty() {
            "token missing"
        } else {
            "token mismatch"
        };
        engine.audit.authentication(&peer, false, reason);
        if let Some(session) = &engine.session {
            if session.config().lock_on_auth_failure {
                session.mark_locked();
            }
        }
        return AppError::Unauthenticated.into_response();
    }

    engine.audit.authentication(&peer, true, "token accepted");
    next.run(req).await
}

fn token_matches(presented: &str, expected: &str) -> bool {
    let presented = presented.as_bytes();
    let expected = expected.as_bytes();
    presented.len() == expected.len() && bool::from(presented.ct_eq(expected))
}
