#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::Request;
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use op_authd::engine::Engine;
use op_authd::http;
use op_authd::state::AppState;
use op_authd_core::policy::Policy;
use op_authd_core::{AuditLog, Backend, Cache, FakeBackend, PeerIdentity, SessionManager};

pub const TOKEN: &str = "6d796c6f63616c746f6b656e6d796c6f63616c746f6b656e6d796c6f63616c74";

pub struct TestDaemon {
    pub app: Router,
    pub engine: Arc<Engine>,
    pub cache: Arc<Cache>,
}

pub struct DaemonOptions {
    pub ttl: Duration,
    pub backend: Arc<dyn Backend>,
    pub policy: Policy,
    pub session: Option<Arc<SessionManager>>,
    pub audit: Arc<AuditLog>,
    pub cache: Arc<Cache>,
    pub backend_timeout: Option<Duration>,
}

impl DaemonOptions {
    pub fn fake(ttl: Duration) -> Self {
        Self {
            ttl,
            backend: Arc::new(FakeBackend),
            policy: Policy::default(),
            session: None,
            audit: Arc::new(AuditLog::disabled()),
            cache: Arc::new(Cache::new(ttl)),
            backend_timeout: None,
        }
    }
}

pub fn daemon(options: DaemonOptions) -> TestDaemon {
    let cache = Arc::clone(&options.cache);
    let mut engine = Engine::new(
        options.cache,
        options.backend,
        options.session,
        options.policy,
        None,
        options.audit,
        TOKEN.to_string(),
        PathBuf::from("/tmp/op-authd-test.sock"),
    );
    if let Some(deadline) = options.backend_timeout {
        engine = engine.with_backend_timeout(deadline);
    }
    let engine = Arc::new(engine);
    TestDaemon {
        app: http::router(AppState::new(Arc::clone(&engine))),
        engine,
        cache,
    }
}

pub fn fake_daemon(ttl: Duration) -> TestDaemon {
    daemon(DaemonOptions::fake(ttl))
}

/// Builds a request carrying the daemon token and an injected peer
/// identity, the way the Unix accept loop would attach one.
pub fn request(
    method: &str,
    uri: &str,
    token: Option<&str>,
    peer: Option<PeerIdentity>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("x-opauthd-token", token);
    }
    if let Some(peer) = peer {
        builder = builder.extension(peer);
    }
    let body = match body {
        Some(value) => Body::from(value.to_string()),
        None => Body::empty(),
    };
    builder.body(body).unwrap()
}

pub fn post(uri: &str, body: Value) -> Request<Body> {
    request("POST", uri, Some(TOKEN), None, Some(body))
}

pub fn get(uri: &str) -> Request<Body> {
    request("GET", uri, Some(TOKEN), None, None)
}

pub async fn send(app: &Router, req: Request<Body>) -> (axum::http::StatusCode, Bytes) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body)
}

pub async fn send_json(app: &Router, req: Request<Body>) -> (axum::http::StatusCode, Value) {
    let (status, body) = send(app, req).await;
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

pub async fn status_json(app: &Router) -> Value {
    let (status, value) = send_json(app, get("/v1/status")).await;
    assert_eq!(status, axum::http::StatusCode::OK);
    value
}
