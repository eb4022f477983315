//! Endpoint behaviour over the wire contract: auth, request shapes, cache
//! visibility, batch semantics.

#[path = "support/mod.rs"]
mod support;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::json;

use op_authd_core::policy::{Policy, Rule};
use op_authd_core::{Backend, BackendError, BackendResult, PeerIdentity};
use support::{daemon, fake_daemon, get, post, request, send, send_json, status_json, DaemonOptions, TOKEN};

fn good_peer() -> PeerIdentity {
    PeerIdentity {
        pid: 100,
        uid: 1000,
        gid: 1000,
        path: "/bin/good".into(),
    }
}

fn restrictive_policy() -> Policy {
    Policy {
        allow: vec![Rule {
            path: Some("/bin/good".into()),
            refs: vec!["op://prod/*".into()],
            ..Rule::default()
        }],
        default_deny: true,
    }
}

#[tokio::test]
async fn read_requires_token() {
    let daemon = fake_daemon(Duration::from_secs(60));
    let req = request("POST", "/v1/read", None, None, Some(json!({"ref": "op://v/i/f"})));
    let (status, body) = send(&daemon.app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(&body[..], b"unauthorized");
}

#[tokio::test]
async fn read_rejects_wrong_token() {
    let daemon = fake_daemon(Duration::from_secs(60));
    let req = request(
        "POST",
        "/v1/read",
        Some("not-the-token"),
        None,
        Some(json!({"ref": "op://v/i/f"})),
    );
    let (status, _) = send(&daemon.app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn read_rejects_malformed_json() {
    let daemon = fake_daemon(Duration::from_secs(60));
    let req = request("POST", "/v1/read", Some(TOKEN), None, None);
    let (status, _) = send(&daemon.app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn read_rejects_empty_ref() {
    let daemon = fake_daemon(Duration::from_secs(60));
    let (status, _) = send(&daemon.app, post("/v1/read", json!({"ref": "   "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn wrong_method_is_405() {
    let daemon = fake_daemon(Duration::from_secs(60));
    let (status, _) = send(&daemon.app, get("/v1/read")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn read_then_cached_read() {
    let daemon = fake_daemon(Duration::from_secs(60));

    let (status, first) = send_json(&daemon.app, post("/v1/read", json!({"ref": "op://v/i/f"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["ref"], "op://v/i/f");
    assert_eq!(first["from_cache"], false);
    let value = first["value"].as_str().unwrap().to_string();
    assert!(value.starts_with("fake_"));

    let (status, second) = send_json(&daemon.app, post("/v1/read", json!({"ref": "op://v/i/f"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["from_cache"], true);
    assert_eq!(second["value"].as_str().unwrap(), value);
    assert!(second["expires_in_seconds"].as_u64().unwrap() <= 60);

    let status = status_json(&daemon.app).await;
    assert_eq!(status["backend"], "fake");
    assert_eq!(status["cache_size"], 1);
    assert_eq!(status["hits"], 1);
    assert_eq!(status["misses"], 1);
    assert_eq!(status["in_flight"], 0);
    assert_eq!(status["ttl_seconds"], 60);
    assert!(status.get("session").is_none());
}

#[tokio::test]
async fn flags_isolate_cache_entries() {
    let daemon = fake_daemon(Duration::from_secs(60));

    let (_, plain) = send_json(&daemon.app, post("/v1/read", json!({"ref": "op://v/i/f"}))).await;
    let (_, flagged) = send_json(
        &daemon.app,
        post("/v1/read", json!({"ref": "op://v/i/f", "flags": ["--account"]})),
    )
    .await;

    assert_eq!(plain["from_cache"], false);
    assert_eq!(flagged["from_cache"], false);
    assert_ne!(plain["value"], flagged["value"]);

    let status = status_json(&daemon.app).await;
    assert_eq!(status["cache_size"], 2);
    assert_eq!(status["misses"], 2);

    // Same flags again: now a hit on the flagged entry.
    let (_, again) = send_json(
        &daemon.app,
        post("/v1/read", json!({"ref": "op://v/i/f", "flags": ["--account"]})),
    )
    .await;
    assert_eq!(again["from_cache"], true);
    assert_eq!(again["value"], flagged["value"]);
}

#[tokio::test]
async fn ttl_expiry_refetches() {
    let daemon = fake_daemon(Duration::from_secs(1));

    let (_, first) = send_json(&daemon.app, post("/v1/read", json!({"ref": "op://a/b/c"}))).await;
    assert_eq!(first["from_cache"], false);
    assert!(first["expires_in_seconds"].as_u64().unwrap() <= 1);

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let (_, second) = send_json(&daemon.app, post("/v1/read", json!({"ref": "op://a/b/c"}))).await;
    assert_eq!(second["from_cache"], false);

    let status = status_json(&daemon.app).await;
    assert_eq!(status["misses"], 2);
    assert_eq!(status["hits"], 0);
}

#[tokio::test]
async fn reads_returns_partial_success() {
    let mut options = DaemonOptions::fake(Duration::from_secs(60));
    options.policy = restrictive_policy();
    let daemon = daemon(options);

    let req = request(
        "POST",
        "/v1/reads",
        Some(TOKEN),
        Some(good_peer()),
        Some(json!({"refs": ["op://prod/db/pass", "op://dev/db/pass", "  "]})),
    );
    let (status, body) = send_json(&daemon.app, req).await;
    assert_eq!(status, StatusCode::OK);

    let results = body["results"].as_object().unwrap();
    assert_eq!(results.len(), 2);
    assert!(results["op://prod/db/pass"]["value"]
        .as_str()
        .unwrap()
        .starts_with("fake_"));
    assert_eq!(
        results["op://dev/db/pass"]["value"].as_str().unwrap(),
        "ERROR: access denied by policy"
    );
    assert_eq!(results["op://dev/db/pass"]["from_cache"], false);
}

#[tokio::test]
async fn resolve_returns_all_values() {
    let daemon = fake_daemon(Duration::from_secs(60));

    let (status, body) = send_json(
        &daemon.app,
        post(
            "/v1/resolve",
            json!({"env": {"DB_PASS": "op://v/db/pass", "API_KEY": "op://v/api/key"}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let env = body["env"].as_object().unwrap();
    assert_eq!(env.len(), 2);
    assert!(env["DB_PASS"].as_str().unwrap().starts_with("fake_"));
    assert!(env["API_KEY"].as_str().unwrap().starts_with("fake_"));
}

#[tokio::test]
async fn resolve_aborts_on_first_failure() {
    let mut options = DaemonOptions::fake(Duration::from_secs(60));
    options.policy = restrictive_policy();
    let daemon = daemon(options);

    let req = request(
        "POST",
        "/v1/resolve",
        Some(TOKEN),
        Some(good_peer()),
        Some(json!({"env": {"OK": "op://prod/db/pass", "NO": "op://dev/db/pass"}})),
    );
    let (status, body) = send(&daemon.app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(&body[..], b"access denied by policy");
}

#[tokio::test]
async fn status_requires_token_too() {
    let daemon = fake_daemon(Duration::from_secs(60));
    let req = request("GET", "/v1/status", None, None, None);
    let (status, _) = send(&daemon.app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

/// Fails every read with a fixed backend error.
struct FailingBackend(BackendError);

#[async_trait]
impl Backend for FailingBackend {
    async fn read(&self, _reference: &str, _flags: &[String]) -> BackendResult<String> {
        Err(self.0.clone())
    }

    fn name(&self) -> &str {
        "failing"
    }
}

fn failing_daemon(err: BackendError) -> support::TestDaemon {
    let mut options = DaemonOptions::fake(Duration::from_secs(60));
    options.backend = Arc::new(FailingBackend(err));
    daemon(options)
}

#[tokio::test]
async fn missing_secret_maps_to_404() {
    let daemon = failing_daemon(BackendError::NotFound("no secret at path x".into()));
    let (status, body) = send(&daemon.app, post("/v1/read", json!({"ref": "vault://x"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(&body[..], b"secret not found");
}

#[tokio::test]
async fn upstream_failure_maps_to_502_with_sanitised_body() {
    let daemon = failing_daemon(BackendError::upstream("status 500: internal lease detail"));
    let (status, body) = send(&daemon.app, post("/v1/read", json!({"ref": "op://a/b/c"}))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    // The upstream detail never reaches the client.
    assert_eq!(&body[..], b"failed to read secret");
}

#[tokio::test]
async fn backend_failures_are_not_cached() {
    let daemon = failing_daemon(BackendError::upstream("transient"));
    let (_, _) = send(&daemon.app, post("/v1/read", json!({"ref": "op://a/b/c"}))).await;
    let status = status_json(&daemon.app).await;
    assert_eq!(status["cache_size"], 0);
    assert_eq!(status["misses"], 1);
    assert_eq!(status["in_flight"], 0);
}
