//! Policy enforcement through the read endpoint, and audit completeness
//! for the decisions it produces.

#[path = "support/mod.rs"]
mod support;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use op_authd_core::audit::{AuditEvent, AuditKind, Decision};
use op_authd_core::policy::{Policy, Rule};
use op_authd_core::{AuditLog, PeerIdentity};
use support::{daemon, request, send, DaemonOptions, TOKEN};

fn peer(path: &str) -> PeerIdentity {
    PeerIdentity {
        pid: 100,
        uid: 1000,
        gid: 1000,
        path: path.into(),
    }
}

fn prod_only_policy() -> Policy {
    Policy {
        allow: vec![Rule {
            path: Some("/bin/good".into()),
            refs: vec!["op://prod/*".into()],
            ..Rule::default()
        }],
        default_deny: true,
    }
}

fn read_req(peer_path: &str, reference: &str) -> axum::http::Request<axum::body::Body> {
    request(
        "POST",
        "/v1/read",
        Some(TOKEN),
        Some(peer(peer_path)),
        Some(json!({"ref": reference})),
    )
}

fn audit_events(log: &AuditLog) -> Vec<AuditEvent> {
    let path = log.current_path().unwrap();
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn policy_matrix_and_audit_trail() {
    let audit_dir = tempfile::tempdir().unwrap();
    let mut options = DaemonOptions::fake(Duration::from_secs(60));
    options.policy = prod_only_policy();
    options.audit = Arc::new(AuditLog::open(audit_dir.path().to_path_buf(), 30));
    let daemon = daemon(options);

    let (status, body) = send(&daemon.app, read_req("/bin/bad", "op://prod/db/pass")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(&body[..], b"access denied by policy");

    let (status, _) = send(&daemon.app, read_req("/bin/good", "op://dev/db/pass")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&daemon.app, read_req("/bin/good", "op://prod/db/pass")).await;
    assert_eq!(status, StatusCode::OK);

    // Exactly one access decision per attempt, with the expected outcomes.
    let decisions: Vec<AuditEvent> = audit_events(&daemon.engine.audit)
        .into_iter()
        .filter(|event| event.event == AuditKind::AccessDecision)
        .collect();
    assert_eq!(decisions.len(), 3);
    assert_eq!(decisions[0].decision, Decision::Deny);
    assert_eq!(decisions[0].peer.path, "/bin/bad");
    assert_eq!(decisions[1].decision, Decision::Deny);
    assert_eq!(decisions[2].decision, Decision::Allow);
    assert_eq!(
        decisions[2].reference.as_deref(),
        Some("op://prod/db/pass")
    );
}

#[tokio::test]
async fn auth_failures_are_audited_once() {
    let audit_dir = tempfile::tempdir().unwrap();
    let mut options = DaemonOptions::fake(Duration::from_secs(60));
    options.audit = Arc::new(AuditLog::open(audit_dir.path().to_path_buf(), 30));
    let daemon = daemon(options);

    let bad = request(
        "POST",
        "/v1/read",
        Some("wrong"),
        None,
        Some(json!({"ref": "op://v/i/f"})),
    );
    let (status, _) = send(&daemon.app, bad).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let failures: Vec<AuditEvent> = audit_events(&daemon.engine.audit)
        .into_iter()
        .filter(|event| {
            event.event == AuditKind::Authentication && event.decision == Decision::Failure
        })
        .collect();
    assert_eq!(failures.len(), 1);
}

#[tokio::test]
async fn empty_identity_matches_no_selector() {
    let mut options = DaemonOptions::fake(Duration::from_secs(60));
    options.policy = prod_only_policy();
    let daemon = daemon(options);

    // No injected peer: the middleware attaches the empty identity.
    let req = request(
        "POST",
        "/v1/read",
        Some(TOKEN),
        None,
        Some(json!({"ref": "op://prod/db/pass"})),
    );
    let (status, _) = send(&daemon.app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
