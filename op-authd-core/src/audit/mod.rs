//! Structured audit events for security-relevant decisions.
//!
//! Emission is best-effort: an audit failure never aborts the request that
//! produced it. Records are JSON lines in per-day files under the data
//! directory.

pub mod management;
mod roller;

pub use management::{scan_recent_denials, DenialSummary};
pub use roller::list_files;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::peer::PeerIdentity;
use roller::Roller;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditKind {
    AccessDecision,
    Authentication,
    SessionLock,
    SessionUnlock,
    SessionExpired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Deny,
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event: AuditKind,
    pub peer: PeerIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<BTreeMap<String, String>>,
}

/// Append-only audit sink with daily rotation. The disabled sink drops
/// every event.
pub struct AuditLog {
    roller: Option<Roller>,
    flush_interval: Duration,
}

impl AuditLog {
    /// A sink that records nothing.
    pub fn disabled() -> Self {
        Self {
            roller: None,
            flush_interval: Duration::from_secs(5),
        }
    }

    /// Opens the sink over `dir`, keeping `max_days` days of files.
    pub fn open(dir: PathBuf, max_days: u32) -> Self {
        Self {
            roller: Some(Roller::new(dir, max_days)),
            flush_interval: Duration::from_secs(5),
        }
    }

    pub fn enabled(&self) -> bool {
        self.roller.is_some()
    }

    pub fn current_path(&self) -> Option<PathBuf> {
        self.roller.as_ref().map(Roller::current_path)
    }

    /// Records one event, stamping the timestamp. Write failures are logged
    /// at debug level and otherwise swallowed.
    pub fn log_event(&self, mut event: AuditEvent) {
        let Some(roller) = &self.roller else {
            return;
        };
        event.timestamp = Utc::now();

        info!(
            event = ?event.event,
            decision = ?event.decision,
            peer = %event.peer.describe(),
            reference = event.reference.as_deref().unwrap_or(""),
            "audit"
        );

        match serde_json::to_vec(&event) {
            Ok(line) => {
                if let Err(err) = roller.write_line(&line) {
                    debug!(%err, "audit write failed");
                }
            }
            Err(err) => debug!(%err, "audit encode failed"),
        }
    }

    /// Records a policy access decision.
    pub fn access_decision(
        &self,
        peer: &PeerIdentity,
        reference: &str,
        allowed: bool,
        policy_path: Option<&str>,
    ) {
        self.log_event(AuditEvent {
            timestamp: Utc::now(),
            event: AuditKind::AccessDecision,
            peer: peer.clone(),
            reference: Some(reference.to_string()),
            decision: if allowed {
                Decision::Allow
            } else {
                Decision::Deny
            },
            policy_path: policy_path.map(str::to_string),
            details: None,
        });
    }

    /// Records a bearer-token check outcome.
    pub fn authentication(&self, peer: &PeerIdentity, success: bool, reason: &str) {
        self.log_event(AuditEvent {
            timestamp: Utc::now(),
            event: AuditKind::Authentication,
            peer: peer.clone(),
            reference: None,
            decision: if success {
                Decision::Success
            } else {
                Decision::Failure
            },
            policy_path: None,
            details: Some(BTreeMap::from([(
                "reason".to_string(),
                reason.to_string(),
            )])),
        });
    }

    /// Records a session transition or unlock attempt outcome.
    pub fn session_event(&self, kind: AuditKind, decision: Decision, detail: Option<&str>) {
        self.log_event(AuditEvent {
            timestamp: Utc::now(),
            event: kind,
            peer: PeerIdentity::default(),
            reference: None,
            decision,
            policy_path: None,
            details: detail
                .map(|d| BTreeMap::from([("detail".to_string(), d.to_string())])),
        });
    }

    pub fn flush(&self) {
        if let Some(roller) = &self.roller {
            roller.flush();
        }
    }

    /// Periodic fsync plus retention sweep; exits on cancellation after one
    /// final flush.
    pub fn spawn_maintenance(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let log = Arc::clone(self);
        log.roller.as_ref()?;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(log.flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        log.flush();
                        break;
                    }
                    _ = ticker.tick() => {
                        log.flush();
                        if let Some(roller) = &log.roller {
                            roller.prune_expired();
                        }
                    }
                }
            }
        }))
    }
}
