//! The request-processing engine: session gate, policy gate, coalesced
//! cache, and audit, wired around a single backend.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::timeout;
use tracing::{debug, warn};

use op_authd_core::policy::{self, Policy, Subject};
use op_authd_core::{
    fingerprint, AuditKind, AuditLog, Backend, BackendError, Cache, PeerIdentity, SessionManager,
    SingleFlight,
};
use op_authd_core::audit::Decision;

use crate::error::AppError;

/// Deadline for one upstream fetch inside the single-flight slot.
pub const BACKEND_TIMEOUT: Duration = Duration::from_secs(20);

/// Result of one pipeline run, ready to be shaped into a wire response.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub value: String,
    pub from_cache: bool,
    pub expires_in: Duration,
    pub resolved_at: SystemTime,
}

impl ReadOutcome {
    pub fn resolved_at_unix(&self) -> i64 {
        self.resolved_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// Process-wide daemon state, constructed once at startup and threaded into
/// handlers.
pub struct Engine {
    pub cache: Arc<Cache>,
    pub backend: Arc<dyn Backend>,
    pub session: Option<Arc<SessionManager>>,
    pub policy: Policy,
    pub policy_path: Option<PathBuf>,
    pub audit: Arc<AuditLog>,
    pub token: String,
    pub socket_path: PathBuf,
    backend_timeout: Duration,
    flight: SingleFlight,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<Cache>,
        backend: Arc<dyn Backend>,
        session: Option<Arc<SessionManager>>,
        policy: Policy,
        policy_path: Option<PathBuf>,
        audit: Arc<AuditLog>,
        token: String,
        socket_path: PathBuf,
    ) -> Self {
        Self {
            cache,
            backend,
            session,
            policy,
            policy_path,
            audit,
            token,
            socket_path,
            backend_timeout: BACKEND_TIMEOUT,
            flight: SingleFlight::new(),
        }
    }

    /// Overrides the per-fetch deadline. Exercised by tests; production
    /// wiring keeps the default.
    pub fn with_backend_timeout(mut self, deadline: Duration) -> Self {
        self.backend_timeout = deadline;
        self
    }

    /// Runs the full read pipeline for one reference. Auth has already
    /// happened in middleware; everything from the session gate on lives
    /// here so `reads`/`resolve` reuse it per reference.
    pub async fn read_one(
        &self,
        peer: &PeerIdentity,
        reference: &str,
        flags: &[String],
    ) -> Result<ReadOutcome, AppError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(AppError::invalid_request("ref required"));
        }

        // Session gate. Failures must not touch the cache.
        if let Some(session) = &self.session {
            if let Err(err) = session.validate().await {
                let reason = err.to_string();
                self.audit
                    .session_event(AuditKind::SessionUnlock, Decision::Failure, Some(reason.as_str()));
                return Err(err.into());
            }
        }

        // Policy gate. Denials must not touch the cache or the backend.
        let subject = Subject::from(peer);
        let allowed = policy::allowed(&self.policy, &subject, reference);
        self.audit.access_decision(
            peer,
            reference,
            allowed,
            self.policy_path.as_deref().and_then(|p| p.to_str()),
        );
        if !allowed {
            debug!(peer = %peer.describe(), reference, "access denied by policy");
            return Err(AppError::Forbidden);
        }

        let key = fingerprint(reference, flags);

        if let Some(hit) = self.cache.get(&key) {
            self.cache.record_hit();
            self.stamp_activity();
            return Ok(ReadOutcome {
                value: hit.value,
                from_cache: true,
                expires_in: hit.expires_in,
                resolved_at: hit.cached_at,
            });
        }

        let _gauge = self.cache.flight_guard();
        let _permit = self.flight.acquire(&key).await;

        // Double-checked: a winner that finished while this caller queued
        // has already populated the cache.
        if let Some(hit) = self.cache.get(&key) {
            self.cache.record_hit();
            self.stamp_activity();
            return Ok(ReadOutcome {
                value: hit.value,
                from_cache: true,
                expires_in: hit.expires_in,
                resolved_at: hit.cached_at,
            });
        }

        self.cache.record_miss();
        let value = match timeout(self.backend_timeout, self.backend.read(reference, flags)).await {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                warn!(reference, %err, backend = self.backend.name(), "backend read failed");
                return Err(err.into());
            }
            Err(_) => {
                warn!(reference, backend = self.backend.name(), "backend read timed out");
                return Err(BackendError::upstream("backend timed out").into());
            }
        };

        self.cache.set(&key, &value);
        self.stamp_activity();
        Ok(ReadOutcome {
            value,
            from_cache: false,
            expires_in: self.cache.ttl(),
            resolved_at: SystemTime::now(),
        })
    }

    fn stamp_activity(&self) {
        if let Some(session) = &self.session {
            session.update_activity();
        }
    }
}
