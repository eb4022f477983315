//! Session state machine with idle locking.
//!
//! The manager owns its unlock handler and a set of lock/unlock hooks, all
//! registered at construction so sibling components (cache, audit) are
//! reached through one-way closures rather than back-references.

mod config;
mod state;

pub use config::{SessionConfig, DEFAULT_CHECK_INTERVAL, DEFAULT_IDLE_TIMEOUT};
pub use state::{SessionInfo, SessionState};

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::SessionError;

/// Probes whether the upstream session is currently usable. Called
/// synchronously during validation; results are never cached.
#[async_trait]
pub trait UnlockHandler: Send + Sync {
    async fn try_unlock(&self) -> Result<(), SessionError>;
}

/// An unlock handler that always succeeds. Used with backends that carry no
/// upstream session of their own.
pub struct AlwaysUnlocked;

#[async_trait]
impl UnlockHandler for AlwaysUnlocked {
    async fn try_unlock(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

#[async_trait]
impl UnlockHandler for Box<dyn UnlockHandler> {
    async fn try_unlock(&self) -> Result<(), SessionError> {
        (**self).try_unlock().await
    }
}

type Hook = Box<dyn Fn() + Send + Sync>;

struct Inner {
    state: SessionState,
    last_activity: Instant,
    locked_at: Option<Instant>,
}

pub struct SessionManager {
    config: SessionConfig,
    inner: Mutex<Inner>,
    unlock: Box<dyn UnlockHandler>,
    lock_hooks: Vec<Hook>,
    unlock_hooks: Vec<Hook>,
}

pub struct SessionManagerBuilder {
    config: SessionConfig,
    unlock: Box<dyn UnlockHandler>,
    lock_hooks: Vec<Hook>,
    unlock_hooks: Vec<Hook>,
}

impl SessionManagerBuilder {
    /// Registers a hook fired on every transition into `Locked`. The first
    /// registered hook is expected to clear the value cache; additional
    /// hooks may tear down upstream state. Hook failures never affect the
    /// transition.
    pub fn on_lock(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.lock_hooks.push(Box::new(hook));
        self
    }

    /// Registers a hook fired on every transition into `Authenticated` from
    /// a non-authenticated state.
    pub fn on_unlock(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.unlock_hooks.push(Box::new(hook));
        self
    }

    pub fn build(self) -> Arc<SessionManager> {
        Arc::new(SessionManager {
            config: self.config,
            inner: Mutex::new(Inner {
                state: SessionState::Unknown,
                last_activity: Instant::now(),
                locked_at: None,
            }),
            unlock: self.unlock,
            lock_hooks: self.lock_hooks,
            unlock_hooks: self.unlock_hooks,
        })
    }
}

impl SessionManager {
    pub fn builder(
        config: SessionConfig,
        unlock: impl UnlockHandler + 'static,
    ) -> SessionManagerBuilder {
        SessionManagerBuilder {
            config,
            unlock: Box::new(unlock),
            lock_hooks: Vec::new(),
            unlock_hooks: Vec::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn info(&self) -> SessionInfo {
        let inner = self.inner.lock();
        SessionInfo {
            state: inner.state,
            last_activity: inner.last_activity,
            idle_timeout: self.config.idle_timeout,
            locked_at: inner.locked_at,
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Stamps activity. A no-op unless the session is authenticated:
    /// failures and denied lookups must not keep the session alive.
    pub fn update_activity(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Authenticated {
            inner.last_activity = Instant::now();
        }
    }

    /// Forces the session into `Locked`, firing lock hooks on an actual
    /// transition.
    pub fn mark_locked(&self) {
        let transitioned = {
            let mut inner = self.inner.lock();
            if inner.state == SessionState::Locked {
                false
            } else {
                inner.state = SessionState::Locked;
                inner.locked_at = Some(Instant::now());
                true
            }
        };
        if transitioned {
            debug!("session locked");
            self.fire(&self.lock_hooks);
        }
    }

    /// Forces the session into `Authenticated`, firing unlock hooks on an
    /// actual transition.
    pub fn mark_authenticated(&self) {
        let transitioned = {
            let mut inner = self.inner.lock();
            let was = inner.state;
            inner.state = SessionState::Authenticated;
            inner.last_activity = Instant::now();
            inner.locked_at = None;
            was != SessionState::Authenticated
        };
        if transitioned {
            debug!("session authenticated");
            self.fire(&self.unlock_hooks);
        }
    }

    /// Gate for the read pipeline. Authenticated passes straight through;
    /// Locked/Expired attempt a fresh unlock; Unknown lets the unlock
    /// handler classify the session.
    pub async fn validate(&self) -> Result<(), SessionError> {
        let state = self.state();
        if state.is_active() {
            return Ok(());
        }

        match self.unlock.try_unlock().await {
            Ok(()) => {
                self.mark_authenticated();
                Ok(())
            }
            Err(err) => {
                if state == SessionState::Unknown {
                    self.mark_locked();
                }
                warn!(%err, "session unlock failed");
                Err(err)
            }
        }
    }

    /// Spawns the idle monitor. Returns `None` when idle locking is not
    /// armed. The loop exits promptly when `shutdown` is cancelled.
    pub fn spawn_idle_loop(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if !self.config.idle_lock_armed() {
            return None;
        }
        let manager = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => manager.check_idle(),
                }
            }
        }))
    }

    fn check_idle(&self) {
        let should_lock = {
            let inner = self.inner.lock();
            inner.state == SessionState::Authenticated
                && !self.config.idle_timeout.is_zero()
                && inner.last_activity.elapsed() > self.config.idle_timeout
        };
        if should_lock {
            debug!("idle timeout exceeded, locking session");
            self.mark_locked();
        }
    }

    fn fire(&self, hooks: &[Hook]) {
        for hook in hooks {
            hook();
        }
    }
}
