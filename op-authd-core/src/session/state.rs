use std::fmt;
use std::time::{Duration, Instant};

/// Lifecycle of the upstream authentication session the daemon fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not yet determined; the first validation classifies it.
    Unknown,
    /// Active; reads are permitted.
    Authenticated,
    /// Locked by idle timeout or an auth failure; requires unlock.
    Locked,
    /// Expired upstream. Handled identically to `Locked`; kept distinct so
    /// the two causes can diverge later without a wire change.
    Expired,
}

impl SessionState {
    pub fn is_active(self) -> bool {
        self == SessionState::Authenticated
    }

    pub fn requires_unlock(self) -> bool {
        matches!(self, SessionState::Locked | SessionState::Expired)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Unknown => "unknown",
            SessionState::Authenticated => "authenticated",
            SessionState::Locked => "locked",
            SessionState::Expired => "expired",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the session manager's state.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub state: SessionState,
    pub last_activity: Instant,
    pub idle_timeout: Duration,
    pub locked_at: Option<Instant>,
}

impl SessionInfo {
    /// Remaining time before the idle monitor would lock the session. Zero
    /// when already locked or when idle locking is disabled.
    pub fn time_until_lock(&self) -> Duration {
        if self.state != SessionState::Authenticated || self.idle_timeout.is_zero() {
            return Duration::ZERO;
        }
        self.idle_timeout
            .saturating_sub(self.last_activity.elapsed())
    }
}
