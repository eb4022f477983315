use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// Default idle timeout before the session locks.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(8 * 60 * 60);
/// Default cadence of the idle monitor.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Session management knobs. Flags override environment, which overrides
/// these defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub idle_timeout: Duration,
    pub enabled: bool,
    pub lock_on_auth_failure: bool,
    pub check_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            enabled: true,
            lock_on_auth_failure: true,
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }
}

/// On-disk form of the session knobs, all optional so a partial file only
/// overrides what it names.
#[derive(Debug, Default, Deserialize)]
struct SessionConfigFile {
    #[serde(default)]
    idle_timeout_seconds: Option<u64>,
    #[serde(default)]
    enable_session_lock: Option<bool>,
    #[serde(default)]
    lock_on_auth_failure: Option<bool>,
    #[serde(default)]
    check_interval_seconds: Option<u64>,
}

impl SessionConfig {
    /// Layers the config file under the environment: defaults, then the
    /// file at `path` (when present and parseable), then the env knobs.
    pub fn load(path: &Path) -> Self {
        let mut config = Self::default();
        config.apply_file(path);
        config.apply_env();
        config
    }

    /// Environment knobs only, on top of the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_file(&mut self, path: &Path) {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to read session config");
                return;
            }
        };
        let file: SessionConfigFile = match serde_json::from_slice(&bytes) {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to parse session config");
                return;
            }
        };
        if let Some(seconds) = file.idle_timeout_seconds {
            self.idle_timeout = Duration::from_secs(seconds);
        }
        if let Some(enabled) = file.enable_session_lock {
            self.enabled = enabled;
        }
        if let Some(lock) = file.lock_on_auth_failure {
            self.lock_on_auth_failure = lock;
        }
        if let Some(seconds) = file.check_interval_seconds {
            if seconds > 0 {
                self.check_interval = Duration::from_secs(seconds);
            }
        }
    }

    /// `OP_AUTHD_SESSION_TIMEOUT` (a humantime duration),
    /// `OP_AUTHD_ENABLE_SESSION_LOCK` and `OP_AUTHD_LOCK_ON_AUTH_FAILURE`.
    /// Unparseable values are ignored.
    fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("OP_AUTHD_SESSION_TIMEOUT") {
            if let Ok(timeout) = humantime::parse_duration(&value) {
                self.idle_timeout = timeout;
            }
        }
        if let Ok(value) = std::env::var("OP_AUTHD_ENABLE_SESSION_LOCK") {
            self.enabled = parse_bool(&value).unwrap_or(self.enabled);
        }
        if let Ok(value) = std::env::var("OP_AUTHD_LOCK_ON_AUTH_FAILURE") {
            self.lock_on_auth_failure = parse_bool(&value).unwrap_or(self.lock_on_auth_failure);
        }
    }

    /// A zero idle timeout disables idle locking even when the session
    /// machinery itself is enabled.
    pub fn idle_lock_armed(&self) -> bool {
        self.enabled && !self.idle_timeout.is_zero()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}
