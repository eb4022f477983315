//! Daemon command line. Flags override environment, which overrides
//! defaults.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use op_authd_core::SessionConfig;

#[derive(Debug, Parser)]
#[command(name = "op-authd", version, about = "Local secret retrieval daemon")]
pub struct Cli {
    /// Cache TTL in seconds.
    #[arg(long, default_value_t = 120)]
    pub ttl: u64,

    /// Unix socket path (default: XDG runtime dir).
    #[arg(long)]
    pub sock: Option<PathBuf>,

    /// Verbose logging.
    #[arg(long)]
    pub verbose: bool,

    /// Backend: opcli|fake|vault|bao|multi.
    #[arg(long, env = "OP_AUTHD_BACKEND", default_value = "opcli")]
    pub backend: String,

    /// Session idle timeout in hours (0 to disable idle locking).
    #[arg(long = "session-timeout")]
    pub session_timeout_hours: Option<u64>,

    /// Enable the session state machine.
    #[arg(
        long = "enable-session-lock",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub enable_session_lock: Option<bool>,

    /// Lock the session on authentication failures.
    #[arg(
        long = "lock-on-auth-failure",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub lock_on_auth_failure: Option<bool>,

    /// Write structured audit records.
    #[arg(
        long = "enable-audit-log",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub enable_audit_log: Option<bool>,

    /// Days of audit files to keep (0 keeps everything).
    #[arg(long = "audit-retention-days", default_value_t = 30)]
    pub audit_retention_days: u32,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub ttl: Duration,
    pub socket_path: Option<PathBuf>,
    pub verbose: bool,
    pub backend: String,
    pub session: SessionConfig,
    pub audit_enabled: bool,
    pub audit_retention_days: u32,
}

impl Cli {
    /// Resolves against a base session configuration that already layers
    /// the config file under the environment.
    pub fn resolve_with(self, base: SessionConfig) -> DaemonConfig {
        // Explicit flags override everything beneath them.
        let mut session = base;
        if let Some(hours) = self.session_timeout_hours {
            session.idle_timeout = Duration::from_secs(hours * 60 * 60);
        }
        if let Some(enabled) = self.enable_session_lock {
            session.enabled = enabled;
        }
        if let Some(lock) = self.lock_on_auth_failure {
            session.lock_on_auth_failure = lock;
        }

        DaemonConfig {
            ttl: Duration::from_secs(self.ttl),
            socket_path: self.sock,
            verbose: self.verbose,
            backend: self.backend,
            session,
            audit_enabled: self.enable_audit_log.unwrap_or(true),
            audit_retention_days: self.audit_retention_days,
        }
    }

    pub fn resolve(self) -> DaemonConfig {
        self.resolve_with(SessionConfig::from_env())
    }
}
