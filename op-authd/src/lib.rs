//! Daemon service library: wires the core components into an axum service
//! on a private Unix socket and manages the background loops.

pub mod auth;
pub mod cli;
pub mod engine;
pub mod error;
pub mod http;
pub mod models;
pub mod paths;
pub mod state;
pub mod telemetry;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use axum::extract::connect_info::Connected;
use axum::serve::IncomingStream;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use op_authd_core::backend::{OpCliBackend, OpCliUnlock};
use op_authd_core::{
    policy, AlwaysUnlocked, AuditKind, AuditLog, Backend, Cache, Decision, FakeBackend,
    MultiBackend, PeerIdentity, Scheme, SessionConfig, SessionManager, UnlockHandler,
    VaultBackend, VaultConfig,
};

use auth::PeerConnectInfo;
use cli::{Cli, DaemonConfig};
use engine::Engine;
use paths::Paths;
use state::AppState;

pub use state::SharedEngine;

impl Connected<IncomingStream<'_, UnixListener>> for PeerConnectInfo {
    fn connect_info(stream: IncomingStream<'_, UnixListener>) -> Self {
        let identity = match PeerIdentity::from_unix_stream(stream.io()) {
            Ok(identity) => identity,
            Err(err) => {
                warn!(%err, "peer credential probe failed");
                PeerIdentity::default()
            }
        };
        Self { identity }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let paths = Paths::resolve().context("failed to resolve daemon directories")?;

    // Session knobs: defaults, config file, environment, then flags.
    let session_base = SessionConfig::load(&paths.data_dir.join("config.json"));
    let config = cli.resolve_with(session_base);

    let token = paths::ensure_token(&paths.token_path())
        .with_context(|| format!("failed to bootstrap token at {}", paths.token_path().display()))?;

    let policy_path = paths.policy_path();
    let policy = policy::load(&policy_path);

    let audit = Arc::new(if config.audit_enabled {
        AuditLog::open(paths.data_dir.clone(), config.audit_retention_days)
    } else {
        AuditLog::disabled()
    });

    let cache = Arc::new(Cache::new(config.ttl));
    let (backend, opcli) = build_backend(&config.backend)?;

    let session = if config.session.enabled {
        Some(build_session(
            &config,
            Arc::clone(&cache),
            Arc::clone(&audit),
            opcli,
        ))
    } else {
        None
    };

    let socket_path = config
        .socket_path
        .clone()
        .unwrap_or_else(|| paths.socket_path());

    let engine = Arc::new(Engine::new(
        Arc::clone(&cache),
        backend,
        session.clone(),
        policy,
        Some(policy_path),
        Arc::clone(&audit),
        token,
        socket_path.clone(),
    ));

    // Socket prep: private parent dir, stale file removed before bind.
    if let Some(parent) = socket_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
        fs::set_permissions(parent, fs::Permissions::from_mode(0o700))?;
    }
    let _ = fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("failed to bind {}", socket_path.display()))?;
    fs::set_permissions(&socket_path, fs::Permissions::from_mode(0o700))?;

    let shutdown = CancellationToken::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    tasks.push(spawn_cache_cleanup(Arc::clone(&cache), shutdown.clone()));
    if let Some(session) = &session {
        tasks.extend(session.spawn_idle_loop(shutdown.clone()));
    }
    tasks.extend(audit.spawn_maintenance(shutdown.clone()));

    info!(
        socket = %socket_path.display(),
        backend = engine.backend.name(),
        ttl_seconds = config.ttl.as_secs(),
        "op-authd listening"
    );

    let app = http::router(AppState::new(Arc::clone(&engine)))
        .into_make_service_with_connect_info::<PeerConnectInfo>();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    shutdown.cancel();
    for task in tasks {
        let _ = task.await;
    }
    let _ = fs::remove_file(&socket_path);
    audit.flush();

    result.map_err(anyhow::Error::from)
}

type BuiltBackend = (Arc<dyn Backend>, Option<Arc<OpCliBackend>>);

fn build_backend(kind: &str) -> anyhow::Result<BuiltBackend> {
    Ok(match kind {
        "opcli" => {
            let op = Arc::new(OpCliBackend::new());
            (Arc::clone(&op) as Arc<dyn Backend>, Some(op))
        }
        "fake" => (Arc::new(FakeBackend) as Arc<dyn Backend>, None),
        "vault" => {
            let config = VaultConfig::from_env().context("vault backend configuration")?;
            (Arc::new(VaultBackend::new(config)) as Arc<dyn Backend>, None)
        }
        "bao" => {
            let config = VaultConfig::from_env().context("bao backend configuration")?;
            (Arc::new(VaultBackend::bao(config)) as Arc<dyn Backend>, None)
        }
        "multi" => {
            let op = Arc::new(OpCliBackend::new());
            let config = VaultConfig::from_env().context("vault backend configuration")?;
            let multi = MultiBackend::new(
                Arc::clone(&op) as Arc<dyn Backend>,
                Arc::new(VaultBackend::new(config.clone())),
                Arc::new(VaultBackend::bao(config)),
                Some(Scheme::Op),
            );
            (Arc::new(multi) as Arc<dyn Backend>, Some(op))
        }
        other => bail!("unknown backend: {other}"),
    })
}

/// Builds the session manager and registers its hooks: the mandatory
/// cache-clearing lock hook, audit emission for both transitions, and the
/// best-effort upstream teardown when the op CLI is in play.
fn build_session(
    config: &DaemonConfig,
    cache: Arc<Cache>,
    audit: Arc<AuditLog>,
    opcli: Option<Arc<OpCliBackend>>,
) -> Arc<SessionManager> {
    let unlock: Box<dyn UnlockHandler> = match &opcli {
        Some(op) => Box::new(OpCliUnlock(Arc::clone(op))),
        None => Box::new(AlwaysUnlocked),
    };

    let lock_audit = Arc::clone(&audit);
    let unlock_audit = audit;
    let mut builder = SessionManager::builder(config.session.clone(), unlock)
        .on_lock(move || {
            let removed = cache.clear();
            debug!(removed, "cache cleared on session lock");
            lock_audit.session_event(AuditKind::SessionLock, Decision::Success, Some("cache cleared"));
        })
        .on_unlock(move || {
            unlock_audit.session_event(AuditKind::SessionUnlock, Decision::Success, None);
        });

    if let Some(op) = opcli {
        builder = builder.on_lock(move || {
            let op = Arc::clone(&op);
            tokio::spawn(async move {
                op.sign_out().await;
            });
        });
    }

    builder.build()
}

fn spawn_cache_cleanup(cache: Arc<Cache>, shutdown: CancellationToken) -> JoinHandle<()> {
    // Sweep every TTL/2, but no more often than every 30 seconds.
    let interval = cache.ttl().checked_div(2).unwrap_or_default();
    let interval = interval.max(Duration::from_secs(30));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = cache.cleanup_expired();
                    if removed > 0 {
                        debug!(removed, "cache cleanup removed expired entries");
                    }
                }
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(?err, "failed to install ctrl-c handler");
        }
    };

    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => warn!(?err, "failed to install sigterm handler"),
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
