//! Backend that shells out to the 1Password `op` command-line tool.
//!
//! References and flags are validated before anything is spawned: a
//! reference that does not look like `op://…`, or a flag that could smuggle
//! shell metacharacters or extra arguments, is rejected without touching
//! the launcher.

use async_trait::async_trait;

use super::Backend;
use crate::errors::{BackendError, BackendResult, SessionError};
use crate::session::UnlockHandler;

const UNSAFE_FLAG_CHARS: &[char] = &[';', '&', '|', '`', '$', '(', ')'];
const STDERR_EXCERPT_LIMIT: usize = 200;

/// Captured result of one external command invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Launches external commands. Injected so tests can observe that no
/// subprocess is spawned for rejected input.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput>;
}

/// Real launcher backed by `tokio::process`.
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

pub struct OpCliBackend {
    program: String,
    runner: Box<dyn CommandRunner>,
}

impl Default for OpCliBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OpCliBackend {
    pub fn new() -> Self {
        Self::with_runner("op", SystemRunner)
    }

    pub fn with_runner(program: impl Into<String>, runner: impl CommandRunner + 'static) -> Self {
        Self {
            program: program.into(),
            runner: Box::new(runner),
        }
    }

    /// Probes the CLI session with `op whoami`.
    pub async fn probe_session(&self) -> Result<(), SessionError> {
        let output = self
            .runner
            .run(&self.program, &["whoami".to_string()])
            .await
            .map_err(|err| SessionError::Locked(format!("failed to run op whoami: {err}")))?;
        if output.success {
            Ok(())
        } else {
            Err(SessionError::Locked(
                "op session invalid or expired".to_string(),
            ))
        }
    }

    /// Clears the CLI session with `op signout --forget`. Best-effort: the
    /// session may already be gone.
    pub async fn sign_out(&self) {
        let _ = self
            .runner
            .run(
                &self.program,
                &["signout".to_string(), "--forget".to_string()],
            )
            .await;
    }

    fn validate(reference: &str, flags: &[String]) -> BackendResult<()> {
        if reference.trim().is_empty() {
            return Err(BackendError::invalid_input("empty reference"));
        }
        if reference.starts_with('-') {
            return Err(BackendError::invalid_input(
                "reference cannot start with a dash",
            ));
        }
        if !reference.starts_with("op://") {
            return Err(BackendError::invalid_input(
                "reference must start with op://",
            ));
        }
        for flag in flags {
            if flag.is_empty() {
                continue;
            }
            if !flag.starts_with('-') {
                return Err(BackendError::invalid_input("flag must start with a dash"));
            }
            if flag.contains(UNSAFE_FLAG_CHARS) {
                return Err(BackendError::invalid_input(
                    "flag contains unsafe characters",
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for OpCliBackend {
    async fn read(&self, reference: &str, flags: &[String]) -> BackendResult<String> {
        Self::validate(reference, flags)?;

        // argv: op [global-flags] read --no-color <ref>
        let mut args: Vec<String> = flags.iter().filter(|f| !f.is_empty()).cloned().collect();
        args.push("read".to_string());
        args.push("--no-color".to_string());
        args.push(reference.to_string());

        let output = self
            .runner
            .run(&self.program, &args)
            .await
            .map_err(|err| BackendError::upstream(format!("failed to run op: {err}")))?;

        if !output.success {
            return Err(BackendError::upstream(format!(
                "op read failed: {}",
                stderr_excerpt(&output.stderr)
            )));
        }

        let mut value = String::from_utf8_lossy(&output.stdout).into_owned();
        while value.ends_with('\n') {
            value.pop();
        }
        Ok(value)
    }

    fn name(&self) -> &str {
        "opcli"
    }
}

/// Unlock handler that treats a working `op whoami` as proof the upstream
/// session is usable.
pub struct OpCliUnlock(pub std::sync::Arc<OpCliBackend>);

#[async_trait]
impl UnlockHandler for OpCliUnlock {
    async fn try_unlock(&self) -> Result<(), SessionError> {
        self.0.probe_session().await
    }
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let line = text.lines().next().unwrap_or("").trim();
    let mut excerpt: String = line.chars().take(STDERR_EXCERPT_LIMIT).collect();
    if excerpt.is_empty() {
        excerpt.push_str("non-zero exit");
    }
    excerpt
}
