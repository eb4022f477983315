//! Process-identity access policy.
//!
//! An ordered list of allow rules plus a default decision. A rule matches a
//! caller iff every present selector matches; its patterns then decide
//! whether the requested reference is covered.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::peer::PeerIdentity;

/// The caller as seen by the policy evaluator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    pub pid: i32,
    pub path: String,
}

impl From<&PeerIdentity> for Subject {
    fn from(peer: &PeerIdentity) -> Self {
        Subject {
            pid: peer.pid,
            path: peer.path.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Absolute executable path, compared after lexical canonicalisation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Hex SHA-256 digest of the caller's path string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_sha256: Option<String>,
    /// Exact PID match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    /// Allowed references; `*` matches anything, a trailing `*` matches by
    /// prefix, anything else matches exactly.
    pub refs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub allow: Vec<Rule>,
    #[serde(default)]
    pub default_deny: bool,
}

/// Answers whether `subject` may read `reference` under `policy`.
pub fn allowed(policy: &Policy, subject: &Subject, reference: &str) -> bool {
    if policy.allow.is_empty() && !policy.default_deny {
        return true;
    }
    for rule in &policy.allow {
        if let Some(pid) = rule.pid {
            if pid != subject.pid {
                continue;
            }
        }
        if let Some(path) = &rule.path {
            if !same_path(path, &subject.path) {
                continue;
            }
        }
        if let Some(digest) = &rule.path_sha256 {
            if !digest.eq_ignore_ascii_case(&sha256_hex(&subject.path)) {
                continue;
            }
        }
        if matches_ref(&rule.refs, reference) {
            return true;
        }
    }
    !policy.default_deny
}

/// Loads the policy file. A missing file is the default allow-all policy; a
/// file that cannot be read or parsed also falls back to the default, with
/// a warning, so a broken policy never takes the daemon down.
pub fn load(path: &Path) -> Policy {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Policy::default(),
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to read policy file, using allow-all");
            return Policy::default();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(policy) => policy,
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to parse policy file, using allow-all");
            Policy::default()
        }
    }
}

fn matches_ref(patterns: &[String], reference: &str) -> bool {
    patterns.iter().any(|pattern| {
        if pattern == "*" {
            true
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            reference.starts_with(prefix)
        } else {
            pattern == reference
        }
    })
}

fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

fn same_path(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    lexical_clean(Path::new(a)) == lexical_clean(Path::new(b))
}

/// Resolves `.` and `..` segments without touching the filesystem; symlinks
/// are deliberately not followed.
fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}
