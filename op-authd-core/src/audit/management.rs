//! Read-back over recorded audit files: aggregation of recent policy
//! denials and helpers for turning them into allow rules.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::roller::list_files;
use super::{AuditEvent, AuditKind, Decision};
use crate::policy::{Policy, Rule};

/// One denied (process, reference) combination with its occurrence count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenialSummary {
    pub timestamp: DateTime<Utc>,
    pub pid: i32,
    pub path: String,
    pub reference: String,
    pub count: u64,
}

/// Scans the audit files under `dir` and aggregates ACCESS_DECISION/DENY
/// records newer than `since`, most frequent first. Unreadable files and
/// malformed lines are skipped.
pub fn scan_recent_denials(dir: &Path, since: Duration) -> io::Result<Vec<DenialSummary>> {
    let files = match list_files(dir) {
        Ok(files) => files,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let cutoff = Utc::now() - chrono::Duration::from_std(since).unwrap_or(chrono::Duration::zero());
    let mut denials: HashMap<(String, String), DenialSummary> = HashMap::new();

    for file in files {
        let Ok(handle) = std::fs::File::open(&file) else {
            continue;
        };
        for line in BufReader::new(handle).lines() {
            let Ok(line) = line else { break };
            if line.is_empty() {
                continue;
            }
            let Ok(event) = serde_json::from_str::<AuditEvent>(&line) else {
                continue;
            };
            if event.event != AuditKind::AccessDecision
                || event.decision != Decision::Deny
                || event.timestamp < cutoff
            {
                continue;
            }
            let reference = event.reference.unwrap_or_default();
            let key = (event.peer.path.clone(), reference.clone());
            denials
                .entry(key)
                .and_modify(|summary| {
                    summary.count += 1;
                    if event.timestamp > summary.timestamp {
                        summary.timestamp = event.timestamp;
                    }
                })
                .or_insert(DenialSummary {
                    timestamp: event.timestamp,
                    pid: event.peer.pid,
                    path: event.peer.path,
                    reference,
                    count: 1,
                });
        }
    }

    let mut result: Vec<DenialSummary> = denials.into_values().collect();
    result.sort_by(|a, b| b.count.cmp(&a.count));
    Ok(result)
}

/// Candidate allow patterns for a denied reference, most specific first.
pub fn suggest_allow_patterns(reference: &str) -> Vec<String> {
    let mut suggestions = vec![reference.to_string()];
    if let Some(rest) = reference.strip_prefix("op://") {
        if let Some((vault, _)) = rest.split_once('/') {
            suggestions.push(format!("op://{vault}/*"));
        }
    }
    suggestions.push("*".to_string());
    suggestions
}

/// A rule that would allow the denied access under `pattern`.
pub fn rule_from_denial(denial: &DenialSummary, pattern: &str) -> Rule {
    Rule {
        path: Some(denial.path.clone()),
        refs: vec![pattern.to_string()],
        ..Rule::default()
    }
}

/// Appends a rule to the policy file, creating it if absent. The first rule
/// added to a previously empty allow list also switches on `default_deny`,
/// since an allow list with a default of allow would not restrict anything.
pub fn append_rule(policy_path: &Path, rule: Rule) -> io::Result<()> {
    let mut policy = crate::policy::load(policy_path);
    policy.allow.push(rule);
    if policy.allow.len() == 1 && !policy.default_deny {
        policy.default_deny = true;
    }
    save_policy(policy_path, &policy)
}

fn save_policy(path: &Path, policy: &Policy) -> io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    use std::io::Write;

    let data = serde_json::to_vec_pretty(policy)?;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(&data)
}
