//! Peer identity extracted from a Unix socket connection.
//!
//! The probe runs once per accepted connection. When it fails, requests
//! proceed with the empty identity, which cannot match any policy rule with
//! a populated selector.

use serde::{Deserialize, Serialize};

/// Credentials and best-effort executable path of the process on the other
/// end of a local socket. An empty `path` means it could not be determined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
    pub path: String,
}

impl PeerIdentity {
    /// Probes the peer of a connected Unix stream via `SO_PEERCRED` (or the
    /// platform equivalent) and resolves the executable path best-effort.
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    pub fn from_unix_stream(stream: &tokio::net::UnixStream) -> std::io::Result<Self> {
        let cred = stream.peer_cred()?;
        let pid = peer_pid(&cred);
        Ok(Self {
            pid,
            uid: cred.uid(),
            gid: cred.gid(),
            path: executable_path(pid),
        })
    }

    /// Peer credentials are not available on this platform; policies with a
    /// populated `path`/`pid` selector will deny.
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    pub fn from_unix_stream(_stream: &tokio::net::UnixStream) -> std::io::Result<Self> {
        Ok(Self::default())
    }

    pub fn is_unknown(&self) -> bool {
        self.pid == 0 && self.path.is_empty()
    }

    pub fn describe(&self) -> String {
        if self.path.is_empty() {
            format!("pid:{} uid:{} gid:{}", self.pid, self.uid, self.gid)
        } else {
            format!(
                "pid:{} path:{} uid:{} gid:{}",
                self.pid, self.path, self.uid, self.gid
            )
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn peer_pid(cred: &tokio::net::unix::UCred) -> i32 {
    cred.pid().unwrap_or(0)
}

#[cfg(target_os = "linux")]
fn executable_path(pid: i32) -> String {
    if pid <= 0 {
        return String::new();
    }
    std::fs::read_link(format!("/proc/{pid}/exe"))
        .map(|target| target.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(target_os = "macos")]
fn executable_path(pid: i32) -> String {
    if pid <= 0 {
        return String::new();
    }
    std::process::Command::new("/bin/ps")
        .args(["-o", "comm=", "-p", &pid.to_string()])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .unwrap_or_default()
}
