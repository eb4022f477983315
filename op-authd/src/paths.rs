//! XDG directory resolution and bearer-token bootstrap.
//!
//! Every directory the daemon touches is owner-only. The token file is
//! created atomically so concurrent first starts agree on one value.

use std::fs::OpenOptions;
use std::io::{self, ErrorKind, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use rand::RngCore;

const APP_DIR: &str = "op-authd";
const TOKEN_BYTES: usize = 32;

/// Resolved daemon directories, all created with mode 0700.
#[derive(Debug, Clone)]
pub struct Paths {
    pub data_dir: PathBuf,
    pub config_dir: PathBuf,
    pub runtime_dir: PathBuf,
}

impl Paths {
    pub fn resolve() -> io::Result<Self> {
        let data_dir = ensure_private_dir(data_dir_candidate())?;
        let config_dir = ensure_private_dir(config_dir_candidate())?;
        let runtime_dir = match runtime_dir_candidate() {
            Some(dir) => ensure_private_dir(dir)?,
            None => data_dir.clone(),
        };
        Ok(Self {
            data_dir,
            config_dir,
            runtime_dir,
        })
    }

    pub fn socket_path(&self) -> PathBuf {
        self.runtime_dir.join("socket.sock")
    }

    pub fn token_path(&self) -> PathBuf {
        self.data_dir.join("token")
    }

    pub fn policy_path(&self) -> PathBuf {
        self.config_dir.join("policy.json")
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn data_dir_candidate() -> PathBuf {
    match std::env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        Some(base) => PathBuf::from(base).join(APP_DIR),
        None => home_dir().join(".local").join("share").join(APP_DIR),
    }
}

fn config_dir_candidate() -> PathBuf {
    match std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        Some(base) => PathBuf::from(base).join(APP_DIR),
        None => home_dir().join(".config").join(APP_DIR),
    }
}

fn runtime_dir_candidate() -> Option<PathBuf> {
    std::env::var_os("XDG_RUNTIME_DIR")
        .filter(|v| !v.is_empty())
        .map(|base| PathBuf::from(base).join(APP_DIR))
}

fn ensure_private_dir(dir: PathBuf) -> io::Result<PathBuf> {
    std::fs::create_dir_all(&dir)?;
    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
    Ok(dir)
}

/// Returns the existing token, or generates a hex-encoded 32-byte one and
/// stores it with mode 0600. Creation is atomic (temp + rename); a lost
/// rename race resolves by re-reading the winner's file.
pub fn ensure_token(path: &Path) -> io::Result<String> {
    match std::fs::read_to_string(path) {
        Ok(token) => return Ok(token),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }

    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = hex::encode(bytes);

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(&temp_path)?;
    if let Err(err) = file.write_all(token.as_bytes()).and_then(|()| file.sync_all()) {
        drop(file);
        let _ = std::fs::remove_file(&temp_path);
        return Err(err);
    }
    drop(file);

    if let Err(rename_err) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        if let Ok(existing) = std::fs::read_to_string(path) {
            return Ok(existing);
        }
        return Err(rename_err);
    }

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_created_hex_encoded_and_private() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");

        let token = ensure_token(&path).unwrap();
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.bytes().all(|b| b.is_ascii_hexdigit()));

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn token_is_reused_across_starts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");

        let first = ensure_token(&path).unwrap();
        let second = ensure_token(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn existing_token_survives_a_stale_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(path.with_extension("tmp"), b"stale").unwrap();
        std::fs::write(&path, b"existing").unwrap();

        assert_eq!(ensure_token(&path).unwrap(), "existing");
    }
}
