//! Deterministic backend for tests and identity bootstrapping.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::Backend;
use crate::errors::BackendResult;

/// Returns a stable value derived from the reference and flags, never
/// touching anything outside the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct FakeBackend;

#[async_trait]
impl Backend for FakeBackend {
    async fn read(&self, reference: &str, flags: &[String]) -> BackendResult<String> {
        let mut hasher = Sha256::new();
        hasher.update(reference.as_bytes());
        for flag in flags {
            hasher.update(b"|");
            hasher.update(flag.as_bytes());
        }
        let digest = hasher.finalize();
        Ok(format!("fake_{}", hex::encode(&digest[..8])))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deterministic_per_input() {
        let backend = FakeBackend;
        let a = backend.read("op://v/i/f", &[]).await.unwrap();
        let b = backend.read("op://v/i/f", &[]).await.unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("fake_"));
        assert_eq!(a.len(), "fake_".len() + 16);
    }

    #[tokio::test]
    async fn flags_change_the_value() {
        let backend = FakeBackend;
        let plain = backend.read("op://v/i/f", &[]).await.unwrap();
        let flagged = backend
            .read("op://v/i/f", &["--account".into()])
            .await
            .unwrap();
        assert_ne!(plain, flagged);
    }
}
