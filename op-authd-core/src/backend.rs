//! Uniform read interface over the upstream secret stores.

pub mod fake;
pub mod multi;
pub mod opcli;
pub mod vault;

pub use fake::FakeBackend;
pub use multi::MultiBackend;
pub use opcli::{CommandOutput, CommandRunner, OpCliBackend, OpCliUnlock, SystemRunner};
pub use vault::{VaultAuthMethod, VaultBackend, VaultConfig};

use async_trait::async_trait;

use crate::errors::BackendResult;

/// A source of secret values. Flags are passed through opaquely; validating
/// them is each backend's responsibility. Cancellation is structural (the
/// engine drops the future); the engine also wraps calls in its own
/// deadline.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn read(&self, reference: &str, flags: &[String]) -> BackendResult<String>;
    fn name(&self) -> &str;
}

#[async_trait]
impl<T> Backend for std::sync::Arc<T>
where
    T: Backend + ?Sized,
{
    async fn read(&self, reference: &str, flags: &[String]) -> BackendResult<String> {
        (**self).read(reference, flags).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
