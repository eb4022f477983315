//! Routing multiplexer over the scheme-specific backends.

use std::sync::Arc;

use async_trait::async_trait;

use super::Backend;
use crate::errors::{BackendError, BackendResult};
use crate::reference::Scheme;

pub struct MultiBackend {
    op: Arc<dyn Backend>,
    vault: Arc<dyn Backend>,
    bao: Arc<dyn Backend>,
    default_scheme: Option<Scheme>,
}

impl MultiBackend {
    pub fn new(
        op: Arc<dyn Backend>,
        vault: Arc<dyn Backend>,
        bao: Arc<dyn Backend>,
        default_scheme: Option<Scheme>,
    ) -> Self {
        Self {
            op,
            vault,
            bao,
            default_scheme,
        }
    }

    fn route(&self, reference: &str) -> Option<&Arc<dyn Backend>> {
        let scheme = Scheme::of(reference).or(self.default_scheme)?;
        Some(match scheme {
            Scheme::Op => &self.op,
            Scheme::Vault => &self.vault,
            Scheme::Bao => &self.bao,
        })
    }
}

#[async_trait]
impl Backend for MultiBackend {
    async fn read(&self, reference: &str, flags: &[String]) -> BackendResult<String> {
        let backend = self.route(reference).ok_or_else(|| {
            BackendError::invalid_input(format!("no backend available for reference {reference:?}"))
        })?;
        backend.read(reference, flags).await
    }

    fn name(&self) -> &str {
        "multi"
    }
}
