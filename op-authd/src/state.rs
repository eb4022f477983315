use std::sync::Arc;

use crate::engine::Engine;

pub type SharedEngine = Arc<Engine>;

#[derive(Clone)]
pub struct AppState {
    pub engine: SharedEngine,
}

impl AppState {
    pub fn new(engine: SharedEngine) -> Self {
        Self { engine }
    }
}
