use bond_engine::BondEngine;
use std::sync::Arc;

/// Shared application state across all routes
#[derive(Clone)]
pub struct AppState {
    pub engine: BondEngine,
}

impl AppState {
    pub fn new(engine: BondEngine) -> Self {
        Self { engine }
    }
}

pub type SharedState = Arc<AppState>;
