use std::sync::Arc;

use docflow_engine::Engine;

/// Shared application state. A single `Arc<Engine>` gives every route access
/// to the database, settings, config registry, and handler registry without
/// a per-module state struct (SPEC_FULL.md §9: no runtime-global singleton,
/// `Arc`-shared through one state value instead).
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}
