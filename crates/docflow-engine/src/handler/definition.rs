//! The handler trait and the by-name registry that replaces the originating
//! system's parameter-name reflection (SPEC_FULL.md §4.7, §9).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::context::StepContext;

/// Errors a handler can return. `Core` carries anything from the storage or
/// config layers; the other variants are handler-specific outcomes the
/// worker maps onto the step's ERROR/FAILED status.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("document invalid: {0}")]
    DocumentInvalid(String),

    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    #[error("external failure: {0}")]
    External(String),

    #[error(transparent)]
    Core(#[from] docflow_core::Error),
}

/// One step type's processing logic. Implementations read the subset of
/// `StepContext` they need; there is no "unknown parameter" error at this
/// layer since the struct is total (see SPEC_FULL.md §4.7).
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn handle(&self, ctx: &StepContext) -> Result<(), HandlerError>;
}

/// Handlers registered by name at startup, looked up per step by the name a
/// `StepSpec` declares (`StepSpec::handler`) rather than by step type
/// directly, so one step type can have more than one handler implementation
/// available to different workflow definitions.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(name).cloned()
    }

    /// The five reference-pipeline handlers plus the ingest/enrich/route
    /// passthrough, registered under their step-type names.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("validate", Arc::new(super::builtin::ValidateHandler));
        registry.register("parse", Arc::new(super::builtin::ParseHandler));
        registry.register("chunk", Arc::new(super::builtin::ChunkHandler));
        registry.register("embed", Arc::new(super::builtin::EmbedHandler));
        registry.register("store", Arc::new(super::builtin::StoreHandler));
        registry.register("ingest", Arc::new(super::builtin::PassthroughHandler));
        registry.register("enrich", Arc::new(super::builtin::PassthroughHandler));
        registry.register("route", Arc::new(super::builtin::PassthroughHandler));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysOk;

    #[async_trait]
    impl StepHandler for AlwaysOk {
        async fn handle(&self, _ctx: &StepContext) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn with_builtins_registers_all_eight_step_types() {
        let registry = HandlerRegistry::with_builtins();
        for name in ["validate", "parse", "chunk", "embed", "store", "ingest", "enrich", "route"] {
            assert!(registry.get(name).is_some(), "missing handler for {name}");
        }
    }

    #[test]
    fn unregistered_name_returns_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn custom_handler_can_be_registered_alongside_builtins() {
        let mut registry = HandlerRegistry::with_builtins();
        registry.register("custom_validate", Arc::new(AlwaysOk));
        assert!(registry.get("custom_validate").is_some());
    }
}
