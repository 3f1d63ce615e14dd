//! Handler invocation: the typed `StepContext`, the `StepHandler` trait, the
//! by-name `HandlerRegistry`, and the built-in reference-pipeline handlers
//! (SPEC_FULL.md §4.7).

pub mod builtin;
pub mod context;
pub mod definition;

pub use context::StepContext;
pub use definition::{HandlerError, HandlerRegistry, StepHandler};
