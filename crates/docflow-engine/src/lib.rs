//! # Document-Ingestion Workflow Engine
//!
//! Drives documents through an ordered pipeline of typed processing steps
//! (validate → parse → chunk → embed → store), persisting every run's
//! progress so that a worker crash loses no more than the step it was
//! mid-execution on (SPEC_FULL.md §1).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Run Builder                           │
//! │  (RunGroup/WorkflowRun/RunStep materialisation)              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Scheduler                              │
//! │  (runnable-step selection, priority/retry/age ordering)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Worker pool                           │
//! │  (checkin/poll/reaper loops, lease-and-run, lifecycle fire)  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! `docflow-storage::Database` is the single source of truth; every
//! mutation here that matters for correctness (step leasing, the status
//! state machine, the run-status rollup) is a `docflow-storage` method run
//! inside one `sqlx` transaction. This crate supplies the orchestration
//! around those transactions: the config registry and deduplicator, the run
//! builder, the scheduler, the worker pool, the lifecycle dispatcher, and
//! document/artifact operations.

pub mod config;
pub mod document_ops;
pub mod engine;
pub mod handler;
pub mod lifecycle;
pub mod rag;
pub mod reliability;
pub mod run_builder;
pub mod scheduler;
pub mod worker;

pub use engine::Engine;
pub use scheduler::Scheduler;
pub use worker::{spawn as spawn_worker, WorkerHandle};
