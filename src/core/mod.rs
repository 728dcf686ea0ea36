//! Core orchestration logic.
//!
//! This module contains:
//! - Graph: the static stage graph and its one conditional edge
//! - Stages: one function per workflow stage
//! - Checkpoint: per-run append-only checkpoint storage
//! - Orchestrator: main execution engine

pub mod checkpoint;
pub mod graph;
pub mod orchestrator;
pub mod stages;

// Re-export commonly used types
pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use graph::{describe, is_valid_history, successor, Transition};
pub use orchestrator::{CancelFlag, FailureDescriptor, Orchestrator, RunFailure, RunReport};
pub use stages::{decide_escalation, StageContext, ESCALATION_THRESHOLD};
