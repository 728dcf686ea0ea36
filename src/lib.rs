//! triage - Checkpointed customer-support resolution workflow
//!
//! Runs a support ticket through a fixed graph of eleven stages over a
//! write-once state record. Stages call out to capability providers
//! ("abilities") on an internal or external server; external calls are
//! retried with backoff. A single branch at DECIDE either continues to
//! automated resolution or escalates to a human.
//!
//! # Architecture
//!
//! - Every stage returns a new `StateRecord`; derived fields are never overwritten
//! - The record is checkpointed after every stage
//! - Every ability attempt and stage transition lands in the audit log
//! - Fatal errors return the partial record alongside the failed stage
//!
//! # Modules
//!
//! - `abilities`: capability catalog, provider with retry/timeout, simulated backend
//! - `core`: stage graph, stages, checkpoint stores, orchestrator
//! - `domain`: data structures (StateRecord, invocation records, audit log, payload)
//! - `config`: configuration discovery
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the sample ticket
//! triage run --sample
//!
//! # Force the escalation path and keep checkpoints on disk
//! triage run --sample --kb-relevance 0.6 --persist --run-id demo
//! triage audit demo
//! ```

pub mod abilities;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;

// Re-export main types at crate root for convenience
pub use abilities::{AbilityBackend, AbilityProvider, ProviderSettings, SimulatedBackend};
pub use core::{CancelFlag, Orchestrator, RunFailure, RunReport};
pub use domain::{RunId, StageName, StateRecord, TerminalPayload, TicketRequest};
pub use error::{ErrorKind, WorkflowError};
