//! Domain types for the triage workflow.
//!
//! This module contains the core data structures:
//! - StateRecord: the write-once record threaded through stages
//! - Input: raw and validated run input
//! - Invocation: per-attempt ability call records
//! - Audit: the structured execution trace
//! - Payload: the terminal output of COMPLETE

pub mod audit;
pub mod input;
pub mod invocation;
pub mod payload;
pub mod run;
pub mod stage;
pub mod state;

// Re-export commonly used types
pub use audit::{AuditEntry, AuditLog, AuditOutcome};
pub use input::{TicketInput, TicketRequest};
pub use invocation::{digest, AbilityInvocationRecord, ServerTag};
pub use payload::{ProcessingSummary, TerminalPayload};
pub use run::RunId;
pub use stage::{Edge, StageMode, StageName};
pub use state::{
    DerivedFields, ErrorRecord, EscalationDecision, SolutionScore, StageTrail, StateRecord,
    TicketStatus,
};
