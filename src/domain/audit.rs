//! Structured, append-only execution trace.
//!
//! One entry per ability attempt plus one per stage transition. The log is
//! meant for external monitoring and is exported as JSONL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::invocation::{AbilityInvocationRecord, ServerTag};
use super::run::RunId;
use super::stage::{Edge, StageName};

/// A single audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When this entry was recorded (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The run this entry belongs to
    pub run_id: RunId,

    pub stage: StageName,

    /// Set for ability entries only
    pub server: Option<ServerTag>,
    pub ability: Option<String>,

    /// Time taken in milliseconds
    pub duration_ms: u64,

    pub outcome: AuditOutcome,

    /// Edge chosen at the branch point
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge: Option<Edge>,

    /// Error message if failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEntry {
    /// Entry for a stage transition
    pub fn transition(run_id: RunId, stage: StageName, outcome: AuditOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id,
            stage,
            server: None,
            ability: None,
            duration_ms: 0,
            outcome,
            edge: None,
            error: None,
        }
    }

    /// Entry mirroring one ability attempt
    pub fn invocation(run_id: RunId, record: &AbilityInvocationRecord) -> Self {
        Self {
            timestamp: record.started_at,
            run_id,
            stage: record.stage,
            server: Some(record.server),
            ability: Some(record.ability.clone()),
            duration_ms: record.duration_ms,
            outcome: if record.success {
                AuditOutcome::Succeeded
            } else {
                AuditOutcome::Failed
            },
            edge: None,
            error: record.error.clone(),
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edge = Some(edge);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

/// Outcome of an audited event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Ability attempt succeeded
    Succeeded,

    /// Ability attempt failed
    Failed,

    /// Stage finished and was checkpointed
    Completed,

    /// Stage aborted the run
    Aborted,

    /// Run cancelled before this stage started
    Cancelled,
}

/// Ordered audit trail of one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: AuditEntry) {
        self.entries.push(entry);
    }

    /// Append one entry per invocation record, in order
    pub fn record_invocations(&mut self, run_id: &RunId, records: &[AbilityInvocationRecord]) {
        self.entries.extend(
            records
                .iter()
                .map(|record| AuditEntry::invocation(run_id.clone(), record)),
        );
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stage transition entries only
    pub fn transitions(&self) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter().filter(|e| e.ability.is_none())
    }

    /// Newline-delimited JSON export
    pub fn to_jsonl(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }
        Ok(out)
    }
}
