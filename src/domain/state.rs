//! The state record threaded through every stage of a run.
//!
//! A `StateRecord` is replaced, never mutated: each stage builds a new record
//! from the previous one plus its additions. Derived fields are write-once;
//! bookkeeping sequences (stage history, invocation log, error log) only grow.
//! Once COMPLETE seals the record, no further additions are accepted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::input::TicketInput;
use super::invocation::AbilityInvocationRecord;
use super::payload::{ProcessingSummary, TerminalPayload};
use super::stage::StageName;
use crate::error::{ErrorKind, WorkflowError};

/// Fields produced by stages. Each one is owned by exactly one stage.
///
/// The same shape doubles as the delta a stage hands to
/// [`StateRecord::with_additions`]: fields left as `None` are untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DerivedFields {
    // UNDERSTAND
    pub parsed_request: Option<Value>,
    pub extracted_entities: Option<Value>,

    // PREPARE
    pub normalized_fields: Option<Value>,
    pub enrichment: Option<Value>,
    pub flags: Option<Value>,

    // ASK / WAIT
    pub clarification_question: Option<String>,
    pub customer_answer: Option<String>,

    // RETRIEVE
    pub knowledge_base_matches: Option<Vec<Value>>,

    // DECIDE
    pub solution_scores: Option<Vec<SolutionScore>>,
    pub escalation: Option<EscalationDecision>,

    // UPDATE (or the escalation hand-off)
    pub ticket_updates: Option<Value>,
    pub ticket_status: Option<TicketStatus>,

    // CREATE
    pub generated_response: Option<String>,

    // DO
    pub api_calls: Option<Vec<Value>>,
    pub notifications: Option<Vec<Value>>,
}

/// Move every `Some` field of `$additions` into `$target`, refusing overwrites
macro_rules! merge_write_once {
    ($target:expr, $additions:expr, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = $additions.$field {
                if $target.$field.is_some() {
                    return Err(WorkflowError::StateConflict {
                        field: stringify!($field),
                    });
                }
                $target.$field = Some(value);
            }
        )+
    };
}

/// A scored candidate solution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionScore {
    pub solution: String,

    /// 0-100
    pub score: u8,

    /// 0.0-1.0
    pub confidence: f64,
}

/// Outcome of the DECIDE stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationDecision {
    pub escalate: bool,
    pub reason: Option<String>,
    pub best_score: Option<u8>,
}

/// Ticket status as reported in the terminal payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Closed,
    Escalated,
}

/// A non-fatal failure recorded during a stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub stage: StageName,
    pub ability: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(stage: StageName, ability: Option<&str>, error: &WorkflowError) -> Self {
        Self {
            timestamp: Utc::now(),
            stage,
            ability: ability.map(str::to_string),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Invocation and error records collected while a stage ran
#[derive(Debug, Clone, Default)]
pub struct StageTrail {
    pub invocations: Vec<AbilityInvocationRecord>,
    pub errors: Vec<ErrorRecord>,
}

/// The versioned record threaded through a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRecord {
    input: TicketInput,
    derived: DerivedFields,
    stage_history: Vec<StageName>,
    invocations: Vec<AbilityInvocationRecord>,
    errors: Vec<ErrorRecord>,
    completed_at: Option<DateTime<Utc>>,
}

impl StateRecord {
    /// Create a record from validated input with empty bookkeeping
    pub fn new(input: TicketInput) -> Self {
        Self {
            input,
            derived: DerivedFields::default(),
            stage_history: Vec::new(),
            invocations: Vec::new(),
            errors: Vec::new(),
            completed_at: None,
        }
    }

    /// Return a new record with `additions` merged in.
    ///
    /// Fails with `StateConflict` if any addition targets a field that is
    /// already set, or if the record is sealed. `self` is never modified.
    pub fn with_additions(&self, additions: DerivedFields) -> Result<Self, WorkflowError> {
        if self.is_complete() {
            return Err(WorkflowError::StateConflict {
                field: "completed_at",
            });
        }

        let mut next = self.clone();
        merge_write_once!(
            next.derived,
            additions,
            parsed_request,
            extracted_entities,
            normalized_fields,
            enrichment,
            flags,
            clarification_question,
            customer_answer,
            knowledge_base_matches,
            solution_scores,
            escalation,
            ticket_updates,
            ticket_status,
            generated_response,
            api_calls,
            notifications,
        );
        Ok(next)
    }

    /// Append a finished stage and its trail to the bookkeeping sequences
    pub fn record_stage(&self, stage: StageName, trail: StageTrail) -> Result<Self, WorkflowError> {
        if self.is_complete() {
            return Err(WorkflowError::StateConflict {
                field: "stage_history",
            });
        }

        let mut next = self.with_trail(trail);
        next.stage_history.push(stage);
        Ok(next)
    }

    /// Append invocation and error records without touching stage history
    pub fn with_trail(&self, trail: StageTrail) -> Self {
        let mut next = self.clone();
        next.invocations.extend(trail.invocations);
        next.errors.extend(trail.errors);
        next
    }

    /// Seal the record as complete. Sealing a sealed record is a no-op.
    pub fn seal(&self, at: DateTime<Utc>) -> Self {
        if self.is_complete() {
            return self.clone();
        }

        let mut next = self.clone();
        next.stage_history.push(StageName::Complete);
        next.completed_at = Some(at);
        next
    }

    pub fn input(&self) -> &TicketInput {
        &self.input
    }

    pub fn derived(&self) -> &DerivedFields {
        &self.derived
    }

    pub fn stage_history(&self) -> &[StageName] {
        &self.stage_history
    }

    pub fn invocations(&self) -> &[AbilityInvocationRecord] {
        &self.invocations
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    /// The escalation decision, once DECIDE has run
    pub fn escalated(&self) -> Option<bool> {
        self.derived.escalation.as_ref().map(|d| d.escalate)
    }

    /// Project the sealed record into the terminal payload
    pub fn render_payload(&self) -> Result<TerminalPayload, WorkflowError> {
        let completed_at = self.completed_at.ok_or(WorkflowError::NotComplete)?;
        let derived = &self.derived;
        let escalation = derived.escalation.as_ref();

        Ok(TerminalPayload {
            ticket_id: self.input.ticket_id.clone(),
            customer_name: self.input.customer_name.clone(),
            email: self.input.email.clone(),
            original_query: self.input.query.clone(),
            priority: self.input.priority.clone(),
            resolution_status: derived.ticket_status.unwrap_or(TicketStatus::Open),
            escalated: escalation.map(|d| d.escalate).unwrap_or(false),
            escalation_reason: escalation.and_then(|d| d.reason.clone()),
            generated_response: derived.generated_response.clone(),
            stage_history: self.stage_history.clone(),
            processing_summary: ProcessingSummary {
                parsed_request: derived.parsed_request.clone(),
                extracted_entities: derived.extracted_entities.clone(),
                knowledge_base_matches: derived.knowledge_base_matches.as_ref().map_or(0, Vec::len),
                solution_scores: derived.solution_scores.clone().unwrap_or_default(),
                api_calls: derived.api_calls.as_ref().map_or(0, Vec::len),
                notifications: derived.notifications.as_ref().map_or(0, Vec::len),
            },
            completed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::input::TicketRequest;
    use serde_json::json;

    fn record() -> StateRecord {
        let input = TicketRequest::new("Ada", "ada@example.com", "login fails", "high", "T-1")
            .validate()
            .unwrap();
        StateRecord::new(input)
    }

    #[test]
    fn test_additions_return_new_record() {
        let original = record();
        let next = original
            .with_additions(DerivedFields {
                parsed_request: Some(json!({"intent": "support_request"})),
                ..Default::default()
            })
            .unwrap();

        assert!(original.derived().parsed_request.is_none());
        assert!(next.derived().parsed_request.is_some());
    }

    #[test]
    fn test_overwrite_is_state_conflict() {
        let state = record()
            .with_additions(DerivedFields {
                generated_response: Some("hello".to_string()),
                ..Default::default()
            })
            .unwrap();

        let result = state.with_additions(DerivedFields {
            generated_response: Some("again".to_string()),
            ..Default::default()
        });

        assert!(matches!(
            result,
            Err(WorkflowError::StateConflict { field: "generated_response" })
        ));
    }

    #[test]
    fn test_sealed_record_rejects_additions() {
        let sealed = record().seal(Utc::now());
        let result = sealed.with_additions(DerivedFields {
            flags: Some(json!({})),
            ..Default::default()
        });
        assert!(matches!(result, Err(WorkflowError::StateConflict { .. })));
        assert!(sealed.record_stage(StageName::Do, StageTrail::default()).is_err());
    }

    #[test]
    fn test_seal_is_idempotent() {
        let at = Utc::now();
        let sealed = record().seal(at);
        let resealed = sealed.seal(Utc::now());

        assert_eq!(resealed.stage_history(), &[StageName::Complete]);
        assert_eq!(resealed.completed_at(), Some(at));
    }

    #[test]
    fn test_payload_requires_completion() {
        assert!(matches!(
            record().render_payload(),
            Err(WorkflowError::NotComplete)
        ));
    }

    #[test]
    fn test_payload_defaults_for_unset_fields() {
        let payload = record().seal(Utc::now()).render_payload().unwrap();

        assert_eq!(payload.resolution_status, TicketStatus::Open);
        assert!(!payload.escalated);
        assert_eq!(payload.processing_summary.knowledge_base_matches, 0);
        assert_eq!(payload.processing_summary.api_calls, 0);
        assert_eq!(payload.original_query, "login fails");
    }
}
