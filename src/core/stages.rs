//! Stage implementations.
//!
//! Each stage reads the current [`StateRecord`], issues its ability calls in
//! a fixed order through a [`StageContext`], and returns a new record holding
//! only its own additions. Bookkeeping (stage history, invocation and error
//! logs) is appended by the orchestrator from the context's trail.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::abilities::{Ability, AbilityProvider};
use crate::domain::{
    DerivedFields, ErrorRecord, EscalationDecision, SolutionScore, StageName, StageTrail,
    StateRecord, TicketRequest, TicketStatus,
};
use crate::error::{AbilityError, WorkflowError};

/// Best solution score at or above which a request is resolved automatically
pub const ESCALATION_THRESHOLD: u8 = 90;

/// Per-stage handle on the ability provider that collects the stage's trail
pub struct StageContext<'a> {
    stage: StageName,
    provider: &'a AbilityProvider,
    trail: StageTrail,
}

impl<'a> StageContext<'a> {
    pub fn new(stage: StageName, provider: &'a AbilityProvider) -> Self {
        Self {
            stage,
            provider,
            trail: StageTrail::default(),
        }
    }

    pub fn stage(&self) -> StageName {
        self.stage
    }

    pub fn trail(&self) -> &StageTrail {
        &self.trail
    }

    pub fn into_trail(self) -> StageTrail {
        self.trail
    }

    async fn invoke(&mut self, ability: Ability, request: Value) -> Result<Value, WorkflowError> {
        self.provider
            .invoke(
                self.stage,
                ability.server(),
                ability.name(),
                request,
                &mut self.trail.invocations,
            )
            .await
    }

    /// Invoke `ability` and take `key` out of its response.
    ///
    /// An absent or `null` field is a validation failure of the ability.
    async fn call<T: DeserializeOwned>(
        &mut self,
        ability: Ability,
        request: Value,
        key: &'static str,
    ) -> Result<T, WorkflowError> {
        let mut response = self.invoke(ability, request).await?;
        match response.get_mut(key).map(Value::take) {
            None | Some(Value::Null) => Err(AbilityError::validation(
                ability.name(),
                format!("missing response field '{}'", key),
            )
            .into()),
            Some(value) => decode(ability, key, value),
        }
    }

    fn critical<T>(&self, result: Result<T, WorkflowError>) -> Result<T, WorkflowError> {
        result.map_err(|e| match e {
            WorkflowError::Ability(_) => WorkflowError::stage_failed(self.stage, e),
            other => other,
        })
    }

    /// Call an ability the stage cannot proceed without.
    ///
    /// Ability failures, and responses whose `key` is absent, `null`, or
    /// does not decode as `T`, become `StageFailed` for this stage.
    pub async fn require<T: DeserializeOwned>(
        &mut self,
        ability: Ability,
        request: Value,
        key: &'static str,
    ) -> Result<T, WorkflowError> {
        let result = self.call(ability, request, key).await;
        self.critical(result)
    }

    /// Like [`require`](Self::require), but hands back the whole response object
    pub async fn require_response(&mut self, ability: Ability, request: Value) -> Result<Value, WorkflowError> {
        let result = self.invoke(ability, request).await;
        self.critical(result)
    }

    /// Call an ability whose failure the stage tolerates.
    ///
    /// Ability failures, including a missing response field, are recorded in
    /// the trail's error log and yield `None`.
    pub async fn optional<T: DeserializeOwned>(
        &mut self,
        ability: Ability,
        request: Value,
        key: &'static str,
    ) -> Result<Option<T>, WorkflowError> {
        match self.call(ability, request, key).await {
            Ok(value) => Ok(Some(value)),
            Err(e @ WorkflowError::Ability(_)) => {
                warn!(stage = %self.stage, %ability, error = %e, "Non-critical ability failed, continuing");
                self.trail
                    .errors
                    .push(ErrorRecord::new(self.stage, Some(ability.name()), &e));
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn decode<T: DeserializeOwned>(ability: Ability, key: &str, value: Value) -> Result<T, WorkflowError> {
    serde_json::from_value(value).map_err(|e| {
        AbilityError::validation(
            ability.name(),
            format!("response field '{}' is malformed: {}", key, e),
        )
        .into()
    })
}

/// INTAKE: validate the request and create the run's record
pub fn intake(request: &TicketRequest) -> Result<StateRecord, WorkflowError> {
    let input = request.validate()?;
    debug!(ticket_id = %input.ticket_id, priority = %input.priority, "Accepted ticket");
    Ok(StateRecord::new(input))
}

/// COMPLETE: seal the record. Replaying on a sealed record changes nothing.
pub fn complete(state: &StateRecord, at: DateTime<Utc>) -> StateRecord {
    state.seal(at)
}

/// Fallback applied on the escalate edge before COMPLETE
pub fn escalation_handoff(state: &StateRecord) -> Result<StateRecord, WorkflowError> {
    state.with_additions(DerivedFields {
        ticket_status: Some(TicketStatus::Escalated),
        ticket_updates: Some(json!({
            "status": "escalated",
            "assigned_queue": "human_support",
            "resolution_notes": "Escalated, pending human review",
        })),
        ..Default::default()
    })
}

/// Apply the escalation policy to a set of solution scores
pub fn decide_escalation(scores: &[SolutionScore]) -> EscalationDecision {
    let best = scores.iter().map(|s| s.score).max();
    match best {
        Some(best) if best >= ESCALATION_THRESHOLD => EscalationDecision {
            escalate: false,
            reason: None,
            best_score: Some(best),
        },
        Some(best) => EscalationDecision {
            escalate: true,
            reason: Some(format!(
                "Best solution score {} is below the automation threshold of {}",
                best, ESCALATION_THRESHOLD
            )),
            best_score: Some(best),
        },
        None => EscalationDecision {
            escalate: true,
            reason: Some("No candidate solutions found".to_string()),
            best_score: None,
        },
    }
}

/// Run one stage against `state`.
///
/// INTAKE cannot run on an existing record (`StateConflict`); COMPLETE
/// seals the record with the current time.
#[instrument(skip_all, fields(stage = %stage))]
pub async fn run_stage(
    stage: StageName,
    state: &StateRecord,
    ctx: &mut StageContext<'_>,
) -> Result<StateRecord, WorkflowError> {
    match stage {
        StageName::Intake => Err(WorkflowError::StateConflict { field: "input" }),
        StageName::Understand => understand(state, ctx).await,
        StageName::Prepare => prepare(state, ctx).await,
        StageName::Ask => ask(state, ctx).await,
        StageName::Wait => wait(state, ctx).await,
        StageName::Retrieve => retrieve(state, ctx).await,
        StageName::Decide => decide(state, ctx).await,
        StageName::Update => update(state, ctx).await,
        StageName::Create => create(state, ctx).await,
        StageName::Do => act(state, ctx).await,
        StageName::Complete => Ok(complete(state, Utc::now())),
    }
}

async fn understand(state: &StateRecord, ctx: &mut StageContext<'_>) -> Result<StateRecord, WorkflowError> {
    let input = state.input();

    let parsed_request: Value = ctx
        .require(
            Ability::ParseRequestText,
            json!({"query": input.query, "ticket_id": input.ticket_id}),
            "parsed_request",
        )
        .await?;

    let extracted_entities: Option<Value> = ctx
        .optional(
            Ability::ExtractEntities,
            json!({"query": input.query, "parsed_request": parsed_request}),
            "extracted_entities",
        )
        .await?;

    state.with_additions(DerivedFields {
        parsed_request: Some(parsed_request),
        extracted_entities,
        ..Default::default()
    })
}

async fn prepare(state: &StateRecord, ctx: &mut StageContext<'_>) -> Result<StateRecord, WorkflowError> {
    let input = state.input();

    let normalized_fields: Value = ctx
        .require(
            Ability::NormalizeFields,
            json!({"ticket_id": input.ticket_id, "priority": input.priority, "email": input.email}),
            "normalized_fields",
        )
        .await?;

    let enrichment: Option<Value> = ctx
        .optional(
            Ability::EnrichRecords,
            json!({"ticket_id": input.ticket_id, "email": input.email}),
            "enriched_records",
        )
        .await?;

    let flags: Option<Value> = ctx
        .optional(
            Ability::AddFlagsCalculations,
            json!({"priority": input.priority, "enriched_records": enrichment}),
            "flags_calculations",
        )
        .await?;

    state.with_additions(DerivedFields {
        normalized_fields: Some(normalized_fields),
        enrichment,
        flags,
        ..Default::default()
    })
}

async fn ask(state: &StateRecord, ctx: &mut StageContext<'_>) -> Result<StateRecord, WorkflowError> {
    let clarification_question: Option<String> = ctx
        .optional(
            Ability::ClarifyQuestion,
            json!({
                "query": state.input().query,
                "parsed_request": state.derived().parsed_request,
            }),
            "clarification_question",
        )
        .await?;

    state.with_additions(DerivedFields {
        clarification_question,
        ..Default::default()
    })
}

async fn wait(state: &StateRecord, ctx: &mut StageContext<'_>) -> Result<StateRecord, WorkflowError> {
    let customer_answer: Option<String> = ctx
        .optional(
            Ability::ExtractAnswer,
            json!({
                "clarification_question": state.derived().clarification_question,
                "customer_answer": state.input().customer_answer,
            }),
            "customer_answer",
        )
        .await?;

    state.with_additions(DerivedFields {
        customer_answer,
        ..Default::default()
    })
}

async fn retrieve(state: &StateRecord, ctx: &mut StageContext<'_>) -> Result<StateRecord, WorkflowError> {
    let derived = state.derived();

    let matches: Vec<Value> = ctx
        .require(
            Ability::KnowledgeBaseSearch,
            json!({
                "query": state.input().query,
                "extracted_entities": derived.extracted_entities,
                "customer_answer": derived.customer_answer,
            }),
            "knowledge_base_results",
        )
        .await?;

    state.with_additions(DerivedFields {
        knowledge_base_matches: Some(matches),
        ..Default::default()
    })
}

async fn decide(state: &StateRecord, ctx: &mut StageContext<'_>) -> Result<StateRecord, WorkflowError> {
    let stage = ctx.stage();
    let matches = state.derived().knowledge_base_matches.as_ref().ok_or_else(|| {
        WorkflowError::stage_failed(
            stage,
            WorkflowError::MissingOutput {
                field: "knowledge_base_matches",
            },
        )
    })?;

    let scores: Vec<SolutionScore> = ctx
        .require(
            Ability::SolutionEvaluation,
            json!({"knowledge_base_results": matches}),
            "solution_scores",
        )
        .await?;

    if let Some(bad) = scores
        .iter()
        .find(|s| s.score > 100 || !(0.0..=1.0).contains(&s.confidence))
    {
        return Err(WorkflowError::stage_failed(
            stage,
            AbilityError::validation(
                Ability::SolutionEvaluation.name(),
                format!(
                    "score out of range for '{}': score {}, confidence {}",
                    bad.solution, bad.score, bad.confidence
                ),
            )
            .into(),
        ));
    }

    let mut decision = decide_escalation(&scores);

    let response = ctx
        .require_response(
            Ability::EscalationDecision,
            json!({
                "solution_scores": scores,
                "best_score": decision.best_score,
                "escalate": decision.escalate,
            }),
        )
        .await?;

    let Some(registered) = response.get("escalation_decision").and_then(Value::as_bool) else {
        return Err(WorkflowError::stage_failed(
            stage,
            AbilityError::validation(
                Ability::EscalationDecision.name(),
                "missing response field 'escalation_decision'",
            )
            .into(),
        ));
    };
    if registered != decision.escalate {
        warn!(registered, escalate = decision.escalate, "Escalation ability disagrees with policy, keeping policy");
    }

    if decision.escalate {
        let reason = response.get("escalation_reason").and_then(Value::as_str);
        if let Some(reason) = reason.filter(|r| !r.is_empty()) {
            decision.reason = Some(reason.to_string());
        }
    }

    debug!(
        best_score = ?decision.best_score,
        escalate = decision.escalate,
        "Escalation decided"
    );

    state.with_additions(DerivedFields {
        solution_scores: Some(scores),
        escalation: Some(decision),
        ..Default::default()
    })
}

async fn update(state: &StateRecord, ctx: &mut StageContext<'_>) -> Result<StateRecord, WorkflowError> {
    let stage = ctx.stage();
    let ticket_id = state.input().ticket_id.clone();
    let escalated = state.escalated().ok_or_else(|| {
        WorkflowError::stage_failed(stage, WorkflowError::MissingOutput { field: "escalation" })
    })?;

    let ticket_updates: Value = ctx
        .require(
            Ability::UpdateTicket,
            json!({"ticket_id": ticket_id, "escalated": escalated}),
            "ticket_updates",
        )
        .await?;

    let ticket_status = if escalated {
        TicketStatus::Escalated
    } else {
        ctx.optional::<TicketStatus>(
            Ability::CloseTicket,
            json!({"ticket_id": ticket_id}),
            "ticket_status",
        )
        .await?
        .unwrap_or(TicketStatus::InProgress)
    };

    state.with_additions(DerivedFields {
        ticket_updates: Some(ticket_updates),
        ticket_status: Some(ticket_status),
        ..Default::default()
    })
}

async fn create(state: &StateRecord, ctx: &mut StageContext<'_>) -> Result<StateRecord, WorkflowError> {
    let input = state.input();
    let derived = state.derived();

    let generated_response: String = ctx
        .require(
            Ability::ResponseGeneration,
            json!({
                "customer_name": input.customer_name,
                "query": input.query,
                "customer_answer": derived.customer_answer,
                "knowledge_base_results": derived.knowledge_base_matches,
                "solution_scores": derived.solution_scores,
            }),
            "generated_response",
        )
        .await?;

    state.with_additions(DerivedFields {
        generated_response: Some(generated_response),
        ..Default::default()
    })
}

async fn act(state: &StateRecord, ctx: &mut StageContext<'_>) -> Result<StateRecord, WorkflowError> {
    let input = state.input();

    let api_calls: Option<Vec<Value>> = ctx
        .optional(
            Ability::ExecuteApiCalls,
            json!({"ticket_id": input.ticket_id, "ticket_status": state.derived().ticket_status}),
            "api_calls_executed",
        )
        .await?;

    let notifications: Option<Vec<Value>> = ctx
        .optional(
            Ability::TriggerNotifications,
            json!({"ticket_id": input.ticket_id, "email": input.email}),
            "notifications_sent",
        )
        .await?;

    state.with_additions(DerivedFields {
        api_calls,
        notifications,
        ..Default::default()
    })
}
