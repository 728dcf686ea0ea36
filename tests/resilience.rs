//! Resilience Integration Tests
//!
//! Retry exhaustion on critical and non-critical abilities, timeouts,
//! cancellation between stages, and isolation of concurrent runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use triage::abilities::{
    Ability, AbilityBackend, AbilityProvider, CallTimeouts, Fault, FaultPlan, KnowledgeArticle,
    ProviderSettings, RetryPolicy, SimulatedBackend,
};
use triage::core::{CancelFlag, MemoryCheckpointStore, Orchestrator};
use triage::domain::{RunId, StageName, TicketRequest};
use triage::error::{AbilityError, AbilityErrorKind, ErrorKind};

fn settings(max_attempts: u32, external_ms: u64) -> ProviderSettings {
    ProviderSettings {
        retry: RetryPolicy {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        },
        timeouts: CallTimeouts {
            internal_ms: 1_000,
            external_ms,
        },
    }
}

fn faulty_orchestrator(faults: FaultPlan, settings: ProviderSettings) -> Orchestrator {
    let backend = SimulatedBackend::new().with_faults(faults);
    Orchestrator::new(
        AbilityProvider::with_backend(Arc::new(backend), settings),
        Arc::new(MemoryCheckpointStore::new()),
    )
}

fn request(ticket_id: &str) -> TicketRequest {
    TicketRequest::new(
        "Jane Doe",
        "jane@example.com",
        "I was charged twice on my invoice",
        "medium",
        ticket_id,
    )
}

#[tokio::test]
async fn test_critical_exhaustion_aborts_with_partial_state() {
    let orchestrator = faulty_orchestrator(
        FaultPlan::new().with(Ability::KnowledgeBaseSearch, Fault::AlwaysTransient),
        settings(3, 1_000),
    );

    let failure = orchestrator
        .run(&request("T-100"), Some(RunId::from("kb-down")))
        .await
        .unwrap_err();

    assert_eq!(failure.stage, StageName::Retrieve);
    assert_eq!(failure.kind, ErrorKind::StageFailed);
    assert_eq!(failure.error.root_kind(), ErrorKind::ExternalUnavailable);
    assert_eq!(
        failure.stage_history,
        vec![
            StageName::Intake,
            StageName::Understand,
            StageName::Prepare,
            StageName::Ask,
            StageName::Wait,
        ]
    );

    let partial = failure.partial_state.as_ref().unwrap();
    let attempts: Vec<_> = partial
        .invocations()
        .iter()
        .filter(|r| r.ability == "knowledge_base_search")
        .collect();
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|r| !r.success));
    assert_eq!(attempts.iter().map(|r| r.attempt).collect::<Vec<_>>(), vec![1, 2, 3]);

    // the failed stage is not checkpointed
    let checkpoints = orchestrator.checkpoints(&failure.run_id).await.unwrap();
    assert_eq!(checkpoints.len(), failure.stage_history.len());
    assert_eq!(checkpoints.last().unwrap().stage, StageName::Wait);

    let descriptor = serde_json::to_value(failure.descriptor()).unwrap();
    assert_eq!(descriptor["stage"], "RETRIEVE");
    assert_eq!(descriptor["root_kind"], "external_unavailable");
}

#[tokio::test]
async fn test_non_critical_exhaustion_continues() {
    let orchestrator = faulty_orchestrator(
        FaultPlan::new().with(Ability::TriggerNotifications, Fault::AlwaysTransient),
        settings(3, 1_000),
    );

    let report = orchestrator.run(&request("T-101"), None).await.unwrap();

    assert_eq!(report.payload.stage_history.len(), 11);
    assert_eq!(report.payload.processing_summary.notifications, 0);
    assert_eq!(report.payload.processing_summary.api_calls, 2);

    let errors = report.state.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].stage, StageName::Do);
    assert_eq!(errors[0].ability.as_deref(), Some("trigger_notifications"));
    assert_eq!(errors[0].kind, ErrorKind::ExternalUnavailable);

    let attempts = report
        .state
        .invocations()
        .iter()
        .filter(|r| r.ability == "trigger_notifications")
        .count();
    assert_eq!(attempts, 3);
}

#[tokio::test]
async fn test_transient_failures_recover_within_budget() {
    let orchestrator = faulty_orchestrator(
        FaultPlan::new().with(Ability::UpdateTicket, Fault::TransientTimes(2)),
        settings(3, 1_000),
    );

    let report = orchestrator.run(&request("T-102"), None).await.unwrap();

    let attempts: Vec<bool> = report
        .state
        .invocations()
        .iter()
        .filter(|r| r.ability == "update_ticket")
        .map(|r| r.success)
        .collect();
    assert_eq!(attempts, vec![false, false, true]);
    assert!(report.state.errors().is_empty());
}

#[tokio::test]
async fn test_external_timeout_is_retried_then_recorded() {
    let orchestrator = faulty_orchestrator(
        FaultPlan::new().with(
            Ability::ExtractEntities,
            Fault::Delay(Duration::from_millis(300)),
        ),
        settings(2, 30),
    );

    let report = orchestrator.run(&request("T-103"), None).await.unwrap();

    assert!(report.payload.processing_summary.extracted_entities.is_none());
    let timeouts: Vec<_> = report
        .state
        .invocations()
        .iter()
        .filter(|r| r.ability == "extract_entities")
        .collect();
    assert_eq!(timeouts.len(), 2);
    assert!(timeouts
        .iter()
        .all(|r| r.error_kind == Some(AbilityErrorKind::Timeout)));
}

#[tokio::test]
async fn test_internal_validation_failure_is_fatal() {
    let orchestrator = faulty_orchestrator(
        FaultPlan::new().with(Ability::ResponseGeneration, Fault::Validation),
        settings(3, 1_000),
    );

    let failure = orchestrator.run(&request("T-104"), None).await.unwrap_err();
    assert_eq!(failure.stage, StageName::Create);
    assert_eq!(failure.error.root_kind(), ErrorKind::AbilityValidation);
}

/// Simulated backend that answers one ability with a fixed response
struct CannedBackend {
    inner: SimulatedBackend,
    ability: Ability,
    response: Value,
}

#[async_trait]
impl AbilityBackend for CannedBackend {
    fn name(&self) -> &str {
        "canned"
    }

    async fn call(&self, ability: Ability, request: &Value) -> Result<Value, AbilityError> {
        if ability == self.ability {
            return Ok(self.response.clone());
        }
        self.inner.call(ability, request).await
    }
}

#[tokio::test]
async fn test_empty_parse_response_fails_understand() {
    let backend = CannedBackend {
        inner: SimulatedBackend::new(),
        ability: Ability::ParseRequestText,
        response: json!({}),
    };
    let orchestrator = Orchestrator::new(
        AbilityProvider::with_backend(Arc::new(backend), settings(3, 1_000)),
        Arc::new(MemoryCheckpointStore::new()),
    );

    let failure = orchestrator.run(&request("T-106"), None).await.unwrap_err();

    assert_eq!(failure.stage, StageName::Understand);
    assert_eq!(failure.kind, ErrorKind::StageFailed);
    assert_eq!(failure.error.root_kind(), ErrorKind::AbilityValidation);
    assert_eq!(failure.stage_history, vec![StageName::Intake]);
    assert!(failure
        .partial_state
        .as_ref()
        .unwrap()
        .derived()
        .parsed_request
        .is_none());
}

/// Simulated backend that raises a cancel flag when one ability is served
struct CancellingBackend {
    inner: SimulatedBackend,
    trigger: Ability,
    cancel: CancelFlag,
}

#[async_trait]
impl AbilityBackend for CancellingBackend {
    fn name(&self) -> &str {
        "cancelling"
    }

    async fn call(&self, ability: Ability, request: &Value) -> Result<Value, AbilityError> {
        if ability == self.trigger {
            self.cancel.cancel();
        }
        self.inner.call(ability, request).await
    }
}

#[tokio::test]
async fn test_cancellation_stops_at_stage_boundary() {
    let cancel = CancelFlag::new();
    let backend = CancellingBackend {
        inner: SimulatedBackend::new(),
        trigger: Ability::KnowledgeBaseSearch,
        cancel: cancel.clone(),
    };
    let orchestrator = Orchestrator::new(
        AbilityProvider::with_backend(Arc::new(backend), settings(3, 1_000)),
        Arc::new(MemoryCheckpointStore::new()),
    );

    let failure = orchestrator
        .run_with_cancel(&request("T-105"), None, &cancel)
        .await
        .unwrap_err();

    // RETRIEVE finishes; DECIDE never starts
    assert_eq!(failure.kind, ErrorKind::Cancelled);
    assert_eq!(failure.stage, StageName::Decide);
    assert_eq!(failure.stage_history.last(), Some(&StageName::Retrieve));

    let latest = orchestrator.checkpoints(&failure.run_id).await.unwrap();
    let last = latest.last().unwrap();
    assert_eq!(last.stage, StageName::Retrieve);
    assert!(last.state.derived().knowledge_base_matches.is_some());
    assert!(last.state.derived().solution_scores.is_none());
}

#[tokio::test]
async fn test_cancellation_on_escalate_edge_skips_handoff() {
    let cancel = CancelFlag::new();
    let inner = SimulatedBackend::new().with_knowledge_base(vec![KnowledgeArticle::new(
        "KB-001",
        "Login Issues Troubleshooting",
        0.60,
        &["Reset password"],
    )]);
    let backend = CancellingBackend {
        inner,
        trigger: Ability::EscalationDecision,
        cancel: cancel.clone(),
    };
    let orchestrator = Orchestrator::new(
        AbilityProvider::with_backend(Arc::new(backend), settings(3, 1_000)),
        Arc::new(MemoryCheckpointStore::new()),
    );

    let failure = orchestrator
        .run_with_cancel(&request("T-107"), None, &cancel)
        .await
        .unwrap_err();

    assert_eq!(failure.kind, ErrorKind::Cancelled);
    assert_eq!(failure.stage, StageName::Complete);
    assert_eq!(failure.stage_history.last(), Some(&StageName::Decide));

    // the hand-off belongs to the escalate transition, which never happened
    let partial = failure.partial_state.as_ref().unwrap();
    assert!(partial.derived().ticket_status.is_none());
    assert!(partial.derived().ticket_updates.is_none());

    let checkpoints = orchestrator.checkpoints(&failure.run_id).await.unwrap();
    assert_eq!(checkpoints.last().unwrap().stage, StageName::Decide);
}

#[tokio::test]
async fn test_concurrent_runs_are_isolated() {
    let orchestrator = Arc::new(faulty_orchestrator(FaultPlan::new(), settings(3, 1_000)));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                let run_id = RunId::from(format!("run-{}", i));
                orchestrator
                    .run(&request(&format!("T-2{:02}", i)), Some(run_id))
                    .await
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.payload.ticket_id, format!("T-2{:02}", i));

        let checkpoints = orchestrator.checkpoints(&report.run_id).await.unwrap();
        assert_eq!(checkpoints.len(), 11);
        assert!(checkpoints
            .iter()
            .all(|c| c.state.input().ticket_id == report.payload.ticket_id));
        assert!(checkpoints.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }
}
