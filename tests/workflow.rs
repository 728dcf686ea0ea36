//! Workflow Integration Tests
//!
//! End-to-end runs over the simulated backend: both branches of DECIDE,
//! input validation, stage history shape, and the terminal payload.

use std::sync::Arc;

use triage::abilities::{
    AbilityProvider, CallTimeouts, KnowledgeArticle, ProviderSettings, RetryPolicy,
    SimulatedBackend,
};
use triage::core::graph::{self, CONTINUE_PATH, MAIN_LINE};
use triage::core::{MemoryCheckpointStore, Orchestrator};
use triage::domain::{AuditOutcome, Edge, RunId, StageName, TicketRequest, TicketStatus};
use triage::error::ErrorKind;

fn fast_settings() -> ProviderSettings {
    ProviderSettings {
        retry: RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        },
        timeouts: CallTimeouts {
            internal_ms: 1_000,
            external_ms: 1_000,
        },
    }
}

fn orchestrator_with_relevance(relevance: f64) -> Orchestrator {
    let backend = SimulatedBackend::new().with_knowledge_base(vec![KnowledgeArticle::new(
        "KB-001",
        "Login Issues Troubleshooting",
        relevance,
        &["Clear browser cache", "Reset password"],
    )]);
    Orchestrator::new(
        AbilityProvider::with_backend(Arc::new(backend), fast_settings()),
        Arc::new(MemoryCheckpointStore::new()),
    )
}

fn request() -> TicketRequest {
    TicketRequest::new(
        "John Smith",
        "john.smith@example.com",
        "I can't log into my account",
        "high",
        "TICKET-2024-001",
    )
}

#[tokio::test]
async fn test_high_score_resolves_automatically() {
    let orchestrator = orchestrator_with_relevance(0.95);
    let report = orchestrator.run(&request(), None).await.unwrap();
    let payload = &report.payload;

    assert!(!payload.escalated);
    assert_eq!(payload.escalation_reason, None);
    assert_eq!(payload.resolution_status, TicketStatus::Closed);
    assert_eq!(payload.processing_summary.solution_scores[0].score, 95);

    let mut expected: Vec<StageName> = MAIN_LINE.to_vec();
    expected.extend(CONTINUE_PATH);
    assert_eq!(payload.stage_history, expected);
    assert_eq!(payload.stage_history.len(), 11);

    let response = payload.generated_response.as_deref().unwrap();
    assert!(response.starts_with("Dear John Smith,"));
    assert!(response.contains("Reset password"));

    assert_eq!(payload.processing_summary.api_calls, 2);
    assert_eq!(payload.processing_summary.notifications, 1);
    assert!(report.state.errors().is_empty());
}

#[tokio::test]
async fn test_low_score_escalates() {
    let orchestrator = orchestrator_with_relevance(0.60);
    let report = orchestrator.run(&request(), None).await.unwrap();
    let payload = &report.payload;

    assert!(payload.escalated);
    assert_eq!(payload.resolution_status, TicketStatus::Escalated);
    assert!(payload
        .escalation_reason
        .as_deref()
        .unwrap()
        .contains("60"));
    assert!(payload.generated_response.is_none());

    let mut expected: Vec<StageName> = MAIN_LINE.to_vec();
    expected.push(StageName::Complete);
    assert_eq!(payload.stage_history, expected);

    // no UPDATE/CREATE/DO abilities ran
    let abilities: Vec<&str> = report
        .state
        .invocations()
        .iter()
        .map(|r| r.ability.as_str())
        .collect();
    for skipped in ["update_ticket", "close_ticket", "response_generation", "execute_api_calls"] {
        assert!(!abilities.contains(&skipped), "{} should not run", skipped);
    }

    let decide = report
        .audit
        .transitions()
        .find(|e| e.stage == StageName::Decide)
        .unwrap();
    assert_eq!(decide.edge, Some(Edge::Escalate));
}

#[tokio::test]
async fn test_threshold_boundary_scores() {
    for (relevance, escalated) in [(0.90, false), (0.89, true), (1.0, false), (0.0, true)] {
        let report = orchestrator_with_relevance(relevance)
            .run(&request(), None)
            .await
            .unwrap();
        assert_eq!(report.payload.escalated, escalated, "relevance {}", relevance);
        assert!(graph::is_valid_history(&report.payload.stage_history));
    }
}

#[tokio::test]
async fn test_missing_ticket_id_makes_no_calls() {
    let orchestrator = orchestrator_with_relevance(0.95);
    let mut req = request();
    req.ticket_id = None;

    let failure = orchestrator
        .run(&req, Some(RunId::from("invalid")))
        .await
        .unwrap_err();

    assert_eq!(failure.kind, ErrorKind::Validation);
    assert_eq!(failure.stage, StageName::Intake);
    assert!(failure.partial_state.is_none());
    assert!(failure.audit.entries().iter().all(|e| e.ability.is_none()));
    assert_eq!(failure.audit.entries()[0].outcome, AuditOutcome::Aborted);
    assert!(orchestrator
        .checkpoints(&RunId::from("invalid"))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_validation_lists_every_blank_field() {
    let mut req = request();
    req.email = Some("   ".to_string());
    req.priority = None;

    let failure = orchestrator_with_relevance(0.95).run(&req, None).await.unwrap_err();
    let message = failure.error.to_string();
    assert!(message.contains("email"));
    assert!(message.contains("priority"));
}

#[tokio::test]
async fn test_customer_answer_passes_through_wait() {
    let req = request().with_customer_answer("Since Monday, error code 401");
    let report = orchestrator_with_relevance(0.95).run(&req, None).await.unwrap();

    assert_eq!(
        report.state.derived().customer_answer.as_deref(),
        Some("Since Monday, error code 401")
    );
}

#[tokio::test]
async fn test_payload_field_names_are_exact() {
    let report = orchestrator_with_relevance(0.95)
        .run(&request(), None)
        .await
        .unwrap();
    let json = serde_json::to_value(&report.payload).unwrap();

    let mut keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(
        keys,
        vec![
            "completed_at",
            "customer_name",
            "email",
            "escalated",
            "escalation_reason",
            "generated_response",
            "original_query",
            "priority",
            "processing_summary",
            "resolution_status",
            "stage_history",
            "ticket_id",
        ]
    );
    assert_eq!(json["resolution_status"], "closed");
    assert_eq!(json["stage_history"][0], "INTAKE");
    assert_eq!(json["original_query"], "I can't log into my account");
}

#[tokio::test]
async fn test_audit_covers_every_attempt_and_transition() {
    let report = orchestrator_with_relevance(0.95)
        .run(&request(), None)
        .await
        .unwrap();

    let ability_entries = report
        .audit
        .entries()
        .iter()
        .filter(|e| e.ability.is_some())
        .count();
    assert_eq!(ability_entries, report.state.invocations().len());
    assert_eq!(
        report.audit.transitions().count(),
        report.payload.stage_history.len()
    );

    let jsonl = report.audit.to_jsonl().unwrap();
    assert_eq!(jsonl.lines().count(), report.audit.len());
}

#[tokio::test]
async fn test_invocation_order_follows_stages() {
    let report = orchestrator_with_relevance(0.95)
        .run(&request(), None)
        .await
        .unwrap();

    let abilities: Vec<&str> = report
        .state
        .invocations()
        .iter()
        .map(|r| r.ability.as_str())
        .collect();
    assert_eq!(
        abilities,
        vec![
            "parse_request_text",
            "extract_entities",
            "normalize_fields",
            "enrich_records",
            "add_flags_calculations",
            "clarify_question",
            "extract_answer",
            "knowledge_base_search",
            "solution_evaluation",
            "escalation_decision",
            "update_ticket",
            "close_ticket",
            "response_generation",
            "execute_api_calls",
            "trigger_notifications",
        ]
    );
    assert!(report
        .state
        .invocations()
        .iter()
        .all(|r| r.request_digest.len() == 16));
}
