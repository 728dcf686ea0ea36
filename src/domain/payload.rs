//! Terminal payload produced by COMPLETE.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::stage::StageName;
use super::state::{SolutionScore, TicketStatus};

/// Final output of a run. Field names are part of the external contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalPayload {
    pub ticket_id: String,
    pub customer_name: String,
    pub email: String,
    pub original_query: String,
    pub priority: String,
    pub resolution_status: TicketStatus,
    pub escalated: bool,
    pub escalation_reason: Option<String>,
    pub generated_response: Option<String>,
    pub stage_history: Vec<StageName>,
    pub processing_summary: ProcessingSummary,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub parsed_request: Option<Value>,
    pub extracted_entities: Option<Value>,
    pub knowledge_base_matches: usize,
    pub solution_scores: Vec<SolutionScore>,
    pub api_calls: usize,
    pub notifications: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_field_names() {
        let payload = TerminalPayload {
            ticket_id: "T-1".to_string(),
            customer_name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            original_query: "help".to_string(),
            priority: "low".to_string(),
            resolution_status: TicketStatus::InProgress,
            escalated: false,
            escalation_reason: None,
            generated_response: None,
            stage_history: vec![StageName::Intake, StageName::Complete],
            processing_summary: ProcessingSummary {
                parsed_request: None,
                extracted_entities: None,
                knowledge_base_matches: 0,
                solution_scores: Vec::new(),
                api_calls: 0,
                notifications: 0,
            },
            completed_at: Utc::now(),
        };

        let json = serde_json::to_value(&payload).unwrap();
        let object = json.as_object().unwrap();

        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
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
        assert_eq!(json["resolution_status"], "in_progress");
        assert_eq!(json["stage_history"][1], "COMPLETE");
        assert!(json["escalation_reason"].is_null());
    }
}
