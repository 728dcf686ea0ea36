//! Run input: the raw request and its validated form.

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

/// Caller-supplied request, as received (fields may be missing)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketRequest {
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub ticket_id: Option<String>,

    /// Answer to the clarification question, if already known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_answer: Option<String>,
}

impl TicketRequest {
    /// Build a complete request
    pub fn new(
        customer_name: impl Into<String>,
        email: impl Into<String>,
        query: impl Into<String>,
        priority: impl Into<String>,
        ticket_id: impl Into<String>,
    ) -> Self {
        Self {
            customer_name: Some(customer_name.into()),
            email: Some(email.into()),
            query: Some(query.into()),
            priority: Some(priority.into()),
            ticket_id: Some(ticket_id.into()),
            customer_answer: None,
        }
    }

    pub fn with_customer_answer(mut self, answer: impl Into<String>) -> Self {
        self.customer_answer = Some(answer.into());
        self
    }

    /// Check that every required field is present and non-blank
    pub fn validate(&self) -> Result<TicketInput, WorkflowError> {
        let required: [(&'static str, &Option<String>); 5] = [
            ("customer_name", &self.customer_name),
            ("email", &self.email),
            ("query", &self.query),
            ("priority", &self.priority),
            ("ticket_id", &self.ticket_id),
        ];

        let missing: Vec<&'static str> = required
            .iter()
            .filter(|(_, value)| value.as_deref().map_or(true, |v| v.trim().is_empty()))
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(WorkflowError::Validation { fields: missing });
        }

        let take = |value: &Option<String>| value.as_deref().unwrap_or_default().trim().to_string();

        Ok(TicketInput {
            customer_name: take(&self.customer_name),
            email: take(&self.email),
            query: take(&self.query),
            priority: take(&self.priority),
            ticket_id: take(&self.ticket_id),
            customer_answer: self
                .customer_answer
                .as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string),
        })
    }
}

/// Validated, immutable run input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketInput {
    pub customer_name: String,
    pub email: String,
    pub query: String,
    pub priority: String,
    pub ticket_id: String,
    pub customer_answer: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_request_validates() {
        let input = TicketRequest::new("Ada", " ada@example.com ", "help", "low", "T-1")
            .validate()
            .unwrap();

        assert_eq!(input.email, "ada@example.com");
        assert!(input.customer_answer.is_none());
    }

    #[test]
    fn test_missing_and_blank_fields_reported() {
        let request: TicketRequest = serde_json::from_str(
            r#"{"customer_name": "Ada", "email": "  ", "query": "help", "priority": "low"}"#,
        )
        .unwrap();

        match request.validate() {
            Err(WorkflowError::Validation { fields }) => {
                assert_eq!(fields, vec!["email", "ticket_id"]);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_answer_is_dropped() {
        let input = TicketRequest::new("Ada", "a@b.c", "q", "low", "T-1")
            .with_customer_answer("   ")
            .validate()
            .unwrap();
        assert!(input.customer_answer.is_none());
    }
}
