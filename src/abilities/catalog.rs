//! The fixed capability catalog.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::ServerTag;
use crate::error::WorkflowError;

/// Every ability a stage may invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ability {
    // internal
    ParseRequestText,
    NormalizeFields,
    AddFlagsCalculations,
    SolutionEvaluation,
    ResponseGeneration,

    // external
    ExtractEntities,
    EnrichRecords,
    ClarifyQuestion,
    ExtractAnswer,
    KnowledgeBaseSearch,
    EscalationDecision,
    UpdateTicket,
    CloseTicket,
    ExecuteApiCalls,
    TriggerNotifications,
}

impl Ability {
    pub const ALL: [Ability; 15] = [
        Self::ParseRequestText,
        Self::NormalizeFields,
        Self::AddFlagsCalculations,
        Self::SolutionEvaluation,
        Self::ResponseGeneration,
        Self::ExtractEntities,
        Self::EnrichRecords,
        Self::ClarifyQuestion,
        Self::ExtractAnswer,
        Self::KnowledgeBaseSearch,
        Self::EscalationDecision,
        Self::UpdateTicket,
        Self::CloseTicket,
        Self::ExecuteApiCalls,
        Self::TriggerNotifications,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ParseRequestText => "parse_request_text",
            Self::NormalizeFields => "normalize_fields",
            Self::AddFlagsCalculations => "add_flags_calculations",
            Self::SolutionEvaluation => "solution_evaluation",
            Self::ResponseGeneration => "response_generation",
            Self::ExtractEntities => "extract_entities",
            Self::EnrichRecords => "enrich_records",
            Self::ClarifyQuestion => "clarify_question",
            Self::ExtractAnswer => "extract_answer",
            Self::KnowledgeBaseSearch => "knowledge_base_search",
            Self::EscalationDecision => "escalation_decision",
            Self::UpdateTicket => "update_ticket",
            Self::CloseTicket => "close_ticket",
            Self::ExecuteApiCalls => "execute_api_calls",
            Self::TriggerNotifications => "trigger_notifications",
        }
    }

    /// The server this ability is served by
    pub fn server(&self) -> ServerTag {
        match self {
            Self::ParseRequestText
            | Self::NormalizeFields
            | Self::AddFlagsCalculations
            | Self::SolutionEvaluation
            | Self::ResponseGeneration => ServerTag::Internal,
            _ => ServerTag::External,
        }
    }

    /// Resolve `name` against the catalog of `server`
    pub fn lookup(server: ServerTag, name: &str) -> Result<Self, WorkflowError> {
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.server() == server && a.name() == name)
            .ok_or_else(|| WorkflowError::UnknownAbility {
                server,
                ability: name.to_string(),
            })
    }

    /// Catalog entries for one server, in declaration order
    pub fn catalog(server: ServerTag) -> impl Iterator<Item = Ability> {
        Self::ALL.into_iter().filter(move |a| a.server() == server)
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_split() {
        let internal: Vec<_> = Ability::catalog(ServerTag::Internal).map(|a| a.name()).collect();
        assert_eq!(
            internal,
            vec![
                "parse_request_text",
                "normalize_fields",
                "add_flags_calculations",
                "solution_evaluation",
                "response_generation",
            ]
        );
        assert_eq!(Ability::catalog(ServerTag::External).count(), 10);
    }

    #[test]
    fn test_lookup_respects_server() {
        assert_eq!(
            Ability::lookup(ServerTag::External, "close_ticket").unwrap(),
            Ability::CloseTicket
        );

        let err = Ability::lookup(ServerTag::Internal, "close_ticket").unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownAbility { server: ServerTag::Internal, .. }));
        assert!(Ability::lookup(ServerTag::External, "reboot_server").is_err());
    }
}
