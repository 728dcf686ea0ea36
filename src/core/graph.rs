//! The static stage graph.
//!
//! A straight line from INTAKE to DECIDE, one conditional edge at DECIDE,
//! then either UPDATE → CREATE → DO → COMPLETE or straight to COMPLETE.

use crate::domain::{Edge, StageName, StateRecord};
use crate::error::WorkflowError;

/// Stages every run passes through before the branch
pub const MAIN_LINE: [StageName; 7] = [
    StageName::Intake,
    StageName::Understand,
    StageName::Prepare,
    StageName::Ask,
    StageName::Wait,
    StageName::Retrieve,
    StageName::Decide,
];

/// Continuation after DECIDE when automated resolution proceeds
pub const CONTINUE_PATH: [StageName; 4] = [
    StageName::Update,
    StageName::Create,
    StageName::Do,
    StageName::Complete,
];

/// Continuation after DECIDE when the request is escalated
pub const ESCALATE_PATH: [StageName; 1] = [StageName::Complete];

/// A move to the next stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub to: StageName,

    /// Set only for the edge leaving DECIDE
    pub edge: Option<Edge>,
}

impl Transition {
    fn straight(to: StageName) -> Option<Self> {
        Some(Self { to, edge: None })
    }
}

/// Edge selected by the escalation decision
pub fn branch(state: &StateRecord) -> Result<Edge, WorkflowError> {
    match state.escalated() {
        Some(false) => Ok(Edge::Continue),
        Some(true) => Ok(Edge::Escalate),
        None => Err(WorkflowError::stage_failed(
            StageName::Decide,
            WorkflowError::MissingOutput { field: "escalation" },
        )),
    }
}

/// Next stage after `stage`, or `None` once COMPLETE has run
pub fn successor(stage: StageName, state: &StateRecord) -> Result<Option<Transition>, WorkflowError> {
    let next = match stage {
        StageName::Intake => Transition::straight(StageName::Understand),
        StageName::Understand => Transition::straight(StageName::Prepare),
        StageName::Prepare => Transition::straight(StageName::Ask),
        StageName::Ask => Transition::straight(StageName::Wait),
        StageName::Wait => Transition::straight(StageName::Retrieve),
        StageName::Retrieve => Transition::straight(StageName::Decide),
        StageName::Decide => {
            let edge = branch(state)?;
            let to = match edge {
                Edge::Continue => StageName::Update,
                Edge::Escalate => StageName::Complete,
            };
            Some(Transition { to, edge: Some(edge) })
        }
        StageName::Update => Transition::straight(StageName::Create),
        StageName::Create => Transition::straight(StageName::Do),
        StageName::Do => Transition::straight(StageName::Complete),
        StageName::Complete => None,
    };
    Ok(next)
}

/// Whether `history` is a valid (possibly partial) path through the graph
pub fn is_valid_history(history: &[StageName]) -> bool {
    let main_len = history.len().min(MAIN_LINE.len());
    if history[..main_len] != MAIN_LINE[..main_len] {
        return false;
    }

    let rest = &history[main_len..];
    CONTINUE_PATH.starts_with(rest) || ESCALATE_PATH.starts_with(rest)
}

/// Text rendering of the workflow
pub fn describe() -> String {
    let mut out = String::from(
        "INTAKE → UNDERSTAND → PREPARE → ASK → WAIT → RETRIEVE → DECIDE\n\
         DECIDE ─[continue]→ UPDATE → CREATE → DO → COMPLETE\n\
         DECIDE ─[escalate]→ COMPLETE\n\nStages:\n",
    );
    for (i, stage) in StageName::ALL.iter().enumerate() {
        out.push_str(&format!(
            "{:>2}. {:<10} ({})\n",
            i + 1,
            stage.as_str(),
            match stage.mode() {
                crate::domain::StageMode::Deterministic => "deterministic",
                crate::domain::StageMode::HumanInteraction => "human interaction",
                crate::domain::StageMode::Branching => "branching",
            }
        ));
    }
    out
}
