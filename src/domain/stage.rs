//! Workflow stage names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the eleven workflow stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageName {
    Intake,
    Understand,
    Prepare,
    Ask,
    Wait,
    Retrieve,
    Decide,
    Update,
    Create,
    Do,
    Complete,
}

impl StageName {
    /// All stages in declaration order
    pub const ALL: [StageName; 11] = [
        Self::Intake,
        Self::Understand,
        Self::Prepare,
        Self::Ask,
        Self::Wait,
        Self::Retrieve,
        Self::Decide,
        Self::Update,
        Self::Create,
        Self::Do,
        Self::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "INTAKE",
            Self::Understand => "UNDERSTAND",
            Self::Prepare => "PREPARE",
            Self::Ask => "ASK",
            Self::Wait => "WAIT",
            Self::Retrieve => "RETRIEVE",
            Self::Decide => "DECIDE",
            Self::Update => "UPDATE",
            Self::Create => "CREATE",
            Self::Do => "DO",
            Self::Complete => "COMPLETE",
        }
    }

    /// How the stage behaves with respect to control flow
    pub fn mode(&self) -> StageMode {
        match self {
            Self::Ask => StageMode::HumanInteraction,
            Self::Decide => StageMode::Branching,
            _ => StageMode::Deterministic,
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}

/// Stage classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageMode {
    /// Fixed, ordered ability calls merged unconditionally
    Deterministic,

    /// Produces a question/answer exchange
    HumanInteraction,

    /// Output selects the outgoing edge
    Branching,
}

/// Outgoing edge taken from DECIDE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    /// Automated resolution continues through UPDATE
    Continue,

    /// Hand-off to a human; straight to COMPLETE
    Escalate,
}
