//! Error taxonomy for workflow runs.
//!
//! Library errors are typed with `thiserror`; `anyhow` is reserved for the
//! application edges (config loading, file storage, CLI).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{RunId, ServerTag, StageName};

/// Errors raised while executing a workflow run
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    /// Required input fields are missing or blank
    #[error("invalid input: missing or blank field(s): {}", fields.join(", "))]
    Validation { fields: Vec<&'static str> },

    /// The ability is not part of the catalog for the given server
    #[error("unknown ability '{ability}' for {server} server")]
    UnknownAbility { server: ServerTag, ability: String },

    /// An ability invocation failed
    #[error(transparent)]
    Ability(#[from] AbilityError),

    /// Attempt to overwrite a write-once field
    #[error("state conflict: field '{field}' is already set")]
    StateConflict { field: &'static str },

    /// A stage could not produce its required output
    #[error("stage {stage} failed: {cause}")]
    StageFailed {
        stage: StageName,
        #[source]
        cause: Box<WorkflowError>,
    },

    /// A field needed downstream was never produced
    #[error("required field '{field}' was not produced")]
    MissingOutput { field: &'static str },

    /// Payload requested before COMPLETE ran
    #[error("state record is not complete")]
    NotComplete,

    /// The run was cancelled at a stage boundary
    #[error("run cancelled before stage {next}")]
    Cancelled { next: StageName },

    /// Checkpoint storage failed
    #[error("checkpoint storage error: {0}")]
    Storage(String),

    /// A run with this id already has checkpoints
    #[error("run {run_id} already exists")]
    RunExists { run_id: RunId },
}

impl WorkflowError {
    /// Wrap an error as a failure of `stage`
    pub fn stage_failed(stage: StageName, cause: WorkflowError) -> Self {
        Self::StageFailed {
            stage,
            cause: Box::new(cause),
        }
    }

    /// Serializable discriminant of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::UnknownAbility { .. } => ErrorKind::UnknownAbility,
            Self::Ability(e) => e.kind.into(),
            Self::StateConflict { .. } => ErrorKind::StateConflict,
            Self::StageFailed { .. } => ErrorKind::StageFailed,
            Self::MissingOutput { .. } => ErrorKind::MissingOutput,
            Self::NotComplete => ErrorKind::NotComplete,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Storage(_) => ErrorKind::Storage,
            Self::RunExists { .. } => ErrorKind::RunExists,
        }
    }

    /// Kind of the innermost cause (the error itself if it has no cause)
    pub fn root_kind(&self) -> ErrorKind {
        match self {
            Self::StageFailed { cause, .. } => cause.root_kind(),
            other => other.kind(),
        }
    }
}

/// A failed ability call as seen by the caller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{ability} failed ({kind}): {message}")]
pub struct AbilityError {
    pub kind: AbilityErrorKind,
    pub ability: String,
    pub message: String,
}

impl AbilityError {
    pub fn new(kind: AbilityErrorKind, ability: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            ability: ability.into(),
            message: message.into(),
        }
    }

    pub fn transient(ability: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AbilityErrorKind::Transient, ability, message)
    }

    pub fn validation(ability: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AbilityErrorKind::Validation, ability, message)
    }

    /// Whether another attempt could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            AbilityErrorKind::Transient | AbilityErrorKind::Timeout
        )
    }
}

/// Classification of ability failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbilityErrorKind {
    /// Temporary failure, worth retrying
    Transient,

    /// The call exceeded its timeout
    Timeout,

    /// Request or response rejected; retrying cannot help
    Validation,

    /// External retries exhausted
    ExternalUnavailable,
}

impl std::fmt::Display for AbilityErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Transient => "transient",
            Self::Timeout => "timeout",
            Self::Validation => "validation",
            Self::ExternalUnavailable => "external_unavailable",
        };
        f.write_str(label)
    }
}

/// Flat error discriminant used in failure descriptors and records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    UnknownAbility,
    Transient,
    Timeout,
    AbilityValidation,
    ExternalUnavailable,
    StateConflict,
    StageFailed,
    MissingOutput,
    NotComplete,
    Cancelled,
    Storage,
    RunExists,
}

impl From<AbilityErrorKind> for ErrorKind {
    fn from(kind: AbilityErrorKind) -> Self {
        match kind {
            AbilityErrorKind::Transient => Self::Transient,
            AbilityErrorKind::Timeout => Self::Timeout,
            AbilityErrorKind::Validation => Self::AbilityValidation,
            AbilityErrorKind::ExternalUnavailable => Self::ExternalUnavailable,
        }
    }
}
