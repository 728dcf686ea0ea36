//! Records of ability invocations.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::stage::StageName;
use crate::error::{AbilityError, AbilityErrorKind};

/// Logical backend an ability is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerTag {
    /// Fast in-process computation (historically "COMMON")
    #[serde(alias = "COMMON", alias = "common")]
    Internal,

    /// Higher-latency, less reliable system (historically "ATLAS")
    #[serde(alias = "ATLAS", alias = "atlas")]
    External,
}

impl ServerTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
        }
    }
}

impl fmt::Display for ServerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "internal" | "common" => Ok(Self::Internal),
            "external" | "atlas" => Ok(Self::External),
            other => Err(format!("unknown server tag '{}'", other)),
        }
    }
}

/// One attempt at calling an ability. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbilityInvocationRecord {
    pub server: ServerTag,
    pub ability: String,

    /// Stage that issued the call
    pub stage: StageName,

    /// 1-indexed attempt number within the call
    pub attempt: u32,

    pub request: Value,
    pub request_digest: String,

    pub response: Option<Value>,
    pub response_digest: Option<String>,

    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,

    pub error_kind: Option<AbilityErrorKind>,
    pub error: Option<String>,
}

impl AbilityInvocationRecord {
    /// Record a successful attempt
    #[allow(clippy::too_many_arguments)]
    pub fn succeeded(
        server: ServerTag,
        ability: &str,
        stage: StageName,
        attempt: u32,
        request: &Value,
        response: &Value,
        started_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Self {
        Self {
            server,
            ability: ability.to_string(),
            stage,
            attempt,
            request: request.clone(),
            request_digest: digest(request),
            response: Some(response.clone()),
            response_digest: Some(digest(response)),
            started_at,
            duration_ms,
            success: true,
            error_kind: None,
            error: None,
        }
    }

    /// Record a failed attempt
    #[allow(clippy::too_many_arguments)]
    pub fn failed(
        server: ServerTag,
        ability: &str,
        stage: StageName,
        attempt: u32,
        request: &Value,
        error: &AbilityError,
        started_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Self {
        Self {
            server,
            ability: ability.to_string(),
            stage,
            attempt,
            request: request.clone(),
            request_digest: digest(request),
            response: None,
            response_digest: None,
            started_at,
            duration_ms,
            success: false,
            error_kind: Some(error.kind),
            error: Some(error.message.clone()),
        }
    }
}

/// Digest of a JSON snapshot (first 16 hex chars of SHA-256)
pub fn digest(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}
