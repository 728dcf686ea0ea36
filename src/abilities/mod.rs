//! Ability invocation layer.
//!
//! Stages never talk to backends directly: every call goes through the
//! [`AbilityProvider`], which validates the ability against the catalog,
//! applies the server's retry and timeout policy and records each attempt.

pub mod catalog;
pub mod faults;
pub mod policy;
pub mod provider;
pub mod simulated;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AbilityError;

pub use catalog::Ability;
pub use faults::{Fault, FaultPlan};
pub use policy::{CallTimeouts, RetryPolicy};
pub use provider::{AbilityProvider, ProviderSettings};
pub use simulated::{KnowledgeArticle, SimulatedBackend};

/// A capability provider serving one or both logical servers
#[async_trait]
pub trait AbilityBackend: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Execute one attempt of `ability`. The response must be a JSON object.
    async fn call(&self, ability: Ability, request: &Value) -> Result<Value, AbilityError>;
}
