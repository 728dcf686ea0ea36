//! Ability dispatch with per-server retry and timeout policy.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use super::catalog::Ability;
use super::policy::{CallTimeouts, RetryPolicy};
use super::simulated::SimulatedBackend;
use super::AbilityBackend;
use crate::domain::{AbilityInvocationRecord, ServerTag, StageName};
use crate::error::{AbilityError, AbilityErrorKind, WorkflowError};

/// Tunables for an [`AbilityProvider`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Applied to `external` calls only
    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub timeouts: CallTimeouts,
}

/// Routes ability calls to the internal or external backend.
///
/// Holds no per-call state; cloning is cheap and clones may be shared
/// across concurrent runs.
#[derive(Clone)]
pub struct AbilityProvider {
    internal: Arc<dyn AbilityBackend>,
    external: Arc<dyn AbilityBackend>,
    settings: ProviderSettings,
}

impl std::fmt::Debug for AbilityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbilityProvider")
            .field("internal", &self.internal.name())
            .field("external", &self.external.name())
            .field("settings", &self.settings)
            .finish()
    }
}

impl AbilityProvider {
    pub fn new(
        internal: Arc<dyn AbilityBackend>,
        external: Arc<dyn AbilityBackend>,
        settings: ProviderSettings,
    ) -> Self {
        Self {
            internal,
            external,
            settings,
        }
    }

    /// One backend serving both servers
    pub fn with_backend(backend: Arc<dyn AbilityBackend>, settings: ProviderSettings) -> Self {
        Self::new(backend.clone(), backend, settings)
    }

    /// Provider over a default [`SimulatedBackend`]
    pub fn simulated(settings: ProviderSettings) -> Self {
        Self::with_backend(Arc::new(SimulatedBackend::new()), settings)
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    fn backend(&self, server: ServerTag) -> &dyn AbilityBackend {
        match server {
            ServerTag::Internal => self.internal.as_ref(),
            ServerTag::External => self.external.as_ref(),
        }
    }

    /// Invoke `ability` on `server` on behalf of `stage`.
    ///
    /// Every attempt pushes exactly one record onto `trail`, whether it
    /// succeeds or fails. Names outside the server's catalog are rejected
    /// with `UnknownAbility` before dispatch and leave `trail` untouched.
    /// External calls retry transient failures and timeouts with
    /// exponential backoff; exhaustion yields `ExternalUnavailable`.
    /// Internal calls get a single attempt.
    pub async fn invoke(
        &self,
        stage: StageName,
        server: ServerTag,
        ability: &str,
        request: Value,
        trail: &mut Vec<AbilityInvocationRecord>,
    ) -> Result<Value, WorkflowError> {
        let ability = Ability::lookup(server, ability)?;
        let name = ability.name();
        let backend = self.backend(server);
        let call_timeout = self.settings.timeouts.for_server(server);
        let retry = match server {
            ServerTag::Internal => RetryPolicy::single_attempt(),
            ServerTag::External => self.settings.retry.clone(),
        };

        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let started_at = Utc::now();
            let clock = Instant::now();

            let result = match timeout(call_timeout, backend.call(ability, &request)).await {
                Ok(result) => result.and_then(|response| ensure_object(ability, response)),
                Err(_) => Err(AbilityError::new(
                    AbilityErrorKind::Timeout,
                    name,
                    format!("no response within {:?}", call_timeout),
                )),
            };

            let duration_ms = clock.elapsed().as_millis() as u64;

            match result {
                Ok(response) => {
                    trail.push(AbilityInvocationRecord::succeeded(
                        server, name, stage, attempt, &request, &response, started_at, duration_ms,
                    ));
                    debug!(%stage, %server, ability = name, attempt, duration_ms, "Ability succeeded");
                    return Ok(response);
                }
                Err(e) => {
                    trail.push(AbilityInvocationRecord::failed(
                        server, name, stage, attempt, &request, &e, started_at, duration_ms,
                    ));

                    if server == ServerTag::Internal || !e.is_transient() {
                        error!(%stage, %server, ability = name, error = %e, "Ability failed");
                        return Err(e.into());
                    }

                    if retry.should_retry(attempt) {
                        let delay = retry.delay_for_attempt(attempt);
                        warn!(
                            %stage,
                            ability = name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Ability failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    error!(%stage, ability = name, attempt, error = %e, "Ability retries exhausted");
                    return Err(AbilityError::new(
                        AbilityErrorKind::ExternalUnavailable,
                        name,
                        format!("gave up after {} attempts: {}", attempt, e.message),
                    )
                    .into());
                }
            }
        }
    }
}

fn ensure_object(ability: Ability, response: Value) -> Result<Value, AbilityError> {
    if response.is_object() {
        Ok(response)
    } else {
        Err(AbilityError::validation(
            ability.name(),
            "response is not a JSON object",
        ))
    }
}
