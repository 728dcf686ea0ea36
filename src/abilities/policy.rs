//! Retry and timeout policy for ability invocations.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ServerTag;

/// Retry policy for `external` calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    200
}
fn default_max_delay() -> u64 {
    5000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Calculate delay after a failed attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms.min(self.max_delay_ms));
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Per-invocation timeouts by server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallTimeouts {
    #[serde(default = "default_internal_timeout")]
    pub internal_ms: u64,

    #[serde(default = "default_external_timeout")]
    pub external_ms: u64,
}

fn default_internal_timeout() -> u64 {
    2_000
}
fn default_external_timeout() -> u64 {
    10_000
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            internal_ms: default_internal_timeout(),
            external_ms: default_external_timeout(),
        }
    }
}

impl CallTimeouts {
    pub fn for_server(&self, server: ServerTag) -> Duration {
        match server {
            ServerTag::Internal => Duration::from_millis(self.internal_ms),
            ServerTag::External => Duration::from_millis(self.external_ms),
        }
    }
}
