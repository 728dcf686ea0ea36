//! Fault injection for simulated backends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::catalog::Ability;
use crate::error::AbilityError;

/// A failure mode injected for one ability
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fault {
    /// Every attempt fails with a transient error
    AlwaysTransient,

    /// The first `n` attempts fail transiently, later ones succeed
    TransientTimes(u32),

    /// Every attempt is rejected as invalid
    Validation,

    /// Every attempt is delayed before answering
    Delay(Duration),
}

#[derive(Debug)]
struct ArmedFault {
    fault: Fault,
    hits: AtomicU32,
}

/// Per-ability fault table
#[derive(Debug, Default)]
pub struct FaultPlan {
    faults: HashMap<Ability, ArmedFault>,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject `fault` for `ability`, replacing any earlier entry
    pub fn with(mut self, ability: Ability, fault: Fault) -> Self {
        self.faults.insert(
            ability,
            ArmedFault {
                fault,
                hits: AtomicU32::new(0),
            },
        );
        self
    }

    /// Number of attempts that reached the fault for `ability`
    pub fn hits(&self, ability: Ability) -> u32 {
        self.faults
            .get(&ability)
            .map_or(0, |armed| armed.hits.load(Ordering::SeqCst))
    }

    /// Apply the fault for `ability`, if any. `Ok` means the call may proceed.
    pub async fn apply(&self, ability: Ability) -> Result<(), AbilityError> {
        let Some(armed) = self.faults.get(&ability) else {
            return Ok(());
        };
        let hit = armed.hits.fetch_add(1, Ordering::SeqCst) + 1;

        match armed.fault {
            Fault::AlwaysTransient => Err(AbilityError::transient(
                ability.name(),
                format!("injected transient failure (attempt {})", hit),
            )),
            Fault::TransientTimes(n) if hit <= n => Err(AbilityError::transient(
                ability.name(),
                format!("injected transient failure {} of {}", hit, n),
            )),
            Fault::TransientTimes(_) => Ok(()),
            Fault::Validation => Err(AbilityError::validation(
                ability.name(),
                "injected validation failure",
            )),
            Fault::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}
