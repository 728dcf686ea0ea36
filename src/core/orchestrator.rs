//! Main orchestrator for workflow runs.
//!
//! Walks the stage graph one stage at a time, checkpoints the record after
//! every stage, records the audit trail, and turns fatal errors into a
//! [`RunFailure`] carrying everything needed to inspect the partial run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn, Span};

use crate::abilities::{AbilityProvider, ProviderSettings};
use crate::domain::{
    AuditEntry, AuditLog, AuditOutcome, Edge, RunId, StageName, StageTrail, StateRecord,
    TerminalPayload, TicketRequest,
};
use crate::error::{ErrorKind, WorkflowError};

use super::checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore};
use super::graph;
use super::stages::{self, StageContext};

/// Cooperative cancellation signal, checked between stages
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the run stops before its next stage
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub payload: TerminalPayload,

    /// The sealed record
    pub state: StateRecord,

    pub audit: AuditLog,
}

/// A run that stopped before COMPLETE
#[derive(Debug, Clone, Error)]
#[error("run {run_id} failed at {stage}: {error}")]
pub struct RunFailure {
    pub run_id: RunId,

    /// Stage that failed, or the stage that would have run next on cancellation
    pub stage: StageName,

    pub kind: ErrorKind,

    #[source]
    pub error: WorkflowError,

    pub stage_history: Vec<StageName>,

    /// Last checkpointed record plus the failed stage's invocation records.
    /// `None` when input validation failed.
    pub partial_state: Option<Box<StateRecord>>,

    pub audit: AuditLog,
}

/// Serializable summary of a [`RunFailure`]
#[derive(Debug, Clone, Serialize)]
pub struct FailureDescriptor {
    pub run_id: RunId,
    pub stage: StageName,
    pub kind: ErrorKind,
    pub root_kind: ErrorKind,
    pub message: String,
    pub stage_history: Vec<StageName>,
}

impl RunFailure {
    pub fn descriptor(&self) -> FailureDescriptor {
        FailureDescriptor {
            run_id: self.run_id.clone(),
            stage: self.stage,
            kind: self.kind,
            root_kind: self.error.root_kind(),
            message: self.error.to_string(),
            stage_history: self.stage_history.clone(),
        }
    }
}

/// Main workflow orchestrator.
///
/// Holds no per-run state; one instance may drive many concurrent runs.
pub struct Orchestrator {
    provider: AbilityProvider,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl Orchestrator {
    pub fn new(provider: AbilityProvider, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            provider,
            checkpoints,
        }
    }

    /// Simulated abilities with default settings and in-memory checkpoints
    pub fn simulated() -> Self {
        Self::new(
            AbilityProvider::simulated(ProviderSettings::default()),
            Arc::new(MemoryCheckpointStore::new()),
        )
    }

    pub fn provider(&self) -> &AbilityProvider {
        &self.provider
    }

    /// Text rendering of the stage graph
    pub fn describe(&self) -> String {
        graph::describe()
    }

    /// Checkpoints recorded for a run, oldest first
    pub async fn checkpoints(&self, run_id: &RunId) -> anyhow::Result<Vec<Checkpoint>> {
        self.checkpoints.load(run_id).await
    }

    /// Execute one run to completion. A fresh run id is generated when none is given.
    pub async fn run(
        &self,
        request: &TicketRequest,
        run_id: Option<RunId>,
    ) -> Result<RunReport, RunFailure> {
        self.run_with_cancel(request, run_id, &CancelFlag::new()).await
    }

    /// Execute one run, stopping at the next stage boundary once `cancel` is set
    #[instrument(skip_all, fields(run_id))]
    pub async fn run_with_cancel(
        &self,
        request: &TicketRequest,
        run_id: Option<RunId>,
        cancel: &CancelFlag,
    ) -> Result<RunReport, RunFailure> {
        let run = RunContext {
            run_id: run_id.unwrap_or_else(RunId::generate),
            audit: AuditLog::new(),
            sequence: 0,
            persist_audit: true,
        };
        Span::current().record("run_id", run.run_id.as_str());
        info!("Starting workflow run");

        self.drive(run, request, cancel).await
    }

    async fn drive(
        &self,
        mut run: RunContext,
        request: &TicketRequest,
        cancel: &CancelFlag,
    ) -> Result<RunReport, RunFailure> {
        let clock = Instant::now();
        let intake = stages::intake(request)
            .and_then(|state| state.record_stage(StageName::Intake, StageTrail::default()));

        let mut state = match intake {
            Ok(state) => state,
            Err(e) => return Err(self.fail(run, StageName::Intake, e, None, clock).await),
        };

        // An existing run's checkpoints and audit trail belong to that run
        match self.checkpoints.latest(&run.run_id).await {
            Ok(None) => {}
            Ok(Some(_)) => {
                run.persist_audit = false;
                let error = WorkflowError::RunExists {
                    run_id: run.run_id.clone(),
                };
                return Err(self.fail(run, StageName::Intake, error, None, clock).await);
            }
            Err(e) => {
                run.persist_audit = false;
                let error = WorkflowError::Storage(format!("{:#}", e));
                return Err(self.fail(run, StageName::Intake, error, Some(state), clock).await);
            }
        }

        run.stage_completed(StageName::Intake, None, clock);
        if let Err(e) = self.checkpoint(&mut run, StageName::Intake, &state).await {
            // lost a race with another run using the same id
            run.persist_audit = false;
            return Err(self.fail(run, StageName::Intake, e, Some(state), clock).await);
        }

        let mut stage = StageName::Intake;

        loop {
            let transition = match graph::successor(stage, &state) {
                Ok(Some(transition)) => transition,
                Ok(None) => break,
                Err(e) => return Err(self.fail(run, stage, e, Some(state), clock).await),
            };

            let next_stage = transition.to;

            if cancel.is_cancelled() {
                warn!(next = %next_stage, "Run cancelled");
                run.audit.record(AuditEntry::transition(
                    run.run_id.clone(),
                    next_stage,
                    AuditOutcome::Cancelled,
                ));
                let error = WorkflowError::Cancelled { next: next_stage };
                return Err(self.abort(run, next_stage, error, Some(state)).await);
            }

            if transition.edge == Some(Edge::Escalate) {
                state = match stages::escalation_handoff(&state) {
                    Ok(next) => next,
                    Err(e) => return Err(self.fail(run, stage, e, Some(state), clock).await),
                };
            }

            let started = Instant::now();
            let mut ctx = StageContext::new(next_stage, &self.provider);
            let result = stages::run_stage(next_stage, &state, &mut ctx).await;
            let trail = ctx.into_trail();
            run.audit.record_invocations(&run.run_id, &trail.invocations);

            let next = match result {
                Ok(next) if next_stage == StageName::Complete => Ok(next),
                Ok(next) => next.record_stage(next_stage, trail),
                Err(e) => {
                    let partial = state.with_trail(trail);
                    return Err(self.fail(run, next_stage, e, Some(partial), started).await);
                }
            };

            state = match next {
                Ok(next) => next,
                Err(e) => return Err(self.fail(run, next_stage, e, Some(state), started).await),
            };

            let edge = if next_stage == StageName::Decide {
                graph::branch(&state).ok()
            } else {
                None
            };
            run.stage_completed(next_stage, edge, started);

            if let Err(e) = self.checkpoint(&mut run, next_stage, &state).await {
                return Err(self.fail(run, next_stage, e, Some(state), started).await);
            }

            stage = next_stage;
        }

        let payload = match state.render_payload() {
            Ok(payload) => payload,
            Err(e) => return Err(self.fail(run, StageName::Complete, e, Some(state), clock).await),
        };

        self.persist_audit(&run).await;
        info!(
            escalated = payload.escalated,
            status = ?payload.resolution_status,
            duration_ms = clock.elapsed().as_millis() as u64,
            "Workflow run completed"
        );

        Ok(RunReport {
            run_id: run.run_id,
            payload,
            state,
            audit: run.audit,
        })
    }

    async fn checkpoint(
        &self,
        run: &mut RunContext,
        stage: StageName,
        state: &StateRecord,
    ) -> Result<(), WorkflowError> {
        run.sequence += 1;
        let checkpoint = Checkpoint::new(run.run_id.clone(), run.sequence, stage, state.clone());
        self.checkpoints
            .append(&checkpoint)
            .await
            .map_err(|e| WorkflowError::Storage(format!("{:#}", e)))
    }

    /// Record a failed stage in the audit trail, then abort
    async fn fail(
        &self,
        mut run: RunContext,
        stage: StageName,
        error: WorkflowError,
        partial: Option<StateRecord>,
        started: Instant,
    ) -> RunFailure {
        error!(%stage, error = %error, "Workflow run aborted");
        run.audit.record(
            AuditEntry::transition(run.run_id.clone(), stage, AuditOutcome::Aborted)
                .with_duration(started.elapsed().as_millis() as u64)
                .with_error(error.to_string()),
        );
        self.abort(run, stage, error, partial).await
    }

    async fn abort(
        &self,
        run: RunContext,
        stage: StageName,
        error: WorkflowError,
        partial: Option<StateRecord>,
    ) -> RunFailure {
        self.persist_audit(&run).await;

        RunFailure {
            run_id: run.run_id,
            stage,
            kind: error.kind(),
            error,
            stage_history: partial
                .as_ref()
                .map(|s| s.stage_history().to_vec())
                .unwrap_or_default(),
            partial_state: partial.map(Box::new),
            audit: run.audit,
        }
    }

    async fn persist_audit(&self, run: &RunContext) {
        if !run.persist_audit {
            return;
        }
        if let Err(e) = self.checkpoints.record_audit(&run.run_id, &run.audit).await {
            warn!(error = %e, "Failed to persist audit log");
        }
    }
}

/// Bookkeeping for one run in flight
struct RunContext {
    run_id: RunId,
    audit: AuditLog,
    sequence: u32,

    /// Cleared when the run id may belong to another run
    persist_audit: bool,
}

impl RunContext {
    fn stage_completed(&mut self, stage: StageName, edge: Option<Edge>, started: Instant) {
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(%stage, duration_ms, edge = ?edge, "Stage completed");

        let mut entry = AuditEntry::transition(self.run_id.clone(), stage, AuditOutcome::Completed)
            .with_duration(duration_ms);
        if let Some(edge) = edge {
            entry = entry.with_edge(edge);
        }
        self.audit.record(entry);
    }
}
