//! Per-run, append-only checkpoint storage.
//!
//! The orchestrator appends one checkpoint after every stage. Two stores are
//! provided: an in-memory map for embedding and tests, and a file store that
//! keeps newline-delimited JSON (JSONL) per run for easy inspection:
//!
//! ```text
//! <runs_dir>/<run_id>/checkpoints.jsonl
//! <runs_dir>/<run_id>/audit.jsonl
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, RwLock};

use crate::domain::{AuditEntry, AuditLog, RunId, StageName, StateRecord};

/// Snapshot of a run's record after one stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: RunId,

    /// 1-based position within the run
    pub sequence: u32,

    /// The stage that produced `state`
    pub stage: StageName,

    pub taken_at: DateTime<Utc>,
    pub state: StateRecord,
}

impl Checkpoint {
    pub fn new(run_id: RunId, sequence: u32, stage: StageName, state: StateRecord) -> Self {
        Self {
            run_id,
            sequence,
            stage,
            taken_at: Utc::now(),
            state,
        }
    }
}

/// Storage for checkpoints, keyed by run id.
///
/// Writes for one run are serialized; different runs never contend on a
/// shared key. Sequences must strictly increase within a run.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a checkpoint to its run
    async fn append(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// All checkpoints of a run, oldest first
    async fn load(&self, run_id: &RunId) -> Result<Vec<Checkpoint>>;

    /// The most recent checkpoint of a run
    async fn latest(&self, run_id: &RunId) -> Result<Option<Checkpoint>> {
        Ok(self.load(run_id).await?.pop())
    }

    /// Persist a run's audit trail. Stores without audit support ignore it.
    async fn record_audit(&self, _run_id: &RunId, _audit: &AuditLog) -> Result<()> {
        Ok(())
    }
}

fn check_sequence(run_id: &RunId, last: Option<u32>, next: u32) -> Result<()> {
    if let Some(last) = last {
        if next <= last {
            bail!(
                "Checkpoint sequence for run {} must increase (last {}, got {})",
                run_id,
                last,
                next
            );
        }
    }
    Ok(())
}

type RunSlot<T> = Arc<Mutex<T>>;

/// Look up or create the per-run slot, holding the map lock only briefly
async fn slot<T: Default>(map: &RwLock<HashMap<RunId, RunSlot<T>>>, run_id: &RunId) -> RunSlot<T> {
    if let Some(slot) = map.read().await.get(run_id) {
        return slot.clone();
    }
    map.write()
        .await
        .entry(run_id.clone())
        .or_insert_with(|| Arc::new(Mutex::new(T::default())))
        .clone()
}

#[derive(Debug, Default)]
struct MemoryRun {
    checkpoints: Vec<Checkpoint>,
    audit: AuditLog,
}

/// In-process checkpoint store
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    runs: RwLock<HashMap<RunId, RunSlot<MemoryRun>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The audit trail recorded for a run, if any
    pub async fn audit(&self, run_id: &RunId) -> AuditLog {
        let Some(slot) = self.runs.read().await.get(run_id).cloned() else {
            return AuditLog::new();
        };
        let run = slot.lock().await;
        run.audit.clone()
    }

    /// Ids of all runs with at least one checkpoint
    pub async fn run_ids(&self) -> Vec<RunId> {
        let mut ids: Vec<RunId> = self.runs.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn append(&self, checkpoint: &Checkpoint) -> Result<()> {
        let slot = slot(&self.runs, &checkpoint.run_id).await;
        let mut run = slot.lock().await;
        check_sequence(
            &checkpoint.run_id,
            run.checkpoints.last().map(|c| c.sequence),
            checkpoint.sequence,
        )?;
        run.checkpoints.push(checkpoint.clone());
        Ok(())
    }

    async fn load(&self, run_id: &RunId) -> Result<Vec<Checkpoint>> {
        let Some(slot) = self.runs.read().await.get(run_id).cloned() else {
            return Ok(Vec::new());
        };
        let run = slot.lock().await;
        Ok(run.checkpoints.clone())
    }

    async fn record_audit(&self, run_id: &RunId, audit: &AuditLog) -> Result<()> {
        let slot = slot(&self.runs, run_id).await;
        let mut run = slot.lock().await;
        run.audit = audit.clone();
        Ok(())
    }
}

/// JSONL-backed checkpoint store rooted at a runs directory
#[derive(Debug)]
pub struct FileCheckpointStore {
    base_dir: PathBuf,

    /// Last sequence written per run; the mutex also serializes writers
    runs: RwLock<HashMap<RunId, RunSlot<Option<u32>>>>,
}

impl FileCheckpointStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// Store rooted at the configured runs directory (`$TRIAGE_HOME/runs`)
    pub fn from_config() -> Result<Self> {
        Ok(Self::new(crate::config::runs_dir()?))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory holding one run's files
    pub fn run_dir(&self, run_id: &RunId) -> Result<PathBuf> {
        if !run_id.is_path_safe() {
            bail!("Run id '{}' cannot be used as a directory name", run_id);
        }
        Ok(self.base_dir.join(run_id.as_str()))
    }

    pub fn checkpoints_path(&self, run_id: &RunId) -> Result<PathBuf> {
        Ok(self.run_dir(run_id)?.join("checkpoints.jsonl"))
    }

    pub fn audit_path(&self, run_id: &RunId) -> Result<PathBuf> {
        Ok(self.run_dir(run_id)?.join("audit.jsonl"))
    }

    /// Read a run's persisted audit trail
    pub async fn load_audit(&self, run_id: &RunId) -> Result<Vec<AuditEntry>> {
        read_jsonl(&self.audit_path(run_id)?).await
    }

    /// List all run ids present in the base directory
    pub async fn list_runs(&self) -> Result<Vec<RunId>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir)
            .await
            .with_context(|| format!("Failed to read runs directory: {}", self.base_dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    let run_id = RunId::from(name);
                    if run_id.is_path_safe() {
                        runs.push(run_id);
                    }
                }
            }
        }

        runs.sort();
        Ok(runs)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn append(&self, checkpoint: &Checkpoint) -> Result<()> {
        let run_id = &checkpoint.run_id;
        let run_dir = self.run_dir(run_id)?;
        let path = run_dir.join("checkpoints.jsonl");

        let slot = slot(&self.runs, run_id).await;
        let mut last = slot.lock().await;

        if last.is_none() {
            *last = read_jsonl::<Checkpoint>(&path)
                .await?
                .last()
                .map(|c| c.sequence);
        }
        check_sequence(run_id, *last, checkpoint.sequence)?;

        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("Failed to create run directory: {}", run_dir.display()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open checkpoints file: {}", path.display()))?;

        let json = serde_json::to_string(checkpoint).context("Failed to serialize checkpoint")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write checkpoint")?;
        file.flush().await.context("Failed to flush checkpoint")?;

        *last = Some(checkpoint.sequence);
        Ok(())
    }

    async fn load(&self, run_id: &RunId) -> Result<Vec<Checkpoint>> {
        read_jsonl(&self.checkpoints_path(run_id)?).await
    }

    async fn record_audit(&self, run_id: &RunId, audit: &AuditLog) -> Result<()> {
        let run_dir = self.run_dir(run_id)?;
        let path = run_dir.join("audit.jsonl");

        let slot = slot(&self.runs, run_id).await;
        let _guard = slot.lock().await;

        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("Failed to create run directory: {}", run_dir.display()))?;

        let body = audit.to_jsonl().context("Failed to serialize audit log")?;
        fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write audit file: {}", path.display()))?;

        Ok(())
    }
}

/// Read every non-blank line of a JSONL file; a missing file reads as empty
async fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut lines = BufReader::new(file).lines();
    let mut items = Vec::new();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let item = serde_json::from_str(&line)
            .with_context(|| format!("Failed to parse line in {}: {}", path.display(), line))?;
        items.push(item);
    }

    Ok(items)
}
