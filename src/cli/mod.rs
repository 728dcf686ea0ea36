//! Command-line interface for triage.
//!
//! Provides commands for running a ticket through the workflow, printing the
//! stage graph, inspecting persisted checkpoints and audit logs, and showing
//! the resolved configuration.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::abilities::{AbilityProvider, KnowledgeArticle, SimulatedBackend};
use crate::config;
use crate::core::{
    describe, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, Orchestrator,
};
use crate::domain::{RunId, TicketRequest};

/// triage - Checkpointed customer-support resolution workflow
#[derive(Parser, Debug)]
#[command(name = "triage")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a ticket through the workflow
    Run {
        /// JSON ticket file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Use the built-in sample ticket
        #[arg(long, conflicts_with = "input")]
        sample: bool,

        /// Run ID (generated if not provided)
        #[arg(long)]
        run_id: Option<String>,

        /// Persist checkpoints and the audit log under $TRIAGE_HOME/runs
        #[arg(long)]
        persist: bool,

        /// Relevance (0.0-1.0) of the single knowledge-base article the
        /// simulated backend returns
        #[arg(long)]
        kb_relevance: Option<f64>,
    },

    /// Print the stage graph
    Graph,

    /// List persisted checkpoints of a run
    Checkpoints {
        /// Run ID
        run_id: String,
    },

    /// Print the persisted audit log of a run
    Audit {
        /// Run ID
        run_id: String,

        /// Print raw JSONL instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                input,
                sample,
                run_id,
                persist,
                kb_relevance,
            } => run_ticket(input, sample, run_id, persist, kb_relevance).await,
            Commands::Graph => {
                print!("{}", describe());
                Ok(())
            }
            Commands::Checkpoints { run_id } => show_checkpoints(&run_id).await,
            Commands::Audit { run_id, json } => show_audit(&run_id, json).await,
            Commands::Config => show_config(),
        }
    }
}

/// The ticket used by `run --sample`
pub fn sample_request() -> TicketRequest {
    TicketRequest::new(
        "John Smith",
        "john.smith@example.com",
        "I can't log into my account. I've tried resetting my password but I'm not receiving the reset email.",
        "high",
        "TICKET-2024-001",
    )
}

fn read_request(input_file: Option<PathBuf>, sample: bool) -> Result<TicketRequest> {
    if sample {
        return Ok(sample_request());
    }

    let raw = if let Some(path) = input_file {
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        buffer
    } else {
        anyhow::bail!("No input provided. Use --input <file>, --sample, or pipe JSON to stdin");
    };

    serde_json::from_str(&raw).context("Failed to parse ticket JSON")
}

/// Run a ticket through the workflow and print the terminal payload
async fn run_ticket(
    input_file: Option<PathBuf>,
    sample: bool,
    run_id: Option<String>,
    persist: bool,
    kb_relevance: Option<f64>,
) -> Result<()> {
    let request = read_request(input_file, sample)?;
    let settings = config::provider_settings()?;

    let mut backend = SimulatedBackend::new();
    if let Some(relevance) = kb_relevance {
        if !(0.0..=1.0).contains(&relevance) {
            anyhow::bail!("--kb-relevance must be between 0.0 and 1.0, got {}", relevance);
        }
        backend = backend.with_knowledge_base(vec![KnowledgeArticle::new(
            "KB-001",
            "Login Issues Troubleshooting",
            relevance,
            &["Clear browser cache", "Reset password", "Check account status"],
        )]);
    }
    let provider = AbilityProvider::with_backend(Arc::new(backend), settings);

    let store: Arc<dyn CheckpointStore> = if persist {
        Arc::new(FileCheckpointStore::from_config()?)
    } else {
        Arc::new(MemoryCheckpointStore::new())
    };

    let orchestrator = Orchestrator::new(provider, store);
    match orchestrator.run(&request, run_id.map(RunId::from)).await {
        Ok(report) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&report.payload).context("Failed to serialize payload")?
            );
            eprintln!(
                "\n[Run {} completed: {} stages, {} ability calls]",
                report.run_id,
                report.payload.stage_history.len(),
                report.state.invocations().len()
            );
            if persist {
                eprintln!("[Checkpoints saved under {}]", config::runs_dir()?.join(report.run_id.as_str()).display());
            }
        }
        Err(failure) => {
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&failure.descriptor())
                    .context("Failed to serialize failure")?
            );
            eprintln!("\n[Run {} failed at {}: {}]", failure.run_id, failure.stage, failure.error);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// List persisted checkpoints of a run
async fn show_checkpoints(run_id: &str) -> Result<()> {
    let store = FileCheckpointStore::from_config()?;
    let run_id = RunId::from(run_id);
    let checkpoints = store.load(&run_id).await?;

    if checkpoints.is_empty() {
        println!("No checkpoints found for run {}", run_id);
        return Ok(());
    }

    println!("{:<5} {:<12} {:<32} {:<10}", "SEQ", "STAGE", "TAKEN AT", "CALLS");
    println!("{}", "-".repeat(62));

    for checkpoint in &checkpoints {
        println!(
            "{:<5} {:<12} {:<32} {:<10}",
            checkpoint.sequence,
            checkpoint.stage.as_str(),
            checkpoint.taken_at.to_rfc3339(),
            checkpoint.state.invocations().len()
        );
    }

    if let Some(last) = checkpoints.last() {
        println!();
        println!("Sealed: {}", last.state.is_complete());
        if let Some(escalated) = last.state.escalated() {
            println!("Escalated: {}", escalated);
        }
    }

    Ok(())
}

/// Print the persisted audit log of a run
async fn show_audit(run_id: &str, json: bool) -> Result<()> {
    let store = FileCheckpointStore::from_config()?;
    let entries = store.load_audit(&RunId::from(run_id)).await?;

    if entries.is_empty() {
        println!("No audit log found for run {}", run_id);
        return Ok(());
    }

    if json {
        for entry in &entries {
            println!("{}", serde_json::to_string(entry)?);
        }
        return Ok(());
    }

    println!(
        "{:<12} {:<10} {:<24} {:>8}  {:<10} {}",
        "STAGE", "SERVER", "ABILITY", "MS", "OUTCOME", "DETAIL"
    );
    println!("{}", "-".repeat(90));

    for entry in &entries {
        let server = entry.server.map(|s| s.as_str()).unwrap_or("-");
        let ability = entry.ability.as_deref().unwrap_or("-");
        let detail = match (&entry.edge, &entry.error) {
            (_, Some(error)) => error.clone(),
            (Some(edge), None) => format!("edge: {:?}", edge).to_lowercase(),
            (None, None) => String::new(),
        };
        println!(
            "{:<12} {:<10} {:<24} {:>8}  {:<10} {}",
            entry.stage.as_str(),
            server,
            ability,
            entry.duration_ms,
            format!("{:?}", entry.outcome).to_lowercase(),
            detail
        );
    }

    Ok(())
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("triage configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home: {}", cfg.home.display());
    println!("  Runs: {}", cfg.runs_dir().display());
    println!();
    println!("Retry (external abilities):");
    println!("  Max attempts:  {}", cfg.provider.retry.max_attempts);
    println!("  Initial delay: {}ms", cfg.provider.retry.initial_delay_ms);
    println!("  Max delay:     {}ms", cfg.provider.retry.max_delay_ms);
    println!("  Multiplier:    {}", cfg.provider.retry.backoff_multiplier);
    println!();
    println!("Timeouts:");
    println!("  Internal: {}ms", cfg.provider.timeouts.internal_ms);
    println!("  External: {}ms", cfg.provider.timeouts.external_ms);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "triage",
            "run",
            "--sample",
            "--run-id",
            "demo-1",
            "--kb-relevance",
            "0.6",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                sample,
                run_id,
                kb_relevance,
                persist,
                ..
            } => {
                assert!(sample);
                assert!(!persist);
                assert_eq!(run_id.as_deref(), Some("demo-1"));
                assert_eq!(kb_relevance, Some(0.6));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_sample_and_input_conflict() {
        assert!(Cli::try_parse_from(["triage", "run", "--sample", "--input", "t.json"]).is_err());
    }

    #[test]
    fn test_sample_request_is_valid() {
        assert!(sample_request().validate().is_ok());
    }
}
