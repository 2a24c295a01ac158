//! Pipeline CLI commands.

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};

use crate::domain::models::{PipelineOutcome, TestHistory};
use crate::domain::ports::{keys, StateStore, StateStoreExt};
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::store::JsonStateStore;
use crate::services::orchestrator::{PipelineOrchestrator, RunOptions};

#[derive(Args, Debug)]
pub struct PipelineArgs {
    #[command(subcommand)]
    pub command: PipelineCommand,
}

#[derive(Subcommand, Debug)]
pub enum PipelineCommand {
    /// Run the full pipeline
    Run {
        /// Pull-request base ref for selective testing
        #[arg(long)]
        base: Option<String>,

        /// Skip selective testing and run everything
        #[arg(long)]
        fallback: bool,

        /// Read the coverage summary and gate on it
        #[arg(long)]
        coverage: bool,

        /// Debug-level logging for this run
        #[arg(short, long)]
        verbose: bool,
    },
    /// Show the most recent pipeline results
    Report,
    /// Show recorded per-test execution history
    History,
    /// Remove persisted pipeline state
    Cleanup,
}

pub async fn execute(args: PipelineArgs, json_mode: bool) -> Result<()> {
    match args.command {
        // `verbose` is consumed at logger initialization in main.
        PipelineCommand::Run {
            base,
            fallback,
            coverage,
            verbose: _,
        } => run_pipeline(base, fallback, coverage, json_mode).await,
        PipelineCommand::Report => show_report(json_mode).await,
        PipelineCommand::History => show_history(json_mode).await,
        PipelineCommand::Cleanup => cleanup(json_mode).await,
    }
}

async fn run_pipeline(
    base: Option<String>,
    fallback: bool,
    coverage: bool,
    json_mode: bool,
) -> Result<()> {
    let config = ConfigLoader::load()?;
    let root = std::env::current_dir().context("resolving working directory")?;
    let options = RunOptions {
        pr_base: base,
        full: fallback,
        coverage,
    };

    let mut orchestrator = PipelineOrchestrator::new(config, root, options);
    let outcome = orchestrator.run().await;

    if json_mode {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    if !outcome.success {
        bail!("pipeline failed");
    }
    Ok(())
}

fn print_outcome(outcome: &PipelineOutcome) {
    println!(
        "Pipeline {} in {:.1}s",
        if outcome.success { "passed" } else { "failed" },
        outcome.duration_ms as f64 / 1000.0
    );
    for (key, value) in &outcome.results {
        println!("  {key}: {value}");
    }
    for warning in &outcome.warnings {
        println!("  warning: {warning}");
    }
    for error in &outcome.errors {
        println!("  error: {error}");
    }
}

async fn show_report(json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load()?;
    let store = JsonStateStore::new(&config.state_dir);

    let Some(outcome) = store.load::<PipelineOutcome>(keys::PIPELINE_RESULTS).await? else {
        bail!("no pipeline results recorded; run `helmsman pipeline run` first");
    };

    if json_mode {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}

async fn show_history(json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load()?;
    let store = JsonStateStore::new(&config.state_dir);
    let history = store
        .load::<TestHistory>(keys::TEST_HISTORY)
        .await?
        .unwrap_or_default();

    if json_mode {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    if history.entries.is_empty() {
        println!("No test history recorded");
        return Ok(());
    }
    println!("{} tests tracked:", history.entries.len());
    for (test_id, entry) in &history.entries {
        println!(
            "  {test_id}: {}/{} passed ({:.0}% over {:.0}ms avg)",
            entry.successes,
            entry.total_executions,
            entry.success_rate() * 100.0,
            entry.average_execution_time_ms,
        );
    }
    Ok(())
}

async fn cleanup(json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load()?;
    let store = JsonStateStore::new(&config.state_dir);

    for key in [
        keys::PORT_ALLOCATION,
        keys::TEST_HISTORY,
        keys::DEPENDENCY_MAPPING,
        keys::PIPELINE_RESULTS,
    ] {
        store.remove(key).await?;
    }

    if json_mode {
        println!("{}", serde_json::json!({ "cleaned": true }));
    } else {
        println!("Persisted pipeline state removed");
    }
    Ok(())
}
