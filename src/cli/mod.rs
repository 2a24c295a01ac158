//! Helmsman CLI surface.

pub mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "helmsman", version, about = "CI/CD test orchestration for marine instrument apps")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Pipeline runs, reports, history, and cleanup
    Pipeline(commands::pipeline::PipelineArgs),

    /// Data-simulator lifecycle management
    Simulator(commands::simulator::SimulatorArgs),

    /// Flaky test analysis and history
    Flaky(commands::flaky::FlakyArgs),

    /// Selective test analysis
    Select(commands::select::SelectArgs),

    /// Resource sampling and parallelism sizing
    Resources(commands::resources::ResourcesArgs),
}

impl Cli {
    /// Whether the invoked command asked for debug-level logging.
    /// Checked before the tracing subscriber is installed.
    pub fn verbose(&self) -> bool {
        matches!(
            &self.command,
            Commands::Pipeline(args) if matches!(
                &args.command,
                commands::pipeline::PipelineCommand::Run { verbose: true, .. }
            )
        )
    }
}

/// Print an error in the requested format and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let doc = serde_json::json!({ "error": err.to_string() });
        eprintln!("{doc}");
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
