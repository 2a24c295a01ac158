//! Helmsman CLI entry point.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use helmsman::cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose() { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match cli.command {
        Commands::Pipeline(args) => helmsman::cli::commands::pipeline::execute(args, cli.json).await,
        Commands::Simulator(args) => {
            helmsman::cli::commands::simulator::execute(args, cli.json).await
        }
        Commands::Flaky(args) => helmsman::cli::commands::flaky::execute(args, cli.json).await,
        Commands::Select(args) => helmsman::cli::commands::select::execute(args, cli.json).await,
        Commands::Resources(args) => {
            helmsman::cli::commands::resources::execute(args, cli.json).await
        }
    };

    if let Err(err) = result {
        helmsman::cli::handle_error(err, cli.json);
    }
}
