//! Flaky test CLI commands.

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::domain::models::TestHistory;
use crate::domain::ports::{keys, StateStoreExt};
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::store::JsonStateStore;
use crate::services::flaky::FlakyClassifier;

#[derive(Args, Debug)]
pub struct FlakyArgs {
    #[command(subcommand)]
    pub command: FlakyCommand,
}

#[derive(Subcommand, Debug)]
pub enum FlakyCommand {
    /// Classify a failure as flaky or genuine
    Analyze {
        /// Test identifier (file path or name)
        test_id: String,

        /// Captured failure output to classify
        #[arg(long, default_value = "")]
        error_text: String,
    },
    /// List tests with flaky success rates
    Report,
    /// Show the active flaky-detection configuration
    Config,
    /// Prune stale history entries
    Cleanup,
}

pub async fn execute(args: FlakyArgs, json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load()?;
    let store = JsonStateStore::new(&config.state_dir);

    let mut classifier = FlakyClassifier::new(config.flaky.clone());
    if let Some(history) = store.load::<TestHistory>(keys::TEST_HISTORY).await? {
        classifier.load_history(history);
    }

    match args.command {
        FlakyCommand::Analyze { test_id, error_text } => {
            let verdict = classifier.analyze_failure(&test_id, &error_text);
            if json_mode {
                println!("{}", serde_json::to_string_pretty(&verdict)?);
            } else {
                println!(
                    "{test_id}: {} (confidence {:.2}) {}",
                    if verdict.is_flaky { "flaky" } else { "genuine" },
                    verdict.confidence,
                    verdict.reason,
                );
            }
        }
        FlakyCommand::Report => {
            let report = classifier.report();
            if json_mode {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.is_empty() {
                println!("No flaky tests detected");
            } else {
                for entry in report {
                    println!(
                        "{}: {:.0}% success over {} runs [{:?}] {}",
                        entry.test_id,
                        entry.success_rate * 100.0,
                        entry.total_executions,
                        entry.severity,
                        entry.recommendation,
                    );
                }
            }
        }
        FlakyCommand::Config => {
            if json_mode {
                println!("{}", serde_json::to_string_pretty(&config.flaky)?);
            } else {
                println!("{}", serde_yaml::to_string(&config.flaky)?);
            }
        }
        FlakyCommand::Cleanup => {
            let pruned = classifier.prune_history();
            store.save(keys::TEST_HISTORY, classifier.history()).await?;
            if json_mode {
                println!("{}", serde_json::json!({ "pruned": pruned }));
            } else {
                println!("Pruned {pruned} stale history entries");
            }
        }
    }
    Ok(())
}
