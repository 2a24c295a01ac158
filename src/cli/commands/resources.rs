//! Resource governor CLI commands.

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::infrastructure::config::ConfigLoader;
use crate::services::resources::ResourceGovernor;

#[derive(Args, Debug)]
pub struct ResourcesArgs {
    #[command(subcommand)]
    pub command: ResourcesCommand,
}

#[derive(Subcommand, Debug)]
pub enum ResourcesCommand {
    /// Take one resource sample and report violations
    Status,
    /// Print the recommended session parallelism for this machine
    Recommend,
}

pub async fn execute(args: ResourcesArgs, json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load()?;
    let governor = ResourceGovernor::new(config.resources.clone());

    match args.command {
        ResourcesCommand::Status => {
            let sample = governor.check_resources().await?;
            let violations = governor.violations().await;

            if json_mode {
                println!(
                    "{}",
                    serde_json::json!({ "sample": sample, "violations": violations })
                );
            } else {
                println!(
                    "Memory {:.1}%, CPU {:.1}%, load {:.2} on {} cores, process {}MB",
                    sample.memory_utilization * 100.0,
                    sample.cpu_percent,
                    sample.load_average,
                    sample.cpu_count,
                    sample.process_memory_mb,
                );
                if violations.is_empty() {
                    println!("No violations");
                } else {
                    for violation in violations {
                        println!("  [{:?}] {}", violation.severity, violation.message);
                    }
                }
            }
        }
        ResourcesCommand::Recommend => {
            let workers = governor.recommend_parallelism().await;
            if json_mode {
                println!("{}", serde_json::json!({ "recommended_parallelism": workers }));
            } else {
                println!("Recommended parallelism: {workers}");
            }
        }
    }
    Ok(())
}
