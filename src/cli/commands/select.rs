//! Selective testing CLI commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::domain::models::DependencyMapping;
use crate::domain::ports::{keys, StateStoreExt, Vcs};
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::git::GitCli;
use crate::infrastructure::store::JsonStateStore;
use crate::services::dependency_graph::DependencyGraphIndexer;
use crate::services::selection::{Selection, TestSelector};

#[derive(Args, Debug)]
pub struct SelectArgs {
    #[command(subcommand)]
    pub command: SelectCommand,
}

#[derive(Subcommand, Debug)]
pub enum SelectCommand {
    /// Analyze the current diff and print the selected test set
    Analyze {
        /// Pull-request base ref
        #[arg(long)]
        base: Option<String>,
    },
}

pub async fn execute(args: SelectArgs, json_mode: bool) -> Result<()> {
    let SelectCommand::Analyze { base } = args.command;

    let config = ConfigLoader::load()?;
    let root = std::env::current_dir().context("resolving working directory")?;
    let store = JsonStateStore::new(root.join(&config.state_dir));

    let indexer = DependencyGraphIndexer::new(config.selection.clone(), &root);
    let all_tests = indexer.enumerate_test_files()?;

    let mapping = match store
        .load::<DependencyMapping>(keys::DEPENDENCY_MAPPING)
        .await?
    {
        Some(mapping)
            if !mapping.is_stale(config.selection.mapping_max_age_hours, chrono::Utc::now()) =>
        {
            mapping
        }
        _ => {
            let mapping = indexer.build()?;
            store.save(keys::DEPENDENCY_MAPPING, &mapping).await?;
            mapping
        }
    };

    let selector = TestSelector::new(config.selection.clone());
    let vcs = GitCli::new(&root);
    let target = selector.resolve_diff_target(&vcs, base.as_deref()).await?;
    let changed = vcs.changed_files(&target).await?;
    let selection = selector.select(&changed, &mapping, &all_tests);

    match selection {
        Selection::Full => {
            if json_mode {
                println!(
                    "{}",
                    serde_json::json!({ "mode": "full", "total": all_tests.len() })
                );
            } else {
                println!("Full run: all {} tests", all_tests.len());
            }
        }
        Selection::Subset(selected) => {
            if json_mode {
                println!(
                    "{}",
                    serde_json::json!({
                        "mode": "selective",
                        "selected": selected,
                        "total": all_tests.len(),
                        "changed": changed,
                    })
                );
            } else {
                println!(
                    "Selected {} of {} tests from {} changed files:",
                    selected.len(),
                    all_tests.len(),
                    changed.len()
                );
                for test in &selected {
                    println!("  {test}");
                }
            }
        }
    }
    Ok(())
}
