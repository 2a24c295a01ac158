//! Simulator lifecycle CLI commands.
//!
//! `start` keeps the simulator in the foreground (with its health
//! monitor armed) and records pid/ports in the state store so `stop`,
//! `status`, and `restart` work from a different invocation.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::models::{Config, PortTriple};
use crate::domain::ports::{keys, StateStore, StateStoreExt};
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::store::JsonStateStore;
use crate::services::simulator::SimulatorLifecycleManager;

#[derive(Args, Debug)]
pub struct SimulatorArgs {
    #[command(subcommand)]
    pub command: SimulatorCommand,
}

#[derive(Subcommand, Debug)]
pub enum SimulatorCommand {
    /// Start the simulator and keep it running
    Start {
        /// Scenario to play
        #[arg(long)]
        scenario: Option<String>,

        /// Stop automatically after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Replay the scenario continuously until stopped
        #[arg(long = "loop")]
        loop_playback: bool,
    },
    /// Stop a simulator started by a previous invocation
    Stop,
    /// Show simulator status and probe its health endpoint
    Status,
    /// Stop then start the simulator
    Restart {
        /// Scenario to play
        #[arg(long)]
        scenario: Option<String>,
    },
}

/// Persisted record of a foreground-started simulator.
#[derive(Debug, Serialize, Deserialize)]
struct SimulatorStatusDoc {
    pid: u32,
    ports: PortTriple,
    scenario: String,
    started_at: DateTime<Utc>,
}

pub async fn execute(args: SimulatorArgs, json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load()?;
    match args.command {
        SimulatorCommand::Start {
            scenario,
            duration,
            loop_playback,
        } => start(&config, scenario, duration, loop_playback, json_mode).await,
        SimulatorCommand::Stop => stop(&config, json_mode).await,
        SimulatorCommand::Status => status(&config, json_mode).await,
        SimulatorCommand::Restart { scenario } => {
            if let Err(e) = stop(&config, json_mode).await {
                tracing::warn!(error = %e, "No running simulator to stop");
            }
            start(&config, scenario, None, false, json_mode).await
        }
    }
}

async fn start(
    config: &Config,
    scenario: Option<String>,
    duration: Option<u64>,
    loop_playback: bool,
    json_mode: bool,
) -> Result<()> {
    let scenario = scenario.unwrap_or_else(|| config.simulator.scenario.clone());
    let store = JsonStateStore::new(&config.state_dir);

    let mut simulator_config = config.simulator.clone();
    simulator_config.loop_playback = simulator_config.loop_playback || loop_playback;
    let mut manager = SimulatorLifecycleManager::new(simulator_config, config.ports.clone());
    let ports = manager.start(&scenario).await?;
    manager.start_monitor();

    let pid = manager.pid().context("simulator has no pid after start")?;
    store
        .save(
            keys::SIMULATOR_STATUS,
            &SimulatorStatusDoc {
                pid,
                ports,
                scenario: scenario.clone(),
                started_at: Utc::now(),
            },
        )
        .await?;

    if json_mode {
        println!(
            "{}",
            serde_json::json!({ "pid": pid, "ports": ports.as_array(), "scenario": scenario })
        );
    } else {
        println!(
            "Simulator running (pid {pid}, nmea {}, api {}, transport {})",
            ports.data_stream, ports.api, ports.transport
        );
    }

    match duration {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => {
            tokio::signal::ctrl_c()
                .await
                .context("waiting for interrupt")?;
        }
    }

    manager.stop().await?;
    store.remove(keys::SIMULATOR_STATUS).await?;
    Ok(())
}

async fn stop(config: &Config, json_mode: bool) -> Result<()> {
    let store = JsonStateStore::new(&config.state_dir);
    let Some(doc) = store
        .load::<SimulatorStatusDoc>(keys::SIMULATOR_STATUS)
        .await?
    else {
        bail!("no running simulator recorded");
    };

    kill(Pid::from_raw(doc.pid as i32), Signal::SIGTERM)
        .with_context(|| format!("signalling simulator pid {}", doc.pid))?;
    store.remove(keys::SIMULATOR_STATUS).await?;

    if json_mode {
        println!("{}", serde_json::json!({ "stopped": doc.pid }));
    } else {
        println!("Stopped simulator pid {}", doc.pid);
    }
    Ok(())
}

async fn status(config: &Config, json_mode: bool) -> Result<()> {
    let store = JsonStateStore::new(&config.state_dir);
    let Some(doc) = store
        .load::<SimulatorStatusDoc>(keys::SIMULATOR_STATUS)
        .await?
    else {
        if json_mode {
            println!("{}", serde_json::json!({ "running": false }));
        } else {
            println!("Simulator not running");
        }
        return Ok(());
    };

    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/status", doc.ports.api);
    let healthy = matches!(
        client
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await,
        Ok(resp) if resp.status().is_success()
    );

    if json_mode {
        println!(
            "{}",
            serde_json::json!({
                "running": true,
                "healthy": healthy,
                "pid": doc.pid,
                "ports": doc.ports.as_array(),
                "scenario": doc.scenario,
                "started_at": doc.started_at,
            })
        );
    } else {
        println!(
            "Simulator pid {} scenario {} since {} ({})",
            doc.pid,
            doc.scenario,
            doc.started_at.format("%Y-%m-%d %H:%M:%S"),
            if healthy { "healthy" } else { "unhealthy" }
        );
    }
    Ok(())
}
