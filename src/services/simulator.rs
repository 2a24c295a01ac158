//! Data-simulator lifecycle manager.
//!
//! Drives the external simulator process through an explicit state
//! machine: `Stopped -> Starting -> HealthChecking -> Running ->
//! Stopping -> Stopped`. While Running, a background monitor re-probes
//! health; a failed probe force-stops the simulator and terminates the
//! host pipeline, because continuing against a dead data source is
//! unsafe rather than recoverable.

use std::time::Duration;

use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::errors::{PipelineError, PipelineResult};
use crate::domain::models::{PortConfig, PortTriple, SimulatorConfig};
use crate::infrastructure::process::ManagedProcess;
use crate::services::ports::scan_port;

/// Grace window between SIGTERM and force-kill on shutdown.
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Lifecycle states of the managed simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorState {
    Stopped,
    Starting,
    HealthChecking,
    Running,
    Stopping,
}

impl SimulatorState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::HealthChecking => "health_checking",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for SimulatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Manages one simulator process.
pub struct SimulatorLifecycleManager {
    config: SimulatorConfig,
    port_config: PortConfig,
    client: reqwest::Client,
    state: SimulatorState,
    process: Option<ManagedProcess>,
    ports: Option<PortTriple>,
    monitor: Option<JoinHandle<()>>,
}

impl SimulatorLifecycleManager {
    pub fn new(config: SimulatorConfig, port_config: PortConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            config,
            port_config,
            client,
            state: SimulatorState::Stopped,
            process: None,
            ports: None,
            monitor: None,
        }
    }

    pub fn state(&self) -> SimulatorState {
        self.state
    }

    pub fn ports(&self) -> Option<PortTriple> {
        self.ports
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(ManagedProcess::id)
    }

    pub fn monitor_armed(&self) -> bool {
        self.monitor.is_some()
    }

    fn ensure_stopped(&self, to: SimulatorState) -> PipelineResult<()> {
        if self.state == SimulatorState::Stopped {
            Ok(())
        } else {
            Err(PipelineError::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// Start with a sequential per-service port scan from the
    /// configured bases. Used by the standalone simulator CLI.
    pub async fn start(&mut self, scenario: &str) -> PipelineResult<PortTriple> {
        self.ensure_stopped(SimulatorState::Starting)?;
        self.state = SimulatorState::Starting;

        let retries = self.port_config.max_scan_retries;
        let ports = match self.scan_all(retries).await {
            Ok(ports) => ports,
            Err(e) => {
                self.state = SimulatorState::Stopped;
                return Err(e);
            }
        };

        self.launch(scenario, ports).await?;
        Ok(ports)
    }

    /// Start on a pre-allocated triple. Used by the session manager,
    /// which owns spacing and probing at its own layer.
    pub async fn start_with_ports(
        &mut self,
        scenario: &str,
        ports: PortTriple,
    ) -> PipelineResult<()> {
        self.ensure_stopped(SimulatorState::Starting)?;
        self.state = SimulatorState::Starting;
        self.launch(scenario, ports).await
    }

    async fn scan_all(&self, retries: u32) -> PipelineResult<PortTriple> {
        let data_stream =
            scan_port("data-stream", self.port_config.data_stream_base, retries).await?;
        let api = scan_port("api", self.port_config.api_base, retries).await?;
        let transport = scan_port("transport", self.port_config.transport_base, retries).await?;
        Ok(PortTriple {
            data_stream,
            api,
            transport,
        })
    }

    async fn launch(&mut self, scenario: &str, ports: PortTriple) -> PipelineResult<()> {
        info!(
            scenario = scenario,
            data_stream = ports.data_stream,
            api = ports.api,
            transport = ports.transport,
            "Starting simulator"
        );

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .arg("--scenario")
            .arg(scenario)
            .arg("--nmea-port")
            .arg(ports.data_stream.to_string())
            .arg("--api-port")
            .arg(ports.api.to_string())
            .arg("--transport-port")
            .arg(ports.transport.to_string());
        if self.config.loop_playback {
            command.arg("--loop");
        }
        command.arg("--mode").arg("ci");

        let process = match ManagedProcess::spawn("simulator", &mut command) {
            Ok(p) => p,
            Err(e) => {
                self.state = SimulatorState::Stopped;
                return Err(e);
            }
        };

        self.process = Some(process);
        self.ports = Some(ports);
        self.state = SimulatorState::HealthChecking;

        if let Err(e) = self.await_healthy(ports.api).await {
            warn!(error = %e, "Simulator failed health checking, tearing down");
            self.stop().await?;
            return Err(e);
        }

        self.state = SimulatorState::Running;
        info!(api_port = ports.api, "Simulator running");
        Ok(())
    }

    /// Poll the status endpoint every `health_check_interval_ms` until
    /// it answers, bounded by `startup_timeout_secs / interval` attempts.
    async fn await_healthy(&self, api_port: u16) -> PipelineResult<()> {
        let interval = Duration::from_millis(self.config.health_check_interval_ms.max(1));
        let attempts =
            (self.config.startup_timeout_secs * 1000 / self.config.health_check_interval_ms.max(1))
                .max(1);

        for attempt in 1..=attempts {
            if self.probe_health(api_port).await {
                debug!(attempt = attempt, "Simulator health check passed");
                return Ok(());
            }
            tokio::time::sleep(interval).await;
        }

        Err(PipelineError::StartupTimeout {
            elapsed_secs: self.config.startup_timeout_secs,
        })
    }

    async fn probe_health(&self, api_port: u16) -> bool {
        let url = format!("http://127.0.0.1:{api_port}/status");
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// One-off health probe of the running simulator.
    pub async fn health_check(&self) -> bool {
        match self.ports {
            Some(ports) if self.state == SimulatorState::Running => {
                self.probe_health(ports.api).await
            }
            _ => false,
        }
    }

    /// Arm the background health monitor. Any probe failure while
    /// Running force-stops the simulator and, when configured, ends
    /// the host process with a non-zero exit.
    pub fn start_monitor(&mut self) {
        let Some(ports) = self.ports else { return };
        let Some(pid) = self.pid() else { return };
        if self.monitor.is_some() {
            return;
        }

        let client = self.client.clone();
        let interval = Duration::from_secs(self.config.monitor_interval_secs.max(1));
        let fail_fast = self.config.fail_fast_on_unhealthy;
        let api_port = ports.api;

        self.monitor = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately; skip it so the monitor
            // starts one interval after arming.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let url = format!("http://127.0.0.1:{api_port}/status");
                let healthy = match client.get(&url).send().await {
                    Ok(resp) => resp.status().is_success(),
                    Err(_) => false,
                };
                if !healthy {
                    error!(
                        api_port = api_port,
                        "Simulator health monitor failed, terminating pipeline"
                    );
                    let _ = nix::sys::signal::kill(
                        nix::unistd::Pid::from_raw(pid as i32),
                        nix::sys::signal::Signal::SIGTERM,
                    );
                    if fail_fast {
                        std::process::exit(1);
                    }
                    break;
                }
            }
        }));
    }

    /// Graceful stop: disarm the monitor, SIGTERM the process, wait a
    /// grace window, force-kill if still alive.
    pub async fn stop(&mut self) -> PipelineResult<()> {
        if self.state == SimulatorState::Stopped {
            return Ok(());
        }
        self.state = SimulatorState::Stopping;

        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }

        if let Some(mut process) = self.process.take() {
            match process.stop(STOP_GRACE).await {
                Ok(code) => info!(exit_code = ?code, "Simulator stopped"),
                Err(e) => warn!(error = %e, "Error stopping simulator"),
            }
        }

        self.ports = None;
        self.state = SimulatorState::Stopped;
        Ok(())
    }
}

impl Drop for SimulatorLifecycleManager {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
        // The child itself is killed by kill_on_drop.
    }
}
