//! Test session manager.
//!
//! A session pairs one simulator process with one test-runner process
//! on a dedicated port triple. The simulator is started and
//! health-checked to completion before the runner spawns, so the two
//! startups never race. Sessions above `max_parallel` are rejected
//! outright; queueing would oversubscribe a CI runner.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::errors::{PipelineError, PipelineResult};
use crate::domain::models::{
    Config, PortTriple, SessionOutcome, SessionRecord, SessionSpec,
};
use crate::infrastructure::process::ManagedProcess;
use crate::services::ports::PortAllocator;
use crate::services::simulator::SimulatorLifecycleManager;

/// A started session, owning both processes. `run` drives it to a
/// terminal `SessionRecord`; sessions can run concurrently because
/// each owns disjoint ports and processes.
pub struct ActiveSession {
    pub id: Uuid,
    spec: SessionSpec,
    ports: PortTriple,
    simulator: SimulatorLifecycleManager,
    runner: ManagedProcess,
    started_at: chrono::DateTime<Utc>,
    timeout: Duration,
    grace: Duration,
}

impl ActiveSession {
    /// Wait for the runner under the session timeout; on expiry the
    /// runner is force-stopped. The simulator is stopped either way
    /// and the record retained for reporting.
    pub async fn run(mut self) -> SessionRecord {
        let (exit_code, outcome) =
            match tokio::time::timeout(self.timeout, self.runner.wait()).await {
                Ok(Ok(code)) => {
                    let outcome = if code == Some(0) {
                        SessionOutcome::Passed
                    } else {
                        SessionOutcome::Failed
                    };
                    (code, outcome)
                }
                Ok(Err(e)) => {
                    warn!(session_id = %self.id, error = %e, "Error waiting for test runner");
                    (None, SessionOutcome::Failed)
                }
                Err(_) => {
                    warn!(
                        session_id = %self.id,
                        timeout_secs = self.timeout.as_secs(),
                        "Session timed out, force-stopping runner"
                    );
                    let code = self.runner.stop(self.grace).await.unwrap_or(None);
                    (code, SessionOutcome::TimedOut)
                }
            };

        if let Err(e) = self.simulator.stop().await {
            warn!(session_id = %self.id, error = %e, "Error stopping session simulator");
        }

        let (stdout, stderr) = self.runner.into_output().await;

        info!(
            session_id = %self.id,
            name = %self.spec.name,
            outcome = ?outcome,
            exit_code = ?exit_code,
            "Session finished"
        );

        SessionRecord {
            id: self.id,
            spec: self.spec,
            ports: self.ports,
            started_at: self.started_at,
            ended_at: Some(Utc::now()),
            exit_code,
            outcome,
            stdout,
            stderr,
        }
    }

    /// Whether the simulator's background health monitor is armed.
    pub fn monitor_armed(&self) -> bool {
        self.simulator.monitor_armed()
    }

    /// Stop both processes without waiting for the runner to finish.
    pub async fn abort(mut self) -> SessionRecord {
        let code = self.runner.stop(self.grace).await.unwrap_or(None);
        if let Err(e) = self.simulator.stop().await {
            warn!(session_id = %self.id, error = %e, "Error stopping session simulator");
        }
        let (stdout, stderr) = self.runner.into_output().await;

        SessionRecord {
            id: self.id,
            spec: self.spec,
            ports: self.ports,
            started_at: self.started_at,
            ended_at: Some(Utc::now()),
            exit_code: code,
            outcome: SessionOutcome::Failed,
            stdout,
            stderr,
        }
    }
}

/// Allocates ports, starts session process pairs, and retains records
/// of finished sessions for reporting.
pub struct SessionManager {
    config: Config,
    allocator: PortAllocator,
    live: HashMap<Uuid, PortTriple>,
    records: Vec<SessionRecord>,
}

impl SessionManager {
    pub fn new(config: Config) -> Self {
        let allocator = PortAllocator::new(config.ports.clone());
        Self {
            config,
            allocator,
            live: HashMap::new(),
            records: Vec::new(),
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn records(&self) -> &[SessionRecord] {
        &self.records
    }

    pub fn take_records(&mut self) -> Vec<SessionRecord> {
        std::mem::take(&mut self.records)
    }

    /// Port snapshot for persistence.
    pub fn port_snapshot(&self) -> HashMap<Uuid, PortTriple> {
        self.allocator.snapshot()
    }

    /// Start one session: allocate ports, boot the simulator to
    /// Running, then spawn the runner with ports and session id in its
    /// environment.
    pub async fn start_session(&mut self, spec: SessionSpec) -> PipelineResult<ActiveSession> {
        if self.live.len() >= self.config.session.max_parallel {
            return Err(PipelineError::SessionLimitReached {
                active: self.live.len(),
                max: self.config.session.max_parallel,
            });
        }

        let id = Uuid::new_v4();
        let ports = self.allocator.allocate(id).await?;

        let mut simulator = SimulatorLifecycleManager::new(
            self.config.simulator.clone(),
            self.config.ports.clone(),
        );
        if let Err(e) = simulator.start_with_ports(&spec.scenario, ports).await {
            self.allocator.release(id);
            return Err(e);
        }
        simulator.start_monitor();

        let mut command = Command::new(&self.config.session.runner_command);
        command
            .args(&self.config.session.runner_args)
            .args(&spec.test_files)
            .env("HELMSMAN_SESSION_ID", id.to_string())
            .env("NMEA_PORT", ports.data_stream.to_string())
            .env("SIMULATOR_API_PORT", ports.api.to_string())
            .env("TRANSPORT_PORT", ports.transport.to_string());

        let runner = match ManagedProcess::spawn(&format!("runner-{}", spec.name), &mut command) {
            Ok(r) => r,
            Err(e) => {
                let _ = simulator.stop().await;
                self.allocator.release(id);
                return Err(e);
            }
        };

        self.live.insert(id, ports);
        info!(
            session_id = %id,
            name = %spec.name,
            tests = spec.test_files.len(),
            "Session started"
        );

        Ok(ActiveSession {
            id,
            spec,
            ports,
            simulator,
            runner,
            started_at: Utc::now(),
            timeout: Duration::from_secs(self.config.session.timeout_secs),
            grace: Duration::from_secs(self.config.session.grace_period_secs),
        })
    }

    /// Record a finished session and free its ports.
    pub fn finish_session(&mut self, record: SessionRecord) {
        self.live.remove(&record.id);
        self.allocator.release(record.id);
        self.records.push(record);
    }

    /// Abort any still-active sessions handed back to the manager and
    /// clear all allocations. Called from forced cleanup.
    pub async fn stop_all(&mut self, active: Vec<ActiveSession>) {
        for session in active {
            let record = session.abort().await;
            self.finish_session(record);
        }
        self.live.clear();
        self.allocator.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Config;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.session.max_parallel = 2;
        // A runner that exits immediately keeps these tests hermetic.
        config.session.runner_command = "true".to_string();
        config.session.runner_args = vec![];
        config
    }

    #[test]
    fn test_session_limit_is_hard() {
        let mut manager = SessionManager::new(test_config());
        manager.live.insert(Uuid::new_v4(), PortTriple {
            data_stream: 1,
            api: 2,
            transport: 3,
        });
        manager.live.insert(Uuid::new_v4(), PortTriple {
            data_stream: 4,
            api: 5,
            transport: 6,
        });

        let spec = SessionSpec::new("overflow", vec![], "calm-harbor");
        let result = futures::executor::block_on(manager.start_session(spec));
        assert!(matches!(
            result,
            Err(PipelineError::SessionLimitReached { active: 2, max: 2 })
        ));
    }

    #[tokio::test]
    async fn test_start_session_arms_health_monitor() {
        let mut config = test_config();
        config.session.runner_command = "sleep".to_string();
        config.session.runner_args = vec!["60".to_string()];
        config.ports.data_stream_base = 49110;
        config.ports.api_base = 49310;
        config.ports.transport_base = 49510;
        // `sh -c` discards the generated scenario/port flags as
        // positional parameters.
        config.simulator.command = "sh".to_string();
        config.simulator.args = vec!["-c".to_string(), "sleep 60".to_string()];
        config.simulator.startup_timeout_secs = 5;
        config.simulator.health_check_interval_ms = 100;
        // Long enough that the monitor never probes during this test.
        config.simulator.monitor_interval_secs = 600;

        // Minimal status endpoint on the session's api port; binding
        // retries until the allocator's probe has released it.
        let server = tokio::spawn(async {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let listener = loop {
                match tokio::net::TcpListener::bind(("127.0.0.1", 49310)).await {
                    Ok(l) => break l,
                    Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
                }
            };
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    continue;
                };
                let mut buf = [0u8; 512];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok",
                    )
                    .await;
            }
        });

        let mut manager = SessionManager::new(config);
        let spec = SessionSpec::new("monitored", vec![], "calm-harbor");
        let session = manager.start_session(spec).await.unwrap();

        assert!(session.monitor_armed());

        let record = session.abort().await;
        manager.finish_session(record);
        server.abort();
    }

    #[test]
    fn test_finish_session_retains_record() {
        let mut manager = SessionManager::new(test_config());
        let id = Uuid::new_v4();
        manager.live.insert(id, PortTriple {
            data_stream: 1,
            api: 2,
            transport: 3,
        });

        let record = SessionRecord {
            id,
            spec: SessionSpec::new("widgets", vec![], "calm-harbor"),
            ports: PortTriple {
                data_stream: 1,
                api: 2,
                transport: 3,
            },
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
            exit_code: Some(0),
            outcome: SessionOutcome::Passed,
            stdout: String::new(),
            stderr: String::new(),
        };
        manager.finish_session(record);

        assert_eq!(manager.live_count(), 0);
        assert_eq!(manager.records().len(), 1);
        assert_eq!(manager.records()[0].outcome, SessionOutcome::Passed);
    }
}
