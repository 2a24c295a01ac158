//! Resource governor.
//!
//! Samples memory/CPU/process metrics on a fixed interval into a
//! bounded ring buffer, raises violations on threshold crossings, and
//! derives a recommended parallelism so runners of different sizes
//! need no hand tuning. A critical violation ends the host process
//! when auto-termination is enabled, protecting the shared CI runner
//! from runaway jobs.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sysinfo::{
    CpuRefreshKind, MemoryRefreshKind, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System,
};
use tokio::sync::{broadcast, RwLock};
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::domain::errors::{PipelineError, PipelineResult};
use crate::domain::models::{
    ResourceConfig, ResourceSample, Violation, ViolationKind, ViolationSeverity,
};

/// Events broadcast by the governor.
#[derive(Debug, Clone)]
pub enum GovernorEvent {
    Sample(ResourceSample),
    Violation(Violation),
    Shutdown,
}

/// Evaluate one sample against the configured thresholds. Pure, so the
/// rules stay testable with synthetic samples.
pub fn evaluate_sample(config: &ResourceConfig, sample: &ResourceSample) -> Vec<Violation> {
    let mut violations = Vec::new();

    if sample.memory_utilization > config.memory_critical_threshold {
        violations.push(Violation::new(
            ViolationKind::Memory,
            ViolationSeverity::Critical,
            format!(
                "memory utilization {:.1}% above critical threshold {:.1}%",
                sample.memory_utilization * 100.0,
                config.memory_critical_threshold * 100.0
            ),
        ));
    } else if sample.memory_utilization > config.memory_alert_threshold {
        violations.push(Violation::new(
            ViolationKind::Memory,
            ViolationSeverity::Warning,
            format!(
                "memory utilization {:.1}% above alert threshold {:.1}%",
                sample.memory_utilization * 100.0,
                config.memory_alert_threshold * 100.0
            ),
        ));
    }

    let process_cap = (config.process_memory_cap_mb as f64 * 0.8) as u64;
    if sample.process_memory_mb > process_cap {
        violations.push(Violation::new(
            ViolationKind::ProcessMemory,
            ViolationSeverity::Warning,
            format!(
                "process resident memory {}MB above 80% of the {}MB cap",
                sample.process_memory_mb, config.process_memory_cap_mb
            ),
        ));
    }

    if sample.cpu_count > 0 && sample.load_average > 2.0 * sample.cpu_count as f64 {
        violations.push(Violation::new(
            ViolationKind::LoadAverage,
            ViolationSeverity::Warning,
            format!(
                "load average {:.2} above 2x core count ({})",
                sample.load_average, sample.cpu_count
            ),
        ));
    }

    violations
}

/// Recommended worker count:
/// `max(1, min(cpu_count, floor(memory_gb / 0.5), configured_max))`.
pub fn recommended_parallelism(cpu_count: usize, memory_gb: f64, configured_max: usize) -> usize {
    let by_memory = (memory_gb / 0.5).floor() as usize;
    cpu_count.min(by_memory).min(configured_max).max(1)
}

/// Background resource governor.
///
/// Uses tokio primitives for concurrent monitoring: `RwLock` for the
/// shared sampler state, a broadcast channel for one-to-many event
/// notification, an interval timer for the periodic task, and a
/// shutdown channel for deterministic teardown.
pub struct ResourceGovernor {
    config: ResourceConfig,
    system: Arc<RwLock<System>>,
    samples: Arc<RwLock<VecDeque<ResourceSample>>>,
    violations: Arc<RwLock<Vec<Violation>>>,
    event_tx: broadcast::Sender<GovernorEvent>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ResourceGovernor {
    pub fn new(config: ResourceConfig) -> Self {
        let refresh_kind = RefreshKind::new()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything())
            .with_processes(ProcessRefreshKind::everything());
        let system = System::new_with_specifics(refresh_kind);

        let (event_tx, _) = broadcast::channel(100);
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            system: Arc::new(RwLock::new(system)),
            samples: Arc::new(RwLock::new(VecDeque::new())),
            violations: Arc::new(RwLock::new(Vec::new())),
            event_tx,
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    /// Subscribe to governor events.
    pub fn subscribe(&self) -> broadcast::Receiver<GovernorEvent> {
        self.event_tx.subscribe()
    }

    fn read_sample(sys: &mut System) -> ResourceSample {
        sys.refresh_cpu_all();
        sys.refresh_memory();
        if let Ok(pid) = sysinfo::get_current_pid() {
            sys.refresh_processes(ProcessesToUpdate::Some(&[pid]));
        }

        let total = sys.total_memory().max(1);
        let used = sys.used_memory();
        let process_memory_mb = sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| sys.process(pid))
            .map_or(0, |p| p.memory() / 1024 / 1024);

        ResourceSample {
            timestamp: Utc::now(),
            memory_utilization: used as f64 / total as f64,
            cpu_percent: sys.global_cpu_usage(),
            load_average: System::load_average().one,
            cpu_count: sys.cpus().len(),
            process_memory_mb,
        }
    }

    /// Take one sample now, record it, and evaluate violations.
    pub async fn check_resources(&self) -> PipelineResult<ResourceSample> {
        let sample = {
            let mut sys = self.system.write().await;
            Self::read_sample(&mut sys)
        };
        self.record(&sample).await?;
        Ok(sample)
    }

    async fn record(&self, sample: &ResourceSample) -> PipelineResult<()> {
        {
            let mut samples = self.samples.write().await;
            samples.push_back(sample.clone());
            while samples.len() > self.config.history_size {
                samples.pop_front();
            }
        }

        let new_violations = evaluate_sample(&self.config, sample);
        let any_critical = new_violations
            .iter()
            .any(|v| v.severity == ViolationSeverity::Critical);

        if !new_violations.is_empty() {
            let mut violations = self.violations.write().await;
            for violation in &new_violations {
                error!(
                    kind = ?violation.kind,
                    severity = ?violation.severity,
                    "{}",
                    violation.message
                );
                let _ = self
                    .event_tx
                    .send(GovernorEvent::Violation(violation.clone()));
                violations.push(violation.clone());
            }
        }

        let _ = self.event_tx.send(GovernorEvent::Sample(sample.clone()));

        if any_critical && self.config.auto_terminate {
            error!("Critical resource violation with auto-termination enabled, ending process");
            std::process::exit(1);
        }

        Ok(())
    }

    /// Recommended parallelism from the machine this governor runs on.
    pub async fn recommend_parallelism(&self) -> usize {
        let (cpu_count, memory_gb) = {
            let mut sys = self.system.write().await;
            sys.refresh_cpu_all();
            sys.refresh_memory();
            (
                sys.cpus().len(),
                sys.available_memory() as f64 / (1024.0 * 1024.0 * 1024.0),
            )
        };
        recommended_parallelism(cpu_count, memory_gb, self.config.max_workers)
    }

    /// Samples currently retained.
    pub async fn sample_history(&self) -> Vec<ResourceSample> {
        self.samples.read().await.iter().cloned().collect()
    }

    /// Violations raised so far.
    pub async fn violations(&self) -> Vec<Violation> {
        self.violations.read().await.clone()
    }

    /// Start the periodic sampling task. Returns a JoinHandle that
    /// completes after shutdown.
    pub fn start(&self) -> tokio::task::JoinHandle<PipelineResult<()>> {
        let governor = self.clone_internals();
        let sample_interval = Duration::from_secs(self.config.sample_interval_secs.max(1));
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(sample_interval);
            info!(
                interval_secs = sample_interval.as_secs(),
                "Resource governor started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let sample = {
                            let mut sys = governor.system.write().await;
                            Self::read_sample(&mut sys)
                        };
                        governor.record(&sample).await?;
                        debug!(
                            memory = format!("{:.1}%", sample.memory_utilization * 100.0),
                            cpu = sample.cpu_percent,
                            "Resource sample recorded"
                        );
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Resource governor shutting down");
                        let _ = governor.event_tx.send(GovernorEvent::Shutdown);
                        break;
                    }
                }
            }
            Ok(())
        })
    }

    /// Broadcast the shutdown signal; use the JoinHandle from
    /// `start()` to wait for completion.
    pub fn shutdown(&self) -> PipelineResult<()> {
        self.shutdown_tx
            .send(())
            .map_err(|e| PipelineError::ExecutionFailed(format!("governor shutdown: {e}")))?;
        Ok(())
    }

    fn clone_internals(&self) -> Self {
        Self {
            config: self.config.clone(),
            system: Arc::clone(&self.system),
            samples: Arc::clone(&self.samples),
            violations: Arc::clone(&self.violations),
            event_tx: self.event_tx.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(memory_utilization: f64) -> ResourceSample {
        ResourceSample {
            timestamp: Utc::now(),
            memory_utilization,
            cpu_percent: 10.0,
            load_average: 1.0,
            cpu_count: 8,
            process_memory_mb: 100,
        }
    }

    #[test]
    fn test_sample_above_alert_raises_exactly_one_violation() {
        let config = ResourceConfig::default();
        let violations = evaluate_sample(&config, &sample(0.85));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::Memory);
        assert_eq!(violations[0].severity, ViolationSeverity::Warning);
    }

    #[test]
    fn test_sample_below_alert_raises_none() {
        let config = ResourceConfig::default();
        let violations = evaluate_sample(&config, &sample(0.5));
        assert!(violations.is_empty());
    }

    #[test]
    fn test_critical_memory_threshold() {
        let config = ResourceConfig::default();
        let violations = evaluate_sample(&config, &sample(0.97));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, ViolationSeverity::Critical);
    }

    #[test]
    fn test_process_memory_cap_violation() {
        let config = ResourceConfig::default();
        let mut s = sample(0.5);
        // Cap is 4096MB; 80% of it is 3276MB.
        s.process_memory_mb = 3500;
        let violations = evaluate_sample(&config, &s);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::ProcessMemory);
    }

    #[test]
    fn test_load_average_violation() {
        let config = ResourceConfig::default();
        let mut s = sample(0.5);
        s.load_average = 20.0;
        s.cpu_count = 8;
        let violations = evaluate_sample(&config, &s);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::LoadAverage);
    }

    #[test]
    fn test_recommended_parallelism_floors() {
        // Memory-bound: 1.6GB / 0.5 = 3 workers
        assert_eq!(recommended_parallelism(8, 1.6, 8), 3);
        // CPU-bound
        assert_eq!(recommended_parallelism(2, 16.0, 8), 2);
        // Config-bound
        assert_eq!(recommended_parallelism(16, 32.0, 4), 4);
        // Never below one
        assert_eq!(recommended_parallelism(1, 0.1, 8), 1);
    }

    #[tokio::test]
    async fn test_ring_buffer_is_bounded() {
        let config = ResourceConfig {
            history_size: 3,
            ..ResourceConfig::default()
        };
        let governor = ResourceGovernor::new(config);

        for _ in 0..5 {
            governor.check_resources().await.unwrap();
        }
        assert_eq!(governor.sample_history().await.len(), 3);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let config = ResourceConfig {
            sample_interval_secs: 1,
            ..ResourceConfig::default()
        };
        let governor = ResourceGovernor::new(config);
        let mut events = governor.subscribe();

        let handle = governor.start();
        governor.shutdown().unwrap();

        let shutdown_seen = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match events.recv().await {
                    Ok(GovernorEvent::Shutdown) => return true,
                    Ok(_) => continue,
                    Err(_) => return false,
                }
            }
        })
        .await
        .unwrap_or(false);

        assert!(shutdown_seen, "Should receive shutdown event");
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("Timeout waiting for governor shutdown")
            .expect("Governor task panicked")
            .expect("Governor returned error");
    }
}
