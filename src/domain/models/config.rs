use serde::{Deserialize, Serialize};

/// Main configuration structure for Helmsman.
///
/// Every threshold the pipeline consults lives here so it can be
/// overridden from YAML config files or `HELMSMAN_`-prefixed
/// environment variables without a code change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Directory holding persisted pipeline state (JSON files)
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Directory where generated reports are written
    #[serde(default = "default_reports_dir")]
    pub reports_dir: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Feature flags gating optional pipeline phases
    #[serde(default)]
    pub features: FeatureFlags,

    /// Test session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Port allocation configuration
    #[serde(default)]
    pub ports: PortConfig,

    /// Data-simulator lifecycle configuration
    #[serde(default)]
    pub simulator: SimulatorConfig,

    /// Flaky classification and retry configuration
    #[serde(default)]
    pub flaky: FlakyConfig,

    /// Resource governor configuration
    #[serde(default)]
    pub resources: ResourceConfig,

    /// Quality gate configuration
    #[serde(default)]
    pub quality: QualityConfig,

    /// Selective test selection configuration
    #[serde(default)]
    pub selection: SelectionConfig,
}

fn default_state_dir() -> String {
    ".helmsman".to_string()
}

fn default_reports_dir() -> String {
    "reports".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            reports_dir: default_reports_dir(),
            logging: LoggingConfig::default(),
            features: FeatureFlags::default(),
            session: SessionConfig::default(),
            ports: PortConfig::default(),
            simulator: SimulatorConfig::default(),
            flaky: FlakyConfig::default(),
            resources: ResourceConfig::default(),
            quality: QualityConfig::default(),
            selection: SelectionConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Feature flags gating the optional pipeline phases.
///
/// Disabled phases are skipped entirely; the mandatory phases
/// (setup, test-execution, cleanup) always run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FeatureFlags {
    #[serde(default = "default_true")]
    pub resource_optimization: bool,

    #[serde(default = "default_true")]
    pub simulator_setup: bool,

    #[serde(default = "default_true")]
    pub quality_gates: bool,

    #[serde(default = "default_true")]
    pub reporting: bool,

    #[serde(default = "default_true")]
    pub selective_testing: bool,

    #[serde(default = "default_true")]
    pub parallel_sessions: bool,
}

const fn default_true() -> bool {
    true
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            resource_optimization: true,
            simulator_setup: true,
            quality_gates: true,
            reporting: true,
            selective_testing: true,
            parallel_sessions: true,
        }
    }
}

/// Test session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Maximum concurrently live sessions; exceeding this is a hard
    /// rejection, not a queue
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Per-session wall-clock timeout in seconds
    #[serde(default = "default_session_timeout")]
    pub timeout_secs: u64,

    /// Grace window between SIGTERM and force-kill, in seconds
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    /// Test-runner command
    #[serde(default = "default_runner_command")]
    pub runner_command: String,

    /// Arguments prepended before the test file list
    #[serde(default = "default_runner_args")]
    pub runner_args: Vec<String>,
}

const fn default_max_parallel() -> usize {
    4
}

const fn default_session_timeout() -> u64 {
    300
}

const fn default_grace_period() -> u64 {
    10
}

fn default_runner_command() -> String {
    "npx".to_string()
}

fn default_runner_args() -> Vec<String> {
    vec!["jest".to_string(), "--runInBand".to_string()]
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            timeout_secs: default_session_timeout(),
            grace_period_secs: default_grace_period(),
            runner_command: default_runner_command(),
            runner_args: default_runner_args(),
        }
    }
}

/// Port allocation configuration.
///
/// Each session gets a triple of ports spaced `session_spacing` apart
/// per service, so concurrent sessions never collide.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PortConfig {
    /// Base port for the NMEA data stream service
    #[serde(default = "default_data_stream_base")]
    pub data_stream_base: u16,

    /// Base port for the simulator HTTP API
    #[serde(default = "default_api_base")]
    pub api_base: u16,

    /// Base port for the transport/websocket service
    #[serde(default = "default_transport_base")]
    pub transport_base: u16,

    /// Port spacing between session ordinals
    #[serde(default = "default_session_spacing")]
    pub session_spacing: u16,

    /// Bounded retry count for the simulator's sequential port scan
    #[serde(default = "default_max_scan_retries")]
    pub max_scan_retries: u32,
}

const fn default_data_stream_base() -> u16 {
    10110
}

const fn default_api_base() -> u16 {
    3100
}

const fn default_transport_base() -> u16 {
    8180
}

const fn default_session_spacing() -> u16 {
    10
}

const fn default_max_scan_retries() -> u32 {
    20
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            data_stream_base: default_data_stream_base(),
            api_base: default_api_base(),
            transport_base: default_transport_base(),
            session_spacing: default_session_spacing(),
            max_scan_retries: default_max_scan_retries(),
        }
    }
}

/// Data-simulator lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SimulatorConfig {
    /// Simulator launch command
    #[serde(default = "default_simulator_command")]
    pub command: String,

    /// Arguments before the generated scenario/port flags
    #[serde(default = "default_simulator_args")]
    pub args: Vec<String>,

    /// Default scenario name
    #[serde(default = "default_scenario")]
    pub scenario: String,

    /// Startup window in seconds before `StartupTimeout`
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Health poll interval during startup, in milliseconds
    #[serde(default = "default_health_interval")]
    pub health_check_interval_ms: u64,

    /// Background monitor re-probe interval while Running, in seconds
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,

    /// Terminate the host pipeline when a running simulator goes
    /// unhealthy (continuing against a dead data source is unsafe)
    #[serde(default = "default_true")]
    pub fail_fast_on_unhealthy: bool,

    /// Replay the scenario continuously instead of stopping at its end
    #[serde(default)]
    pub loop_playback: bool,
}

fn default_simulator_command() -> String {
    "node".to_string()
}

fn default_simulator_args() -> Vec<String> {
    vec!["simulator/server.js".to_string()]
}

fn default_scenario() -> String {
    "calm-harbor".to_string()
}

const fn default_startup_timeout() -> u64 {
    30
}

const fn default_health_interval() -> u64 {
    1000
}

const fn default_monitor_interval() -> u64 {
    5
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            command: default_simulator_command(),
            args: default_simulator_args(),
            scenario: default_scenario(),
            startup_timeout_secs: default_startup_timeout(),
            health_check_interval_ms: default_health_interval(),
            monitor_interval_secs: default_monitor_interval(),
            fail_fast_on_unhealthy: true,
            loop_playback: false,
        }
    }
}

/// Flaky classification and retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FlakyConfig {
    /// Historical success-rate floor (inclusive) for flagging a test
    /// as flaky; a rate of exactly 1.0 never classifies
    #[serde(default = "default_flaky_threshold")]
    pub threshold: f64,

    /// Maximum retry attempts per failing test
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay between retry attempts, in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Minimum classifier confidence required to retry
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,

    /// Prune history entries idle for more than this many days
    #[serde(default = "default_retention_days")]
    pub history_retention_days: i64,
}

const fn default_flaky_threshold() -> f64 {
    0.8
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_retry_delay() -> u64 {
    2000
}

const fn default_confidence_floor() -> f64 {
    0.7
}

const fn default_retention_days() -> i64 {
    7
}

impl Default for FlakyConfig {
    fn default() -> Self {
        Self {
            threshold: default_flaky_threshold(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            confidence_floor: default_confidence_floor(),
            history_retention_days: default_retention_days(),
        }
    }
}

/// Resource governor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ResourceConfig {
    /// Sampling interval in seconds
    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: u64,

    /// Ring buffer capacity for retained samples
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Memory utilization warning threshold (fraction)
    #[serde(default = "default_memory_alert")]
    pub memory_alert_threshold: f64,

    /// Memory utilization critical threshold (fraction)
    #[serde(default = "default_memory_critical")]
    pub memory_critical_threshold: f64,

    /// Resident-memory cap for this process, in MB
    #[serde(default = "default_process_cap")]
    pub process_memory_cap_mb: u64,

    /// End the host process on a critical violation
    #[serde(default)]
    pub auto_terminate: bool,

    /// Upper bound on the recommended worker count
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

const fn default_sample_interval() -> u64 {
    5
}

const fn default_history_size() -> usize {
    120
}

const fn default_memory_alert() -> f64 {
    0.8
}

const fn default_memory_critical() -> f64 {
    0.95
}

const fn default_process_cap() -> u64 {
    4096
}

const fn default_max_workers() -> usize {
    8
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: default_sample_interval(),
            history_size: default_history_size(),
            memory_alert_threshold: default_memory_alert(),
            memory_critical_threshold: default_memory_critical(),
            process_memory_cap_mb: default_process_cap(),
            auto_terminate: false,
            max_workers: default_max_workers(),
        }
    }
}

/// Quality gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QualityConfig {
    /// Path to the istanbul-style coverage summary JSON
    #[serde(default = "default_coverage_summary")]
    pub coverage_summary: String,

    /// Minimum overall score for the gate to pass
    #[serde(default = "default_pass_score")]
    pub pass_score: f64,

    /// Per-category sub-metric thresholds (percent)
    #[serde(default)]
    pub thresholds: CoverageThresholds,
}

fn default_coverage_summary() -> String {
    "coverage/coverage-summary.json".to_string()
}

const fn default_pass_score() -> f64 {
    70.0
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            coverage_summary: default_coverage_summary(),
            pass_score: default_pass_score(),
            thresholds: CoverageThresholds::default(),
        }
    }
}

/// Coverage thresholds per category, applied to each of the four
/// sub-metrics (statements, branches, functions, lines).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CoverageThresholds {
    #[serde(default = "default_global_threshold")]
    pub global: f64,

    #[serde(default = "default_widgets_threshold")]
    pub widgets: f64,

    #[serde(default = "default_services_threshold")]
    pub services: f64,

    #[serde(default = "default_integration_threshold")]
    pub integration: f64,
}

const fn default_global_threshold() -> f64 {
    80.0
}

const fn default_widgets_threshold() -> f64 {
    85.0
}

const fn default_services_threshold() -> f64 {
    80.0
}

const fn default_integration_threshold() -> f64 {
    70.0
}

impl Default for CoverageThresholds {
    fn default() -> Self {
        Self {
            global: default_global_threshold(),
            widgets: default_widgets_threshold(),
            services: default_services_threshold(),
            integration: default_integration_threshold(),
        }
    }
}

/// Selective test selection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SelectionConfig {
    /// Directories scanned for test files
    #[serde(default = "default_test_roots")]
    pub test_roots: Vec<String>,

    /// Filename suffixes identifying test files
    #[serde(default = "default_test_suffixes")]
    pub test_suffixes: Vec<String>,

    /// Extensions tried when resolving extension-less imports
    #[serde(default = "default_source_extensions")]
    pub source_extensions: Vec<String>,

    /// Substring patterns for always-run critical suites
    #[serde(default = "default_always_run")]
    pub always_run: Vec<String>,

    /// Substring patterns that force a full run when matched by any
    /// changed file (build manifests, test config, workflow files)
    #[serde(default = "default_force_full")]
    pub force_full: Vec<String>,

    /// Minimum estimated time savings to keep selective mode
    #[serde(default = "default_min_savings")]
    pub min_savings: f64,

    /// Diff target when neither a PR base nor a previous revision applies
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Rebuild the dependency mapping when older than this many hours
    #[serde(default = "default_mapping_max_age")]
    pub mapping_max_age_hours: i64,
}

fn default_test_roots() -> Vec<String> {
    vec!["src".to_string(), "__tests__".to_string()]
}

fn default_test_suffixes() -> Vec<String> {
    vec![
        ".test.ts".to_string(),
        ".test.tsx".to_string(),
        ".spec.ts".to_string(),
        ".spec.tsx".to_string(),
    ]
}

fn default_source_extensions() -> Vec<String> {
    vec![
        ".ts".to_string(),
        ".tsx".to_string(),
        ".js".to_string(),
        ".jsx".to_string(),
    ]
}

fn default_always_run() -> Vec<String> {
    vec!["smoke".to_string(), "critical".to_string()]
}

fn default_force_full() -> Vec<String> {
    vec![
        "package.json".to_string(),
        "package-lock.json".to_string(),
        "yarn.lock".to_string(),
        "jest.config".to_string(),
        "tsconfig".to_string(),
        ".github/workflows".to_string(),
    ]
}

const fn default_min_savings() -> f64 {
    0.3
}

fn default_branch() -> String {
    "main".to_string()
}

const fn default_mapping_max_age() -> i64 {
    24
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            test_roots: default_test_roots(),
            test_suffixes: default_test_suffixes(),
            source_extensions: default_source_extensions(),
            always_run: default_always_run(),
            force_full: default_force_full(),
            min_savings: default_min_savings(),
            default_branch: default_branch(),
            mapping_max_age_hours: default_mapping_max_age(),
        }
    }
}
