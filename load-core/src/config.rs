//! Configuration loading for chatload.
//!
//! Configuration is loaded from a TOML file (default: `chatload.toml`).
//! Every section and field is optional; missing values fall back to the
//! defaults below, which describe a five-agent local gossip trial.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::platform::WorkerEndpoint;

/// Root configuration for a chatload run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Worker pool sizing.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Application to install on every node.
    #[serde(default)]
    pub app: AppConfig,
    /// Network settings handed to every node.
    #[serde(default)]
    pub network: NetworkConfig,
    /// Trial parameters.
    #[serde(default)]
    pub trial: TrialConfig,
    /// Readiness barrier parameters.
    #[serde(default)]
    pub readiness: ReadinessConfig,
    /// Node-control executable settings (used by `CommandPlatform`).
    #[serde(default)]
    pub platform: PlatformConfig,
}

/// Worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Worker endpoints, tried in order. Empty means start every node locally.
    #[serde(default)]
    pub endpoints: Vec<WorkerEndpoint>,
    /// Number of machines to acquire (default: 10).
    #[serde(default = "default_nodes")]
    pub nodes: usize,
    /// Conductors started per machine (default: 1).
    #[serde(default = "default_conductors")]
    pub conductors: usize,
    /// App instances installed per conductor (default: 1).
    #[serde(default = "default_instances")]
    pub instances: usize,
}

/// Where the application bundle comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AppSource {
    /// Bundle fetched by the node from a URL.
    Url {
        /// Download location.
        url: String,
    },
    /// Bundle on the orchestrator's filesystem.
    Path(PathBuf),
}

impl fmt::Display for AppSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppSource::Url { url } => f.write_str(url),
            AppSource::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Bundle location (default: `chat.dna.gz`).
    #[serde(default = "default_app_source")]
    pub source: AppSource,
}

/// How nodes discover each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// No transport pool or bootstrap; peer info is shared explicitly.
    Local,
    /// Real discovery through the bootstrap service and proxy.
    Networked,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Discovery mode (default: local).
    #[serde(default = "default_network_mode")]
    pub mode: NetworkMode,
    /// Bootstrap service URL (networked mode).
    #[serde(default)]
    pub bootstrap_url: Option<String>,
    /// Proxy URL (networked mode).
    #[serde(default)]
    pub proxy_url: Option<String>,
}

impl NetworkConfig {
    /// Whether peer info must be shared explicitly after provisioning.
    pub fn is_local(&self) -> bool {
        self.mode == NetworkMode::Local
    }
}

/// Propagation mode measured by a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialKind {
    /// Messages replicate in the background; the receiver is polled.
    Gossip,
    /// Every message is pushed to active chatters; receipts are counted.
    Signal,
}

impl fmt::Display for TrialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrialKind::Gossip => f.write_str("gossip"),
            TrialKind::Signal => f.write_str("signal"),
        }
    }
}

impl FromStr for TrialKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gossip" => Ok(TrialKind::Gossip),
            "signal" => Ok(TrialKind::Signal),
            other => Err(ConfigError::Invalid(format!(
                "unknown trial kind '{}' (expected gossip or signal)",
                other
            ))),
        }
    }
}

/// Trial parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialConfig {
    /// Propagation mode (default: gossip).
    #[serde(default = "default_trial_kind")]
    pub kind: TrialKind,
    /// Messages injected per trial (default: 20).
    #[serde(default = "default_messages")]
    pub messages: usize,
    /// Agents that send and receive (default: 5).
    #[serde(default = "default_active_agents")]
    pub active_agents: usize,
    /// Signal trial deadline in milliseconds (default: 60000).
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    /// Gossip poll interval in milliseconds (default: 200).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on gossip polling in milliseconds. Unset polls forever.
    #[serde(default)]
    pub max_poll_wait_ms: Option<u64>,
}

impl TrialConfig {
    /// Signal trial deadline.
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// Gossip poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Optional bound on gossip polling.
    pub fn max_poll_wait(&self) -> Option<Duration> {
        self.max_poll_wait_ms.map(Duration::from_millis)
    }
}

/// Readiness barrier parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// Delay between peer-view polls in milliseconds (default: 2000).
    #[serde(default = "default_readiness_interval_ms")]
    pub interval_ms: u64,
    /// Upper bound per agent in milliseconds. Unset waits forever.
    #[serde(default)]
    pub max_wait_ms: Option<u64>,
}

impl ReadinessConfig {
    /// Delay between peer-view polls.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Optional bound per agent.
    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_ms.map(Duration::from_millis)
    }
}

/// Node-control executable settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Executable that starts nodes and forwards app calls (default: `chat-node-ctl`).
    #[serde(default = "default_ctl")]
    pub ctl: String,
    /// SSH user for remote endpoints (default: current user).
    #[serde(default)]
    pub ssh_user: Option<String>,
    /// SSH connection timeout in seconds (default: 30).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

// Default value functions
fn default_nodes() -> usize {
    10
}

fn default_conductors() -> usize {
    1
}

fn default_instances() -> usize {
    1
}

fn default_app_source() -> AppSource {
    AppSource::Path(PathBuf::from("chat.dna.gz"))
}

fn default_network_mode() -> NetworkMode {
    NetworkMode::Local
}

fn default_trial_kind() -> TrialKind {
    TrialKind::Gossip
}

fn default_messages() -> usize {
    20
}

fn default_active_agents() -> usize {
    5
}

fn default_period_ms() -> u64 {
    60_000
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_readiness_interval_ms() -> u64 {
    2_000
}

fn default_ctl() -> String {
    "chat-node-ctl".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            nodes: default_nodes(),
            conductors: default_conductors(),
            instances: default_instances(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: default_app_source(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mode: default_network_mode(),
            bootstrap_url: None,
            proxy_url: None,
        }
    }
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            kind: default_trial_kind(),
            messages: default_messages(),
            active_agents: default_active_agents(),
            period_ms: default_period_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_wait_ms: None,
        }
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_readiness_interval_ms(),
            max_wait_ms: None,
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            ctl: default_ctl(),
            ssh_user: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl BenchConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Total node handles a trial acquires.
    pub fn target_nodes(&self) -> usize {
        self.pool.nodes * self.pool.conductors
    }

    /// Reject combinations no trial can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.nodes == 0 || self.pool.conductors == 0 || self.pool.instances == 0 {
            return Err(ConfigError::Invalid(
                "pool.nodes, pool.conductors and pool.instances must be at least 1".into(),
            ));
        }
        if self.trial.messages == 0 {
            return Err(ConfigError::Invalid("trial.messages must be at least 1".into()));
        }
        if self.trial.active_agents == 0 {
            return Err(ConfigError::Invalid(
                "trial.active_agents must be at least 1".into(),
            ));
        }
        if self.trial.kind == TrialKind::Signal && self.trial.active_agents < 2 {
            return Err(ConfigError::Invalid(
                "signal trials need at least 2 active agents (senders never receive their own signals)"
                    .into(),
            ));
        }
        if self.trial.poll_interval_ms == 0 || self.readiness.interval_ms == 0 {
            return Err(ConfigError::Invalid("poll intervals must be non-zero".into()));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Configuration parsed but cannot drive a trial.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
