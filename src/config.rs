//! Configuration for sfctl.
//!
//! Values come from, in increasing priority:
//! - Built-in defaults
//! - System configuration (/etc/sfctl/sfctl.toml)
//! - User configuration (~/.sfctl.toml)
//! - Project configuration (./sfctl.toml)
//! - `SF<NAME>` environment variables (SFMVIP, SFUSER, SFPASS, ...)
//! - Command-line arguments (applied by the CLI)
//!
//! Files may be TOML, YAML or JSON; the format follows the extension.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cluster connection defaults
    pub cluster: ClusterDefaults,

    /// SSH settings for nodes and clients
    pub ssh: SshConfig,

    /// Fan-out limits
    pub parallel: ParallelConfig,

    /// JSON-RPC transport settings
    pub api: ApiConfig,

    /// Intervals and deadlines for wait operations
    pub poll: PollConfig,

    /// Default QoS for new volumes
    pub qos: QosDefaults,

    /// Faults that do not count as problems
    pub fault_whitelist: Vec<String>,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster: ClusterDefaults::default(),
            ssh: SshConfig::default(),
            parallel: ParallelConfig::default(),
            api: ApiConfig::default(),
            poll: PollConfig::default(),
            qos: QosDefaults::default(),
            fault_whitelist: vec![
                "clusterFull".to_string(),
                "clusterIOPSAreOverProvisioned".to_string(),
                "nodeHardwareFault".to_string(),
            ],
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterDefaults {
    /// Management virtual IP
    pub mvip: Option<String>,
    /// Cluster admin username
    pub username: String,
    /// Cluster admin password
    pub password: String,
}

impl Default for ClusterDefaults {
    fn default() -> Self {
        Self {
            mvip: None,
            username: "admin".to_string(),
            password: "admin".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub user: String,
    pub password: Option<String>,
    /// Private key tried before the password; defaults to ~/.ssh/id_rsa
    pub key_file: Option<PathBuf>,
    pub port: u16,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            password: Some("password".to_string()),
            key_file: None,
            port: 22,
            connect_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(300),
        }
    }
}

impl SshConfig {
    /// Key file to try first, if one exists.
    pub fn effective_key_file(&self) -> Option<PathBuf> {
        self.key_file
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".ssh").join("id_rsa")))
            .filter(|path| path.exists())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Run per-host work in parallel when there are more than this many hosts
    pub thresh: usize,
    /// At most this many hosts at once
    pub max: usize,
    /// Run API calls in parallel when there are at least this many
    pub calls_min: usize,
    /// At most this many API calls at once
    pub calls_max: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            thresh: 5,
            max: 20,
            calls_min: 2,
            calls_max: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Retries after the first attempt
    pub retries: u32,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Share a cookie jar across calls
    pub cookies: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            retries: 4,
            retry_delay: Duration::from_secs(30),
            timeout: Duration::from_secs(300),
            cookies: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    #[serde(with = "humantime_serde")]
    pub gc_start_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub gc_start_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub gc_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub sync_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub fullness_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub drive_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub async_interval: Duration,
    /// Longest wait for an async handle
    #[serde(with = "humantime_serde")]
    pub async_timeout: Duration,
    /// Longest wait for data sync after drive changes
    #[serde(with = "humantime_serde")]
    pub sync_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            gc_start_interval: Duration::from_secs(3),
            gc_start_timeout: Duration::from_secs(120),
            gc_interval: Duration::from_secs(30),
            sync_interval: Duration::from_secs(30),
            fullness_interval: Duration::from_secs(30),
            drive_interval: Duration::from_secs(10),
            async_interval: Duration::from_secs(2),
            async_timeout: Duration::from_secs(300),
            sync_timeout: Duration::from_secs(3600),
        }
    }
}

impl PollConfig {
    /// Every interval set to `interval`; used by tests and dry runs.
    pub fn uniform(interval: Duration) -> Self {
        Self {
            gc_start_interval: interval,
            gc_start_timeout: interval * 50,
            gc_interval: interval,
            sync_interval: interval,
            fullness_interval: interval,
            drive_interval: interval,
            async_interval: interval,
            async_timeout: interval * 50,
            sync_timeout: interval * 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QosDefaults {
    pub min_iops: u64,
    pub max_iops: u64,
    pub burst_iops: u64,
}

impl Default for QosDefaults {
    fn default() -> Self {
        Self {
            min_iops: 100,
            max_iops: 100_000,
            burst_iops: 100_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub syslog: bool,
    pub color: bool,
    pub ident: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            syslog: true,
            color: true,
            ident: "sfctl".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut merged = serde_json::to_value(Config::default())?;

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                let layer = Self::read_file(&path)?;
                merge_values(&mut merged, layer);
            }
        }

        let mut config: Config = serde_json::from_value(merged).context("Invalid configuration")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Get the list of configuration file paths to check
    fn get_config_paths(explicit_path: Option<&PathBuf>) -> Vec<PathBuf> {
        if let Some(path) = explicit_path {
            return vec![path.clone()];
        }

        if let Ok(env_config) = std::env::var("SFCTL_CONFIG") {
            return vec![PathBuf::from(env_config)];
        }

        let mut paths = vec![PathBuf::from("/etc/sfctl/sfctl.toml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".sfctl.toml"));
        }
        paths.push(PathBuf::from("sfctl.toml"));
        paths
    }

    /// Read one file into a generic value tree
    fn read_file(path: &Path) -> Result<serde_json::Value> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let value = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            _ => {
                let table: toml::Value = toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
                serde_json::to_value(table)?
            }
        };
        Ok(value)
    }

    /// Apply `SF<NAME>` environment overrides
    fn apply_env_overrides(&mut self) {
        if let Some(mvip) = env_value("SFMVIP") {
            self.cluster.mvip = Some(mvip);
        }
        if let Some(user) = env_value("SFUSER") {
            self.cluster.username = user;
        }
        if let Some(pass) = env_value("SFPASS") {
            self.cluster.password = pass;
        }
        if let Some(user) = env_value("SFSSH_USER") {
            self.ssh.user = user;
        }
        if let Some(pass) = env_value("SFSSH_PASS") {
            self.ssh.password = Some(pass);
        }
        if let Some(n) = env_value("SFPARALLEL_THRESH").and_then(|v| v.parse().ok()) {
            self.parallel.thresh = n;
        }
        if let Some(n) = env_value("SFPARALLEL_MAX").and_then(|v| v.parse().ok()) {
            self.parallel.max = n;
        }
        if let Some(n) = env_value("SFMIN_IOPS").and_then(|v| v.parse().ok()) {
            self.qos.min_iops = n;
        }
        if let Some(n) = env_value("SFMAX_IOPS").and_then(|v| v.parse().ok()) {
            self.qos.max_iops = n;
        }
        if let Some(n) = env_value("SFBURST_IOPS").and_then(|v| v.parse().ok()) {
            self.qos.burst_iops = n;
        }
    }

    /// Load configuration from a single file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut merged = serde_json::to_value(Config::default())?;
        merge_values(&mut merged, Self::read_file(path.as_ref())?);
        Ok(serde_json::from_value(merged)?)
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Recursively overlay `overlay` onto `base`; objects merge, everything else replaces.
fn merge_values(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
