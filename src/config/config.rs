//! Configuration structures and loading.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level daemon configuration, loaded from a YAML file and then
/// overlaid with environment-variable overrides (prefix `LLAMACTLD_`).
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub server: ServerConfiguration,

    #[serde(default)]
    pub system: SystemConfiguration,

    #[serde(default)]
    pub instances: InstancesConfiguration,

    #[serde(default)]
    pub backends: BackendsConfiguration,

    #[serde(default)]
    pub auth: AuthConfiguration,

    #[serde(default)]
    pub nodes: NodesConfiguration,

    #[serde(default)]
    pub log_rotation: LogRotationConfiguration,
}

impl Configuration {
    /// Load configuration from a YAML file, resolve relative paths against
    /// the file's parent directory, then apply environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let config_path = std::path::Path::new(path);
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file: {}", path))?;

        let mut config: Configuration =
            serde_yaml::from_str(&content).with_context(|| "failed to parse configuration")?;

        let base_dir = config_path
            .parent()
            .and_then(|p| if p.as_os_str().is_empty() { None } else { Some(p) })
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        config.system.resolve_paths(&base_dir);
        config.apply_env_overrides();

        if config.system.auto_create_dirs {
            std::fs::create_dir_all(&config.system.data_directory)?;
            std::fs::create_dir_all(&config.system.instances_directory)?;
            std::fs::create_dir_all(&config.system.logs_directory)?;
        }

        Ok(config)
    }

    /// Apply `LLAMACTLD_*` environment-variable overrides on top of the
    /// file-derived values. File values win when the variable is unset.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LLAMACTLD_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("LLAMACTLD_PORT") {
            if let Ok(p) = v.parse() {
                self.server.port = p;
            }
        }
        if let Ok(v) = std::env::var("LLAMACTLD_MAX_INSTANCES") {
            if let Ok(n) = v.parse() {
                self.instances.max_instances = n;
            }
        }
        if let Ok(v) = std::env::var("LLAMACTLD_MAX_RUNNING_INSTANCES") {
            if let Ok(n) = v.parse() {
                self.instances.max_running_instances = n;
            }
        }
        if let Ok(v) = std::env::var("LLAMACTLD_MANAGEMENT_KEYS") {
            self.auth.management_keys = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = std::env::var("LLAMACTLD_NODE_ID") {
            self.nodes.local_node_id = v;
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            debug: false,
            server: ServerConfiguration::default(),
            system: SystemConfiguration::default(),
            instances: InstancesConfiguration::default(),
            backends: BackendsConfiguration::default(),
            auth: AuthConfiguration::default(),
            nodes: NodesConfiguration::default(),
            log_rotation: LogRotationConfiguration::default(),
        }
    }
}

/// HTTP server bind settings and CORS policy.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfiguration {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub allowed_origins: Vec<String>,

    #[serde(default)]
    pub allowed_headers: Vec<String>,

    #[serde(default)]
    pub ssl: SslConfiguration,
}

impl Default for ServerConfiguration {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: Vec::new(),
            allowed_headers: Vec::new(),
            ssl: SslConfiguration::default(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SslConfiguration {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cert: String,
    #[serde(default)]
    pub key: String,
}

/// Directory layout and the shared port range instances allocate from.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfiguration {
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,

    #[serde(default = "default_instances_directory")]
    pub instances_directory: PathBuf,

    #[serde(default = "default_logs_directory")]
    pub logs_directory: PathBuf,

    #[serde(default = "default_true")]
    pub auto_create_dirs: bool,
}

impl Default for SystemConfiguration {
    fn default() -> Self {
        Self {
            data_directory: default_data_directory(),
            instances_directory: default_instances_directory(),
            logs_directory: default_logs_directory(),
            auto_create_dirs: true,
        }
    }
}

impl SystemConfiguration {
    pub fn resolve_paths(&mut self, base_dir: &std::path::Path) {
        self.data_directory = Self::resolve_path(&self.data_directory, base_dir);
        self.instances_directory = Self::resolve_path(&self.instances_directory, base_dir);
        self.logs_directory = Self::resolve_path(&self.logs_directory, base_dir);
    }

    fn resolve_path(path: &std::path::Path, base_dir: &std::path::Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }
}

fn default_data_directory() -> PathBuf {
    PathBuf::from("data")
}
fn default_instances_directory() -> PathBuf {
    PathBuf::from("data/instances")
}
fn default_logs_directory() -> PathBuf {
    PathBuf::from("data/logs")
}
fn default_true() -> bool {
    true
}

/// Port range and the running-population policy shared by every instance
/// unless overridden per-instance by its options record.
#[derive(Debug, Clone, Deserialize)]
pub struct InstancesConfiguration {
    #[serde(default = "default_port_lo")]
    pub port_range_low: u16,

    #[serde(default = "default_port_hi")]
    pub port_range_high: u16,

    /// -1 means unlimited.
    #[serde(default = "default_max_instances")]
    pub max_instances: i64,

    /// -1 means unlimited.
    #[serde(default = "default_max_running")]
    pub max_running_instances: i64,

    #[serde(default)]
    pub enable_lru_eviction: bool,

    #[serde(default)]
    pub default_auto_restart: bool,

    #[serde(default = "default_max_restarts")]
    pub default_max_restarts: u32,

    #[serde(default = "default_restart_delay")]
    pub default_restart_delay_seconds: u32,

    #[serde(default)]
    pub default_on_demand_start: bool,

    #[serde(default = "default_on_demand_timeout")]
    pub on_demand_start_timeout_seconds: u32,

    #[serde(default = "default_timeout_check_interval")]
    pub timeout_check_interval_minutes: u32,
}

impl Default for InstancesConfiguration {
    fn default() -> Self {
        Self {
            port_range_low: default_port_lo(),
            port_range_high: default_port_hi(),
            max_instances: default_max_instances(),
            max_running_instances: default_max_running(),
            enable_lru_eviction: false,
            default_auto_restart: false,
            default_max_restarts: default_max_restarts(),
            default_restart_delay_seconds: default_restart_delay(),
            default_on_demand_start: false,
            on_demand_start_timeout_seconds: default_on_demand_timeout(),
            timeout_check_interval_minutes: default_timeout_check_interval(),
        }
    }
}

fn default_port_lo() -> u16 {
    8000
}
fn default_port_hi() -> u16 {
    9000
}
fn default_max_instances() -> i64 {
    -1
}
fn default_max_running() -> i64 {
    -1
}
fn default_max_restarts() -> u32 {
    3
}
fn default_restart_delay() -> u32 {
    5
}
fn default_on_demand_timeout() -> u32 {
    120
}
fn default_timeout_check_interval() -> u32 {
    5
}

/// Per-backend-type command template and optional container execution.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendsConfiguration {
    #[serde(default)]
    pub llama_cpp: BackendConfiguration,
    #[serde(default)]
    pub mlx_lm: BackendConfiguration,
    #[serde(default)]
    pub vllm: BackendConfiguration,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendConfiguration {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub docker: DockerBackendConfiguration,
    #[serde(default)]
    pub response_headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DockerBackendConfiguration {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

/// Bearer-token auth schemes for the management and data-plane surfaces.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfiguration {
    #[serde(default)]
    pub require_management_auth: bool,
    #[serde(default)]
    pub require_inference_auth: bool,
    #[serde(default)]
    pub management_keys: Vec<String>,
    #[serde(default)]
    pub inference_keys: Vec<String>,
}

/// Local node identity and the peer map used by the remote dispatcher.
#[derive(Debug, Clone, Deserialize)]
pub struct NodesConfiguration {
    #[serde(default = "default_node_id")]
    pub local_node_id: String,
    #[serde(default)]
    pub nodes: HashMap<String, NodeConfiguration>,
}

impl Default for NodesConfiguration {
    fn default() -> Self {
        Self {
            local_node_id: default_node_id(),
            nodes: HashMap::new(),
        }
    }
}

fn default_node_id() -> String {
    "local".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfiguration {
    pub address: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogRotationConfiguration {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
    #[serde(default)]
    pub compress: bool,
}

impl Default for LogRotationConfiguration {
    fn default() -> Self {
        Self {
            enabled: false,
            max_size_mb: default_max_size_mb(),
            compress: false,
        }
    }
}

fn default_max_size_mb() -> u64 {
    50
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Configuration::default();
        assert_eq!(config.server.port, 8080);
        assert!(config.instances.port_range_low < config.instances.port_range_high);
        assert_eq!(config.nodes.local_node_id, "local");
    }
}
