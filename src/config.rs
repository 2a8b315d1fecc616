//! Configuration loading for cluctl.
//!
//! Settings come from `/etc/cluctl/config.toml`, then the user config
//! (`$XDG_CONFIG_HOME/cluctl/config.toml`), then `CLUCTL_*` environment
//! overrides. The resulting [`Config`] is constructed once and passed by
//! reference everywhere; nothing mutates it after load.

use crate::hostlist;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Complete tool configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub health: HealthConfig,
    pub slurm: SlurmConfig,
}

/// Daemon endpoint and credentials.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// host:port of the cluster daemon
    pub endpoint: String,
    pub protocol: String,
    pub username: String,
    pub password: String,
    pub verify_certificate: bool,
    /// Per-request timeout in seconds
    pub timeout: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            protocol: "https".to_string(),
            username: String::new(),
            password: String::new(),
            verify_certificate: false,
            timeout: 30,
        }
    }
}

impl ApiConfig {
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.endpoint)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Health-check behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Per-stage timeout in seconds
    pub timeout: u64,
    /// Operator-supplied mount lists, keyed by hostlist expression.
    /// First matching expression wins; unmatched nodes fall back to
    /// remote mount discovery.
    pub mounts: BTreeMap<String, Vec<String>>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout: 10,
            mounts: BTreeMap::new(),
        }
    }
}

impl HealthConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Configured mount paths for a node, if any expression matches it.
    ///
    /// Expressions that fail to expand are skipped; a config typo should
    /// degrade to discovery, not break the whole health run.
    #[must_use]
    pub fn mounts_for(&self, node: &str) -> Option<&[String]> {
        for (expression, paths) in &self.mounts {
            match hostlist::expand(expression) {
                Ok(nodes) => {
                    if nodes.iter().any(|n| n == node) {
                        return Some(paths);
                    }
                }
                Err(e) => {
                    tracing::debug!(expression, error = %e, "skipping bad mount expression");
                }
            }
        }
        None
    }
}

/// Slurm access settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlurmConfig {
    /// Directory containing Slurm binaries; auto-detected via PATH if unset.
    pub bin_path: Option<std::path::PathBuf>,
    /// slurmrestd domain socket path
    pub restd_socket: String,
    /// slurmrestd HTTP fallback URL; derived from the daemon host if empty.
    pub rest_url: String,
}

impl Default for SlurmConfig {
    fn default() -> Self {
        Self {
            bin_path: None,
            restd_socket: "/var/lib/slurmrestd.socket".to_string(),
            rest_url: String::new(),
        }
    }
}

impl Config {
    /// User config file path, respecting XDG_CONFIG_HOME.
    #[must_use]
    pub fn user_config_path() -> Option<std::path::PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            if !xdg_config.is_empty() {
                return Some(std::path::PathBuf::from(xdg_config).join("cluctl/config.toml"));
            }
        }
        if let Some(home) = std::env::var_os("HOME") {
            return Some(std::path::PathBuf::from(home).join(".config/cluctl/config.toml"));
        }
        dirs::config_dir().map(|dir| dir.join("cluctl/config.toml"))
    }

    /// Load configuration from files and environment.
    /// Returns the config and any warnings encountered during loading.
    pub fn load() -> (Self, Vec<String>) {
        let mut config = Self::default();
        let mut warnings = Vec::new();

        Self::load_config_file(&mut config, "/etc/cluctl/config.toml", &mut warnings);
        if let Some(user_path) = Self::user_config_path() {
            Self::load_config_file(&mut config, &user_path.to_string_lossy(), &mut warnings);
        }
        config.apply_env_overrides(&mut warnings);

        (config, warnings)
    }

    /// Check that everything needed to talk to the daemon is present.
    ///
    /// Listed all at once so the operator fixes the file in one pass.
    pub fn validate_api(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.api.endpoint.is_empty() {
            errors.push("endpoint is not set in the [api] section".to_string());
        }
        if self.api.username.is_empty() {
            errors.push("username is not set in the [api] section".to_string());
        }
        if self.api.password.is_empty() {
            errors.push("password is not set in the [api] section".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// slurmrestd HTTP URL, derived from the daemon host when not configured.
    #[must_use]
    pub fn slurm_rest_url(&self) -> Option<String> {
        if !self.slurm.rest_url.is_empty() {
            return Some(self.slurm.rest_url.clone());
        }
        let host = self.api.endpoint.split(':').next()?;
        if host.is_empty() {
            return None;
        }
        Some(format!("http://{}:6802/slurm/v0.0.38/nodes", host))
    }

    fn load_config_file(config: &mut Self, path: &str, warnings: &mut Vec<String>) {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<Config>(&content) {
                Ok(parsed) => config.merge(parsed),
                Err(e) => warnings.push(format!("Config parse error in '{}': {}", path, e)),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warnings.push(format!("Could not read config '{}': {}", path, e)),
        }
    }

    fn merge(&mut self, other: Config) {
        if !other.api.endpoint.is_empty() {
            self.api.endpoint = other.api.endpoint;
            self.api.protocol = other.api.protocol;
            self.api.verify_certificate = other.api.verify_certificate;
            self.api.timeout = other.api.timeout;
        }
        if !other.api.username.is_empty() {
            self.api.username = other.api.username;
        }
        if !other.api.password.is_empty() {
            self.api.password = other.api.password;
        }
        if !other.health.mounts.is_empty() {
            self.health.mounts = other.health.mounts;
        }
        self.health.timeout = other.health.timeout;
        self.slurm.bin_path = other.slurm.bin_path.or(self.slurm.bin_path.take());
        if !other.slurm.rest_url.is_empty() {
            self.slurm.rest_url = other.slurm.rest_url;
        }
        self.slurm.restd_socket = other.slurm.restd_socket;
    }

    fn apply_env_overrides(&mut self, warnings: &mut Vec<String>) {
        if let Ok(val) = std::env::var("CLUCTL_ENDPOINT") {
            self.api.endpoint = val;
        }
        if let Ok(val) = std::env::var("CLUCTL_PROTOCOL") {
            self.api.protocol = val;
        }
        if let Ok(val) = std::env::var("CLUCTL_USERNAME") {
            self.api.username = val;
        }
        if let Ok(val) = std::env::var("CLUCTL_PASSWORD") {
            self.api.password = val;
        }
        if let Ok(val) = std::env::var("CLUCTL_VERIFY_CERTIFICATE") {
            self.api.verify_certificate =
                matches!(val.to_lowercase().as_str(), "y" | "yes" | "true" | "1");
        }
        if let Ok(val) = std::env::var("CLUCTL_TIMEOUT") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => self.api.timeout = secs,
                _ => warnings.push(format!(
                    "Invalid value '{}' for CLUCTL_TIMEOUT, expected a positive integer (seconds)",
                    val
                )),
            }
        }
        if let Ok(val) = std::env::var("CLUCTL_SLURM_PATH") {
            if !val.is_empty() {
                let path = std::path::PathBuf::from(&val);
                if path.is_dir() {
                    self.slurm.bin_path = Some(path);
                } else {
                    warnings.push(format!(
                        "Invalid value '{}' for CLUCTL_SLURM_PATH: not a valid directory",
                        val
                    ));
                }
            }
        }
    }
}
