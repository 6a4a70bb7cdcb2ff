//! Service configuration
//!
//! Precedence: CLI `--config` > `CONFIG_PATH` env var > default file name for
//! the config path; `POOL_DATA_FILE` overrides `pool.data_file`.
//!
//! Runtime knobs that admins change while the service runs (proxy, health
//! check enablement, interval, auto-delete) live in the account document,
//! not here.

use serde::Deserialize;
use session_auth::{GETOXSRF_URL, HANDSHAKE_TIMEOUT_SECS};
use session_pool::CooldownPolicy;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub cooldown: CooldownConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

/// Listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// `/health` and `/metrics`
    pub listen_addr: SocketAddr,
    /// Admin API, keep it off public interfaces
    pub admin_listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// JSON account document
    pub data_file: PathBuf,
    pub handshake_url: String,
    pub handshake_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("accounts.json"),
            handshake_url: GETOXSRF_URL.to_string(),
            handshake_timeout_secs: HANDSHAKE_TIMEOUT_SECS,
        }
    }
}

/// Whole-account cooldown windows, seconds
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub auth_secs: u64,
    pub rate_limit_secs: u64,
    pub generic_secs: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        let policy = CooldownPolicy::default();
        Self {
            auth_secs: policy.auth.as_secs(),
            rate_limit_secs: policy.rate_limit.as_secs(),
            generic_secs: policy.generic.as_secs(),
        }
    }
}

impl CooldownConfig {
    pub fn policy(&self) -> CooldownPolicy {
        CooldownPolicy {
            auth: Duration::from_secs(self.auth_secs),
            rate_limit: Duration::from_secs(self.rate_limit_secs),
            generic: Duration::from_secs(self.generic_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Pause between probes within one sweep
    pub probe_delay_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            probe_delay_secs: session_pool::DEFAULT_PROBE_DELAY.as_secs(),
        }
    }
}

fn default_max_connections() -> usize {
    1000
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(data_file) = std::env::var("POOL_DATA_FILE") {
            if !data_file.trim().is_empty() {
                config.pool.data_file = PathBuf::from(data_file);
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let url = &self.pool.handshake_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(common::Error::invalid(
                "pool.handshake_url",
                format!("must start with http:// or https://, got: {url}"),
            ));
        }

        if self.pool.handshake_timeout_secs == 0 {
            return Err(common::Error::invalid(
                "pool.handshake_timeout_secs",
                "must be greater than 0",
            ));
        }

        if self.pool.data_file.as_os_str().is_empty() {
            return Err(common::Error::invalid("pool.data_file", "must not be empty"));
        }

        if self.server.max_connections == 0 {
            return Err(common::Error::invalid(
                "server.max_connections",
                "must be greater than 0",
            ));
        }

        for (key, secs) in [
            ("cooldown.auth_secs", self.cooldown.auth_secs),
            ("cooldown.rate_limit_secs", self.cooldown.rate_limit_secs),
            ("cooldown.generic_secs", self.cooldown.generic_secs),
        ] {
            if secs == 0 {
                return Err(common::Error::invalid(key, "must be greater than 0"));
            }
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("session-pool-manager.toml")
    }
}
