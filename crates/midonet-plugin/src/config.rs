//! Plugin configuration
//!
//! Loaded from TOML. Default location: /etc/neutron/plugins/midonet/midonet.toml

use crate::error::{PluginError, Result};
use midonet_client::RouterId;
use midonet_orch_common::{LeaseConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/neutron/plugins/midonet/midonet.toml";

/// Controller connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MidonetConfig {
    /// Controller API endpoint
    #[serde(default = "default_midonet_uri")]
    pub midonet_uri: String,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "default_password")]
    pub password: String,

    #[serde(default)]
    pub project_id: Option<String>,

    /// Router every external network and tenant gateway hangs off. Required.
    #[serde(default)]
    pub provider_router_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    /// In-process lock; only serializes callers inside one process
    Local,
    /// Lease lock shared by every plugin process; the lease store is passed
    /// to `MidonetPlugin::with_lease_store`
    Lease,
}

/// Port critical section settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockingConfig {
    #[serde(default = "default_lock_backend")]
    pub backend: LockBackend,

    /// Identity recorded on leases; defaults to a random id
    #[serde(default)]
    pub owner_id: Option<String>,

    #[serde(default = "default_lease_ttl")]
    pub ttl_secs: u64,

    #[serde(default = "default_lease_retries")]
    pub max_retries: u32,

    #[serde(default = "default_lease_backoff")]
    pub retry_backoff_ms: u64,
}

/// DHCP port discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhcpConfig {
    #[serde(default = "default_poll_attempts")]
    pub port_poll_attempts: u32,

    #[serde(default = "default_poll_interval")]
    pub port_poll_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

/// Complete plugin configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginConfig {
    #[serde(default)]
    pub midonet: MidonetConfig,

    #[serde(default)]
    pub locking: LockingConfig,

    #[serde(default)]
    pub dhcp: DhcpConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

// Default functions
fn default_midonet_uri() -> String {
    "http://localhost:8080/midonet-api".to_string()
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_password() -> String {
    "passw0rd".to_string()
}

fn default_lock_backend() -> LockBackend {
    LockBackend::Local
}

fn default_lease_ttl() -> u64 {
    30
}

fn default_lease_retries() -> u32 {
    50
}

fn default_lease_backoff() -> u64 {
    100
}

fn default_poll_attempts() -> u32 {
    5
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

// Default implementations
impl Default for MidonetConfig {
    fn default() -> Self {
        Self {
            midonet_uri: default_midonet_uri(),
            username: default_username(),
            password: default_password(),
            project_id: None,
            provider_router_id: None,
        }
    }
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            backend: default_lock_backend(),
            owner_id: None,
            ttl_secs: default_lease_ttl(),
            max_retries: default_lease_retries(),
            retry_backoff_ms: default_lease_backoff(),
        }
    }
}

impl Default for DhcpConfig {
    fn default() -> Self {
        Self {
            port_poll_attempts: default_poll_attempts(),
            port_poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl PluginConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config = toml::from_str(&content).map_err(|e| {
                    PluginError::Configuration(format!(
                        "Failed to parse config file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(PluginError::Io(e)),
        }
    }

    /// Load from the default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// The configured provider router. Missing or malformed ids are fatal:
    /// nothing that touches external networks can work without it.
    pub fn provider_router_id(&self) -> Result<RouterId> {
        let raw = self.midonet.provider_router_id.as_deref().ok_or_else(|| {
            PluginError::ConfigurationFatal(
                "provider_router_id should be configured in the plugin config file".to_string(),
            )
        })?;
        let uuid = Uuid::parse_str(raw.trim()).map_err(|e| {
            PluginError::ConfigurationFatal(format!("provider_router_id {:?}: {}", raw, e))
        })?;
        Ok(RouterId::from_uuid(uuid))
    }

    pub fn dhcp_poll_interval(&self) -> Duration {
        Duration::from_millis(self.dhcp.port_poll_interval_ms)
    }

    /// Policy for waiting on a subnet's DHCP port to get an address
    pub fn dhcp_poll_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.dhcp.port_poll_attempts, self.dhcp_poll_interval())
    }

    pub fn lease_config(&self) -> LeaseConfig {
        LeaseConfig {
            ttl_secs: self.locking.ttl_secs,
            max_retries: self.locking.max_retries,
            retry_backoff_ms: self.locking.retry_backoff_ms,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.provider_router_id()?;

        if self.midonet.midonet_uri.trim().is_empty() {
            return Err(PluginError::Configuration(
                "midonet_uri must not be empty".to_string(),
            ));
        }

        if self.locking.backend == LockBackend::Lease && self.locking.ttl_secs == 0 {
            return Err(PluginError::Configuration(
                "ttl_secs must be > 0 for the lease backend".to_string(),
            ));
        }

        if self.dhcp.port_poll_attempts == 0 {
            return Err(PluginError::Configuration(
                "port_poll_attempts must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
