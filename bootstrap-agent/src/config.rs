//! Agent configuration.
//!
//! Values come from a TOML file (explicit `--config` path, or `agent.toml`
//! in the platform config directory when present), then CLI/environment
//! overrides on top. Everything has a default except the trust roots, which
//! must be set before talking to a controller.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use bootstrap_auth::csr::{CertType, DEFAULT_VALIDITY};
use bootstrap_core::{EngineConfig, DEFAULT_ENROLLMENT_ALIAS, DEFAULT_HARDWARE_ALIAS};
use serde::Deserialize;

/// Default controller host.
pub const DEFAULT_CONTROLLER_HOST: &str = "bootstrapper-controller.magma.test";
/// Default controller port.
pub const DEFAULT_CONTROLLER_PORT: u16 = 443;
/// Default per-call deadline for controller RPCs.
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;
/// Default lead time for renewal before the certificate expires.
pub const DEFAULT_RENEW_BEFORE_SECS: u64 = 600;

const CONFIG_FILE_NAME: &str = "agent.toml";

/// Configuration problems detected before anything starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("controller_port must be non-zero")]
    ZeroPort,

    #[error("validity_secs must be non-zero")]
    ZeroValidity,

    #[error("rpc_timeout_secs must be non-zero")]
    ZeroRpcTimeout,

    #[error("poll_interval_secs must be non-zero when set")]
    ZeroPollInterval,

    #[error("controller_host must not be empty")]
    EmptyHost,

    #[error("trust_roots must be set to reach the controller")]
    MissingTrustRoots,

    #[error("hardware_alias and enrollment_alias must differ")]
    SharedAlias,
}

/// Agent configuration as read from `agent.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub controller_host: String,
    pub controller_port: u16,
    /// PEM bundle of CA certificates trusted for the controller.
    pub trust_roots: Option<PathBuf>,
    /// Holds keys, the device identifier and issued certificates.
    pub data_dir: PathBuf,
    /// Overrides the persisted device identifier.
    pub device_id: Option<String>,
    pub hardware_alias: String,
    pub enrollment_alias: String,
    pub cert_type: CertType,
    pub validity_secs: u64,
    pub rpc_timeout_secs: u64,
    pub renew_before_secs: u64,
    /// Address polling interval; polling is off when unset.
    pub poll_interval_secs: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            controller_host: DEFAULT_CONTROLLER_HOST.to_string(),
            controller_port: DEFAULT_CONTROLLER_PORT,
            trust_roots: None,
            data_dir: default_data_dir(),
            device_id: None,
            hardware_alias: DEFAULT_HARDWARE_ALIAS.to_string(),
            enrollment_alias: DEFAULT_ENROLLMENT_ALIAS.to_string(),
            cert_type: CertType::Default,
            validity_secs: DEFAULT_VALIDITY.as_secs(),
            rpc_timeout_secs: DEFAULT_RPC_TIMEOUT_SECS,
            renew_before_secs: DEFAULT_RENEW_BEFORE_SECS,
            poll_interval_secs: None,
        }
    }
}

/// Values given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub controller: Option<String>,
    pub port: Option<u16>,
    pub trust_roots: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
}

impl AgentConfig {
    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, the platform config
    /// directory is consulted and defaults are used if nothing is there.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Parse a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(controller) = overrides.controller {
            self.controller_host = controller;
        }
        if let Some(port) = overrides.port {
            self.controller_port = port;
        }
        if let Some(trust_roots) = overrides.trust_roots {
            self.trust_roots = Some(trust_roots);
        }
        if let Some(data_dir) = overrides.data_dir {
            self.data_dir = data_dir;
        }
    }

    /// Check the configuration.
    ///
    /// `needs_controller` is set for commands that contact the controller;
    /// only those require trust roots.
    pub fn validate(&self, needs_controller: bool) -> Result<(), ConfigError> {
        if self.controller_port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.validity_secs == 0 {
            return Err(ConfigError::ZeroValidity);
        }
        if self.rpc_timeout_secs == 0 {
            return Err(ConfigError::ZeroRpcTimeout);
        }
        if self.poll_interval_secs == Some(0) {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.hardware_alias == self.enrollment_alias {
            return Err(ConfigError::SharedAlias);
        }
        if needs_controller {
            if self.controller_host.trim().is_empty() {
                return Err(ConfigError::EmptyHost);
            }
            if self.trust_roots.is_none() {
                return Err(ConfigError::MissingTrustRoots);
            }
        }
        Ok(())
    }

    /// `host:port` of the controller, with IPv6 literals bracketed.
    pub fn authority(&self) -> String {
        let host = self.controller_host.trim();
        if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]:{}", self.controller_port)
        } else {
            format!("{host}:{}", self.controller_port)
        }
    }

    /// Controller URI for the gRPC channel.
    pub fn endpoint(&self) -> String {
        format!("https://{}", self.authority())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            hardware_alias: self.hardware_alias.clone(),
            enrollment_alias: self.enrollment_alias.clone(),
            cert_type: self.cert_type,
            validity: Duration::from_secs(self.validity_secs),
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn renew_before(&self) -> Duration {
        Duration::from_secs(self.renew_before_secs)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_secs.map(Duration::from_secs)
    }

    pub fn key_dir(&self) -> PathBuf {
        self.data_dir.join("keys")
    }

    pub fn cert_dir(&self) -> PathBuf {
        self.data_dir.join("certs")
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("org", "magma", "gateway-bootstrap")
}

fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn default_data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("/var/lib/gateway-bootstrap"))
}
