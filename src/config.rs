use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::DiscoveryError;
use crate::record::Transport;

/// Observation window measured from entry into Scanning.
pub const DEFAULT_WINDOW_SECS: u64 = 5;

/// Bound on the wait for the platform subsystem to report powered-on.
pub const DEFAULT_READINESS_TIMEOUT_SECS: u64 = 10;

/// Bonjour service types browsed by default.
pub fn default_service_types() -> Vec<String> {
    [
        "_http._tcp",
        "_airplay._tcp",
        "_raop._tcp",
        "_homekit._tcp",
        "_printer._tcp",
        "_ipp._tcp",
        "_smb._tcp",
        "_ssh._tcp",
        "_googlecast._tcp",
        "_spotify-connect._tcp",
        "_companion-link._tcp",
        "_sleep-proxy._udp",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Runtime configuration handed to each session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub window: Duration,
    pub readiness_timeout: Duration,
    /// Service types the mDNS source fans out over.
    pub service_types: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(DEFAULT_WINDOW_SECS),
            readiness_timeout: Duration::from_secs(DEFAULT_READINESS_TIMEOUT_SECS),
            service_types: default_service_types(),
        }
    }
}

/// Configuration file format for scan settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanConfigFile {
    /// Global scan settings
    #[serde(default)]
    pub scan: ScanSettings,
    /// Service-browse settings
    #[serde(default)]
    pub mdns: MdnsSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Observation window in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Readiness wait bound in seconds
    #[serde(default = "default_readiness_timeout_secs")]
    pub readiness_timeout_secs: u64,
    /// Transports to scan with
    #[serde(default = "default_transports")]
    pub transports: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdnsSettings {
    /// Bonjour service types to browse
    #[serde(default = "default_service_types")]
    pub service_types: Vec<String>,
}

// Default value functions
fn default_window_secs() -> u64 {
    DEFAULT_WINDOW_SECS
}
fn default_readiness_timeout_secs() -> u64 {
    DEFAULT_READINESS_TIMEOUT_SECS
}
fn default_transports() -> Vec<String> {
    vec!["ble".to_string(), "mdns".to_string()]
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            readiness_timeout_secs: default_readiness_timeout_secs(),
            transports: default_transports(),
        }
    }
}

impl Default for MdnsSettings {
    fn default() -> Self {
        Self {
            service_types: default_service_types(),
        }
    }
}

impl ScanConfigFile {
    pub fn load(path: &Path) -> Result<Self, DiscoveryError> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            DiscoveryError::Configuration(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), DiscoveryError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DiscoveryError::Configuration(format!("serialization failed: {}", e)))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.scan.window_secs == 0 || self.scan.window_secs > 300 {
            return Err(DiscoveryError::Configuration(format!(
                "window_secs must be between 1 and 300, got {}",
                self.scan.window_secs
            )));
        }

        if self.scan.readiness_timeout_secs == 0 || self.scan.readiness_timeout_secs > 300 {
            return Err(DiscoveryError::Configuration(format!(
                "readiness_timeout_secs must be between 1 and 300, got {}",
                self.scan.readiness_timeout_secs
            )));
        }

        if self.scan.transports.is_empty() {
            return Err(DiscoveryError::Configuration(
                "at least one transport must be enabled".to_string(),
            ));
        }

        for name in &self.scan.transports {
            if Transport::parse(name).is_none() {
                return Err(DiscoveryError::Configuration(format!(
                    "unknown transport: {}",
                    name
                )));
            }
        }

        for ty in &self.mdns.service_types {
            let well_formed =
                ty.starts_with('_') && (ty.ends_with("._tcp") || ty.ends_with("._udp"));
            if !well_formed {
                return Err(DiscoveryError::Configuration(format!(
                    "malformed service type: {} (expected e.g. _http._tcp)",
                    ty
                )));
            }
        }

        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            window: Duration::from_secs(self.scan.window_secs),
            readiness_timeout: Duration::from_secs(self.scan.readiness_timeout_secs),
            service_types: self.mdns.service_types.clone(),
        }
    }

    pub fn transport_enabled(&self, kind: Transport) -> bool {
        self.scan
            .transports
            .iter()
            .any(|name| Transport::parse(name) == Some(kind))
    }
}

/// Loads, creates, and inspects the on-disk configuration.
pub struct ConfigManager;

impl ConfigManager {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nearscan")
            .join("nearscan.toml")
    }

    /// Load the config at `path` (or the default location), falling back to
    /// built-in defaults when no file exists.
    pub fn load_or_default(path: Option<&Path>) -> ScanConfigFile {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        if path.exists() {
            match ScanConfigFile::load(&path) {
                Ok(config) => {
                    debug!("loaded config from {}", path.display());
                    return config;
                }
                Err(e) => {
                    log::warn!("ignoring unreadable config {}: {}", path.display(), e);
                }
            }
        }
        ScanConfigFile::default()
    }

    pub fn init_config(force: bool) -> Result<PathBuf, DiscoveryError> {
        let path = Self::default_path();
        if path.exists() && !force {
            return Err(DiscoveryError::Configuration(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            )));
        }
        ScanConfigFile::default().save(&path)?;
        Ok(path)
    }

    pub fn validate_config(path: &Path) -> Result<(), DiscoveryError> {
        ScanConfigFile::load(path)?.validate()
    }

    pub fn generate_sample() -> String {
        toml::to_string_pretty(&ScanConfigFile::default()).unwrap_or_default()
    }
}
