//! `config.toml` loading.
//!
//! Every field has a default, so an absent file or a partial file both work:
//!
//! ```toml
//! [vm]
//! cpus = 2
//!
//! [health]
//! stop_grace_secs = 30
//!
//! [assets]
//! base_url = "https://mirror.internal/blt/"
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{BltError, BltResult};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BltConfig {
    pub vm: VmResources,
    pub health: HealthConfig,
    pub assets: AssetConfig,
}

/// Resources handed to the hypervisor runner.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VmResources {
    pub cpus: u32,
    pub memory_mb: u32,
    pub disk_gb: u32,
}

impl Default for VmResources {
    fn default() -> Self {
        Self {
            cpus: 4,
            memory_mb: 4096,
            disk_gb: 40,
        }
    }
}

/// Probe endpoints and the timing of status sampling.
///
/// `start_timeout_secs` bounds the wait in `up`; `stop_grace_secs` bounds the
/// wait between SIGINT and SIGKILL in `down`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// CPI daemon inside the VM.
    pub cpi_addr: SocketAddr,
    /// Network forwarder (vpnkit manager) inside the VM.
    pub forwarder_addr: SocketAddr,
    pub probe_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub start_timeout_secs: u64,
    pub stop_grace_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            cpi_addr: SocketAddr::from(([127, 0, 0, 1], 9999)),
            forwarder_addr: SocketAddr::from(([127, 0, 0, 1], 9998)),
            probe_timeout_ms: 2_000,
            poll_interval_ms: 1_000,
            start_timeout_secs: 60,
            stop_grace_secs: 20,
        }
    }
}

impl HealthConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

/// Where bundles come from and how hard to try.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Versioned files live at `<base_url>/<version>/<name>`.
    pub base_url: String,
    pub bundle_name: String,
    pub manifest_name: String,
    /// Retries after the first attempt.
    pub retries: u32,
    pub retry_delay_secs: u64,
    pub progress_tick_ms: u64,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            base_url: "https://github.com/aemengo/blt/releases/download/".to_string(),
            bundle_name: "assets.tgz".to_string(),
            manifest_name: "assets.tgz.sha1".to_string(),
            retries: 4,
            retry_delay_secs: 5,
            progress_tick_ms: 50,
        }
    }
}

impl AssetConfig {
    pub fn base_url(&self) -> BltResult<Url> {
        // Url::join drops the last segment unless the base ends with '/'.
        let normalized = if self.base_url.ends_with('/') {
            self.base_url.clone()
        } else {
            format!("{}/", self.base_url)
        };
        Url::parse(&normalized)
            .map_err(|e| BltError::Config(format!("assets.base_url {:?}: {e}", self.base_url)))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms)
    }
}

impl BltConfig {
    /// Load `path`, or the defaults when it does not exist.
    pub fn load(path: &Path) -> BltResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).map_err(|e| match e {
                BltError::Config(reason) => {
                    BltError::Config(format!("{}: {reason}", path.display()))
                }
                other => other,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(BltError::io(format!("read {}", path.display()), e)),
        }
    }

    /// Parse and validate a `config.toml` body.
    pub fn parse(content: &str) -> BltResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| BltError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the supervisor and fetcher cannot run with: zero
    /// sampling periods, and a retry count whose attempt total overflows.
    pub fn validate(&self) -> BltResult<()> {
        if self.health.poll_interval_ms == 0 {
            return Err(BltError::Config(
                "health.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.assets.progress_tick_ms == 0 {
            return Err(BltError::Config(
                "assets.progress_tick_ms must be greater than zero".to_string(),
            ));
        }
        if self.assets.retries.checked_add(1).is_none() {
            return Err(BltError::Config(format!(
                "assets.retries must be below {}",
                u32::MAX
            )));
        }
        Ok(())
    }
}
