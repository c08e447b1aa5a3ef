//! On-disk layout of the blt home directory.
//!
//! Provides a single `BltPaths` struct that resolves every location the
//! supervisor and the asset pipeline touch:
//!
//! - Home:      `$BLT_HOME/.blt/` or `~/.blt/`
//! - State:     `<home>/state/` (VM disk state, deployment state)
//! - Assets:    `<home>/assets/` (replaced wholesale by the pipeline)
//! - Logs:      `<home>/logs/`

use std::path::PathBuf;

use tracing::info;

const HOME_DIR_NAME: &str = ".blt";

/// All resolved blt paths, rooted at a single home directory.
#[derive(Debug, Clone)]
pub struct BltPaths {
    /// Root of everything blt owns.
    pub home: PathBuf,
    /// Machine state wiped by `destroy`.
    pub state: PathBuf,
    /// Hypervisor runner state, including the process record.
    pub linuxkit_state: PathBuf,
    /// Installed asset bundle.
    pub assets: PathBuf,
    /// Application logs
    pub logs: PathBuf,
}

impl BltPaths {
    /// Resolve the home directory from `BLT_HOME`, falling back to `HOME`.
    /// Does not create any directories; see `ensure()`.
    pub fn resolve() -> Option<Self> {
        let base = std::env::var("BLT_HOME")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| std::env::var("HOME").ok())?;

        Some(Self::from_home(PathBuf::from(base).join(HOME_DIR_NAME)))
    }

    /// Lay out all paths under an explicit home directory.
    pub fn from_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let state = home.join("state");

        Self {
            linuxkit_state: state.join("linuxkit"),
            assets: home.join("assets"),
            logs: home.join("logs"),
            state,
            home,
        }
    }

    /// Create the directories that must exist before any command runs.
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [&self.home, &self.state, &self.logs] {
            std::fs::create_dir_all(dir)?;
            info!("ensured directory: {}", dir.display());
        }
        Ok(())
    }

    /// The process record written by the hypervisor runner.
    pub fn pid_file(&self) -> PathBuf {
        self.linuxkit_state.join("hyperkit.pid")
    }

    /// Marker holding the version of the installed asset bundle.
    pub fn asset_version_file(&self) -> PathBuf {
        self.assets.join("version")
    }

    pub fn efi_iso(&self) -> PathBuf {
        self.assets.join("bosh-lit-efi.iso")
    }

    pub fn vpnkit(&self) -> PathBuf {
        self.assets.join("vpnkit")
    }

    pub fn bosh_deployment_dir(&self) -> PathBuf {
        self.assets.join("bosh-deployment")
    }

    pub fn bosh_operations_dir(&self) -> PathBuf {
        self.assets.join("operations")
    }

    pub fn bosh_state_dir(&self) -> PathBuf {
        self.state.join("bosh")
    }

    pub fn bosh_state_json(&self) -> PathBuf {
        self.bosh_state_dir().join("state.json")
    }

    pub fn bosh_creds(&self) -> PathBuf {
        self.bosh_state_dir().join("creds.yml")
    }

    pub fn bosh_ca_cert(&self) -> PathBuf {
        self.bosh_state_dir().join("ca.crt")
    }

    pub fn bosh_gw_private_key(&self) -> PathBuf {
        self.bosh_state_dir().join("gw_id_rsa")
    }

    /// Console and stdio log of the hypervisor runner.
    pub fn runner_log(&self) -> PathBuf {
        self.home.join("linuxkit.log")
    }

    pub fn config_file(&self) -> PathBuf {
        self.home.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_follows_home() {
        let paths = BltPaths::from_home("/tmp/blt-home/.blt");
        assert_eq!(
            paths.pid_file(),
            PathBuf::from("/tmp/blt-home/.blt/state/linuxkit/hyperkit.pid")
        );
        assert_eq!(paths.assets, PathBuf::from("/tmp/blt-home/.blt/assets"));
        assert_eq!(
            paths.asset_version_file(),
            PathBuf::from("/tmp/blt-home/.blt/assets/version")
        );
        assert_eq!(
            paths.bosh_creds(),
            PathBuf::from("/tmp/blt-home/.blt/state/bosh/creds.yml")
        );
        assert_eq!(
            paths.efi_iso(),
            PathBuf::from("/tmp/blt-home/.blt/assets/bosh-lit-efi.iso")
        );
    }

    #[test]
    fn ensure_creates_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = BltPaths::from_home(tmp.path().join(".blt"));

        paths.ensure().expect("ensure should succeed");

        assert!(paths.home.is_dir());
        assert!(paths.state.is_dir());
        assert!(paths.logs.is_dir());
        assert!(!paths.assets.exists(), "assets are only created by the pipeline");
    }
}
