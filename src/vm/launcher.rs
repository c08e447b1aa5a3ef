//! Hypervisor runner invocation.
//!
//! The VM is started by `linuxkit run hyperkit`, which writes the process
//! record itself. This module only builds the command line and detaches the
//! runner; readiness is observed through [`Supervisor::wait_for_status`].
//!
//! [`Supervisor::wait_for_status`]: crate::vm::Supervisor::wait_for_status
//!
//! # Platform gating
//!
//! hyperkit exists only on macOS. On other platforms [`launch_vm`] returns an
//! explanatory error so the rest of the crate stays usable.

use std::path::PathBuf;

use tokio::process::Command;

use crate::config::{HealthConfig, VmResources};
use crate::paths::BltPaths;

/// Everything the runner needs, resolved from paths and configuration.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub resources: VmResources,
    /// Ports published from the guest to the host loopback.
    pub published_ports: Vec<u16>,
    pub vpnkit: PathBuf,
    pub state_dir: PathBuf,
    pub iso: PathBuf,
}

impl LaunchPlan {
    pub fn new(paths: &BltPaths, resources: &VmResources, health: &HealthConfig) -> Self {
        Self {
            resources: resources.clone(),
            published_ports: vec![health.cpi_addr.port(), health.forwarder_addr.port()],
            vpnkit: paths.vpnkit(),
            state_dir: paths.linuxkit_state.clone(),
            iso: paths.efi_iso(),
        }
    }

    /// Arguments for `linuxkit`.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "hyperkit".to_string(),
            "-console-file".to_string(),
            "-iso".to_string(),
            "-uefi".to_string(),
            format!("-cpus={}", self.resources.cpus),
            format!("-mem={}", self.resources.memory_mb),
            "-disk".to_string(),
            format!("size={}G", self.resources.disk_gb),
            "-networking".to_string(),
            "vpnkit".to_string(),
            "-vpnkit".to_string(),
            self.vpnkit.display().to_string(),
        ];

        for port in &self.published_ports {
            args.push("-publish".to_string());
            args.push(format!("{port}:{port}/tcp"));
        }

        args.push("-state".to_string());
        args.push(self.state_dir.display().to_string());
        args.push(self.iso.display().to_string());
        args
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new("linuxkit");
        cmd.args(self.args());
        cmd
    }
}

// ---------------------------------------------------------------------------
// macOS implementation
// ---------------------------------------------------------------------------

#[cfg(target_os = "macos")]
mod imp {
    use std::process::Stdio;

    use anyhow::Context;
    use tracing::info;

    use super::LaunchPlan;
    use crate::paths::BltPaths;
    use crate::vm::ProcessRecord;

    /// Start the runner detached, with its output in `linuxkit.log`.
    ///
    /// Any stale process record is removed first so that the new runner's
    /// record is the only one observed.
    pub async fn launch_vm(paths: &BltPaths, plan: &LaunchPlan) -> anyhow::Result<()> {
        ProcessRecord::new(paths.pid_file()).clear()?;

        std::fs::create_dir_all(&plan.state_dir)
            .with_context(|| format!("create {}", plan.state_dir.display()))?;

        let log_path = paths.runner_log();
        let log = std::fs::File::create(&log_path)
            .with_context(|| format!("create {}", log_path.display()))?;
        let log_err = log
            .try_clone()
            .with_context(|| format!("duplicate handle for {}", log_path.display()))?;

        let mut cmd = plan.command();
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::from(log));
        cmd.stderr(Stdio::from(log_err));

        let child = cmd.spawn().context("Failed to spawn linuxkit")?;

        info!(
            runner_pid = child.id(),
            cpus = plan.resources.cpus,
            memory_mb = plan.resources.memory_mb,
            disk_gb = plan.resources.disk_gb,
            log = %log_path.display(),
            "VM runner spawned"
        );

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Non-macOS stub
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "macos"))]
mod imp {
    use super::LaunchPlan;
    use crate::paths::BltPaths;

    /// On non-macOS platforms this always returns an error.
    pub async fn launch_vm(_paths: &BltPaths, _plan: &LaunchPlan) -> anyhow::Result<()> {
        Err(anyhow::anyhow!(
            "VM launch requires macOS (linuxkit with the hyperkit backend)"
        ))
    }
}

pub use imp::launch_vm;

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> LaunchPlan {
        LaunchPlan::new(
            &BltPaths::from_home("/Users/op/.blt"),
            &VmResources {
                cpus: 2,
                memory_mb: 8192,
                disk_gb: 60,
            },
            &HealthConfig::default(),
        )
    }

    #[test]
    fn args_carry_resources() {
        let args = plan().args();
        assert_eq!(&args[..2], ["run", "hyperkit"]);
        assert!(args.contains(&"-cpus=2".to_string()));
        assert!(args.contains(&"-mem=8192".to_string()));
        let disk = args.iter().position(|a| a == "-disk").expect("-disk flag");
        assert_eq!(args[disk + 1], "size=60G");
    }

    #[test]
    fn args_publish_both_probe_ports() {
        let args = plan().args();
        let published: Vec<&String> = args
            .windows(2)
            .filter(|w| w[0] == "-publish")
            .map(|w| &w[1])
            .collect();
        assert_eq!(published, ["9999:9999/tcp", "9998:9998/tcp"]);
    }

    #[test]
    fn args_end_with_state_and_iso() {
        let args = plan().args();
        let n = args.len();
        assert_eq!(args[n - 3], "-state");
        assert_eq!(args[n - 2], "/Users/op/.blt/state/linuxkit");
        assert_eq!(args[n - 1], "/Users/op/.blt/assets/bosh-lit-efi.iso");
    }

    #[cfg(not(target_os = "macos"))]
    #[tokio::test]
    async fn stub_launch_returns_err() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = BltPaths::from_home(tmp.path());
        let err = launch_vm(&paths, &plan()).await.unwrap_err();
        assert!(err.to_string().contains("macOS"), "got: {err}");
    }
}
