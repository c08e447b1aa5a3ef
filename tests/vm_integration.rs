//! End-to-end VM lifecycle against a real hypervisor runner.
//!
//! Boots the VM with `linuxkit run hyperkit` from an installed asset bundle,
//! waits for both health probes, then stops it again. Requires macOS,
//! linuxkit, and an asset tree, so the tests are gated with the
//! `vm-integration-tests` feature flag.
//!
//! # Running
//!
//! ```bash
//! BLT_TEST_ASSETS=~/.blt/assets \
//!     cargo test --features vm-integration-tests --test vm_integration
//! ```
//!
//! The asset tree is copied into a temporary home, so the test never touches
//! the operator's own state.

#![cfg(all(feature = "vm-integration-tests", target_os = "macos"))]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};

use blt::config::BltConfig;
use blt::paths::BltPaths;
use blt::preflight::find_in_path;
use blt::vm::launcher::LaunchPlan;
use blt::vm::{Supervisor, VmStatus, launch_vm};

// ---------------------------------------------------------------------------
// Environment variable helpers
// ---------------------------------------------------------------------------

/// Installed asset tree to boot from.
fn test_assets() -> PathBuf {
    std::env::var("BLT_TEST_ASSETS")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(".blt").join("assets")
        })
}

/// Seconds to wait for the VM to report `Running`.
fn test_start_timeout() -> Duration {
    std::env::var("BLT_TEST_START_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(120))
}

// ---------------------------------------------------------------------------
// TestVm helper
// ---------------------------------------------------------------------------

/// A booted VM in a throwaway home.
///
/// `Drop` sends a best-effort SIGKILL so the runner does not outlive the test.
struct TestVm {
    paths: BltPaths,
    supervisor: Supervisor,
    _tmp: tempfile::TempDir,
}

impl TestVm {
    async fn boot() -> Result<Self> {
        let path_var = std::env::var_os("PATH").unwrap_or_default();
        if find_in_path("linuxkit", &path_var).is_none() {
            bail!("linuxkit not found on PATH; install: brew install linuxkit/linuxkit/linuxkit");
        }

        let source = test_assets();
        if !source.join("bosh-lit-efi.iso").exists() {
            bail!(
                "No asset tree at {}. Run `blt fetch` or set BLT_TEST_ASSETS.",
                source.display()
            );
        }

        let tmp = tempfile::TempDir::new().context("create temp home")?;
        let paths = BltPaths::from_home(tmp.path().join(".blt"));
        paths.ensure()?;
        copy_tree(&source, &paths.assets)?;

        let config = BltConfig::default();
        let supervisor = Supervisor::new(&paths, &config.health);
        assert_eq!(supervisor.status().await, VmStatus::Stopped);

        let plan = LaunchPlan::new(&paths, &config.vm, &config.health);
        launch_vm(&paths, &plan).await?;
        supervisor
            .wait_for_status(VmStatus::Running, test_start_timeout())
            .await
            .with_context(|| {
                format!("VM never became healthy; see {}", paths.runner_log().display())
            })?;

        Ok(Self {
            paths,
            supervisor,
            _tmp: tmp,
        })
    }
}

impl Drop for TestVm {
    fn drop(&mut self) {
        if let Some(pid) = self.supervisor.record().live_pid() {
            let _ = blt::vm::process::force_kill(pid);
        }
    }
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)
                .with_context(|| format!("copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn vm_boots_and_stops_gracefully() -> Result<()> {
    let vm = TestVm::boot().await?;
    assert_eq!(vm.supervisor.status().await, VmStatus::Running);
    assert!(vm.paths.pid_file().exists());

    vm.supervisor.stop().await;
    vm.supervisor
        .wait_for_status(VmStatus::Stopped, Duration::from_secs(5))
        .await?;
    Ok(())
}

#[tokio::test]
async fn destroy_is_refused_while_running() -> Result<()> {
    let vm = TestVm::boot().await?;

    let err = vm.supervisor.destroy_state(&vm.paths).await.unwrap_err();
    assert!(err.to_string().contains("Stopped"), "got: {err}");
    assert!(vm.paths.linuxkit_state.exists());

    vm.supervisor.stop().await;
    Ok(())
}
