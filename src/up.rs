//! `up`: bring a stopped VM to a deployed director.
//!
//! ```text
//! status ─► preflight ─► assets stale? ─► fetch+install ─► launch
//!        ─► wait_for_status(Running, start_timeout) ─► deploy
//! ```

use std::ffi::OsString;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::info;

use crate::assets::{AssetPipeline, ProgressSink, needs_update};
use crate::config::{BltConfig, VmResources};
use crate::deploy::Deployer;
use crate::error::BltError;
use crate::paths::BltPaths;
use crate::preflight;
use crate::vm::launcher::{LaunchPlan, launch_vm};
use crate::vm::{Supervisor, VmStatus};

#[derive(Debug, Clone)]
pub struct UpOptions {
    pub resources: VmResources,
    pub asset_version: String,
    /// `PATH` to search for external tools; the process `PATH` when `None`.
    pub search_path: Option<OsString>,
    /// Host interface addresses; read from the host when `None`.
    pub host_addrs: Option<Vec<IpAddr>>,
}

/// Announced as `up` enters each step, for the caller's own output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpStage {
    Preflight,
    CheckingAssets,
    AssetsCurrent,
    DownloadingAssets { version: String },
    StartingVm,
    VmRunning,
    Deploying,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpOutcome {
    AlreadyRunning,
    Started {
        assets_updated: bool,
        elapsed: Duration,
    },
}

/// Collaborators `up` drives.
pub struct UpContext<'a> {
    pub paths: &'a BltPaths,
    pub config: &'a BltConfig,
    pub supervisor: &'a Supervisor,
    pub pipeline: &'a AssetPipeline,
    pub deployer: &'a dyn Deployer,
}

pub async fn up<F>(
    ctx: &UpContext<'_>,
    options: &UpOptions,
    progress: &ProgressSink,
    mut on_stage: F,
) -> Result<UpOutcome>
where
    F: FnMut(UpStage),
{
    match ctx.supervisor.status().await {
        VmStatus::Running => {
            info!("VM already running");
            return Ok(UpOutcome::AlreadyRunning);
        }
        VmStatus::Unresponsive => {
            return Err(BltError::Precondition {
                operation: "start it",
                required: VmStatus::Stopped,
                actual: VmStatus::Unresponsive,
            }
            .into());
        }
        VmStatus::Stopped => {}
    }

    on_stage(UpStage::Preflight);
    let path_var = options
        .search_path
        .clone()
        .or_else(|| std::env::var_os("PATH"))
        .unwrap_or_default();
    preflight::check_dependencies(preflight::DEPENDENCIES, &path_var)?;
    let host_addrs = match &options.host_addrs {
        Some(addrs) => addrs.clone(),
        None => preflight::host_addresses()?,
    };
    preflight::check_director_addr(&host_addrs)?;

    let started = Instant::now();

    on_stage(UpStage::CheckingAssets);
    let assets_updated = needs_update(ctx.paths, &options.asset_version);
    if assets_updated {
        on_stage(UpStage::DownloadingAssets {
            version: options.asset_version.clone(),
        });
        ctx.pipeline
            .fetch_and_install(&options.asset_version, ctx.paths, progress)
            .await
            .with_context(|| format!("failed to install assets {}", options.asset_version))?;
    } else {
        on_stage(UpStage::AssetsCurrent);
    }

    on_stage(UpStage::StartingVm);
    let plan = LaunchPlan::new(ctx.paths, &options.resources, &ctx.config.health);
    launch_vm(ctx.paths, &plan).await?;
    ctx.supervisor
        .wait_for_status(VmStatus::Running, ctx.config.health.start_timeout())
        .await
        .context("VM did not come up")?;
    on_stage(UpStage::VmRunning);

    on_stage(UpStage::Deploying);
    ctx.deployer
        .deploy(ctx.paths)
        .await
        .context("failed to deploy director")?;

    let elapsed = started.elapsed();
    info!(?elapsed, assets_updated, "up complete");
    Ok(UpOutcome::Started {
        assets_updated,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::config::HealthConfig;
    use crate::error::BltResult;
    use crate::vm::{HealthProbe, ProcessRecord, SupervisorTimings};

    struct Fixed(bool);

    #[async_trait]
    impl HealthProbe for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn ping(&self) -> BltResult<()> {
            if self.0 {
                Ok(())
            } else {
                Err(BltError::Probe {
                    name: "fixed",
                    addr: "test".into(),
                    reason: "down".into(),
                })
            }
        }
    }

    #[derive(Default)]
    struct CountingDeployer(AtomicUsize);

    #[async_trait]
    impl Deployer for CountingDeployer {
        async fn deploy(&self, _paths: &BltPaths) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        _tmp: tempfile::TempDir,
        paths: BltPaths,
        config: BltConfig,
        pipeline: AssetPipeline,
        deployer: CountingDeployer,
    }

    impl Harness {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let paths = BltPaths::from_home(tmp.path().join(".blt"));
            let config = BltConfig::default();
            let pipeline = AssetPipeline::from_config(&config.assets).unwrap();
            Self {
                _tmp: tmp,
                paths,
                config,
                pipeline,
                deployer: CountingDeployer::default(),
            }
        }

        /// Supervisor whose record points at this test process.
        fn supervisor(&self, cpi: bool, forwarder: bool) -> Supervisor {
            let record = ProcessRecord::new(self.paths.pid_file());
            record.write(std::process::id()).unwrap();
            Supervisor::with_probes(
                record,
                Arc::new(Fixed(cpi)),
                Arc::new(Fixed(forwarder)),
                SupervisorTimings::from(&HealthConfig::default()),
            )
        }

        fn options(&self) -> UpOptions {
            UpOptions {
                resources: self.config.vm.clone(),
                asset_version: "v1.0.0".into(),
                search_path: Some(OsString::new()),
                host_addrs: Some(vec![IpAddr::V4(preflight::DIRECTOR_IP)]),
            }
        }
    }

    #[tokio::test]
    async fn running_vm_is_left_alone() {
        let h = Harness::new();
        let supervisor = h.supervisor(true, true);
        let ctx = UpContext {
            paths: &h.paths,
            config: &h.config,
            supervisor: &supervisor,
            pipeline: &h.pipeline,
            deployer: &h.deployer,
        };

        let mut stages = Vec::new();
        let outcome = up(&ctx, &h.options(), &ProgressSink::discard(), |s| stages.push(s))
            .await
            .unwrap();

        assert_eq!(outcome, UpOutcome::AlreadyRunning);
        assert!(stages.is_empty());
        assert_eq!(h.deployer.0.load(Ordering::SeqCst), 0);
        assert!(!h.paths.assets.exists());
    }

    #[tokio::test]
    async fn unresponsive_vm_is_a_precondition_error() {
        let h = Harness::new();
        let supervisor = h.supervisor(true, false);
        let ctx = UpContext {
            paths: &h.paths,
            config: &h.config,
            supervisor: &supervisor,
            pipeline: &h.pipeline,
            deployer: &h.deployer,
        };

        let err = up(&ctx, &h.options(), &ProgressSink::discard(), |_| {})
            .await
            .unwrap_err();

        match err.downcast_ref::<BltError>() {
            Some(BltError::Precondition {
                required, actual, ..
            }) => {
                assert_eq!(*required, VmStatus::Stopped);
                assert_eq!(*actual, VmStatus::Unresponsive);
            }
            other => panic!("expected Precondition, got {other:?}"),
        }
        assert_eq!(h.deployer.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_tools_stop_before_any_download() {
        let h = Harness::new();
        let supervisor = Supervisor::with_probes(
            ProcessRecord::new(h.paths.pid_file()),
            Arc::new(Fixed(true)),
            Arc::new(Fixed(true)),
            SupervisorTimings::from(&HealthConfig::default()),
        );
        let ctx = UpContext {
            paths: &h.paths,
            config: &h.config,
            supervisor: &supervisor,
            pipeline: &h.pipeline,
            deployer: &h.deployer,
        };

        let mut stages = Vec::new();
        let err = up(&ctx, &h.options(), &ProgressSink::discard(), |s| stages.push(s))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("dependencies must be installed"), "got: {err}");
        assert_eq!(stages, [UpStage::Preflight]);
        assert!(!h.paths.assets.exists());
        assert_eq!(h.deployer.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_director_alias_stops_before_any_download() {
        let h = Harness::new();
        let tools = tempfile::tempdir().unwrap();
        for dep in preflight::DEPENDENCIES {
            let tool = tools.path().join(dep.name);
            std::fs::write(&tool, "#!/bin/sh\n").unwrap();
            std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let supervisor = Supervisor::with_probes(
            ProcessRecord::new(h.paths.pid_file()),
            Arc::new(Fixed(true)),
            Arc::new(Fixed(true)),
            SupervisorTimings::from(&HealthConfig::default()),
        );
        let ctx = UpContext {
            paths: &h.paths,
            config: &h.config,
            supervisor: &supervisor,
            pipeline: &h.pipeline,
            deployer: &h.deployer,
        };
        let options = UpOptions {
            search_path: Some(tools.path().as_os_str().to_owned()),
            host_addrs: Some(vec!["127.0.0.1".parse().unwrap()]),
            ..h.options()
        };

        let mut stages = Vec::new();
        let err = up(&ctx, &options, &ProgressSink::discard(), |s| stages.push(s))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("sudo ifconfig lo0 alias 10.0.0.4"), "got: {err}");
        assert_eq!(stages, [UpStage::Preflight]);
        assert!(!h.paths.assets.exists());
        assert_eq!(h.deployer.0.load(Ordering::SeqCst), 0);
    }
}
