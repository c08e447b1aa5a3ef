//! VM lifecycle supervision.
//!
//! Status is never stored: every call recombines process liveness with the
//! two health probes. Transitions are observed, not driven; only the launcher
//! moves a VM out of `Stopped` and only [`Supervisor::stop`] moves it back.
//!
//! ## Architecture
//!
//! ```text
//! status()
//!     ├─► ProcessRecord::live_pid()    (pid file + signal 0)
//!     └─► cpi.ping() ∥ forwarder.ping()
//!
//! wait_for_status(desired, timeout)
//!     └─► status() every poll_interval, bounded by tokio::time::timeout
//!
//! stop()
//!     └─► SIGINT ─► wait_for_status(Stopped, stop_grace) ─► SIGKILL on timeout
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::HealthConfig;
use crate::error::{BltError, BltResult};
use crate::paths::BltPaths;
use crate::vm::VmStatus;
use crate::vm::probe::{HealthProbe, TcpProbe};
use crate::vm::process::{self, ProcessRecord};

/// Sampling cadence and grace window.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorTimings {
    pub poll_interval: Duration,
    pub stop_grace: Duration,
}

impl From<&HealthConfig> for SupervisorTimings {
    fn from(cfg: &HealthConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval(),
            stop_grace: cfg.stop_grace(),
        }
    }
}

pub struct Supervisor {
    record: ProcessRecord,
    cpi: Arc<dyn HealthProbe>,
    forwarder: Arc<dyn HealthProbe>,
    timings: SupervisorTimings,
}

impl Supervisor {
    /// Supervisor for the VM rooted at `paths`, probing the configured ports.
    pub fn new(paths: &BltPaths, health: &HealthConfig) -> Self {
        Self::with_probes(
            ProcessRecord::new(paths.pid_file()),
            Arc::new(TcpProbe::new("cpi", health.cpi_addr, health.probe_timeout())),
            Arc::new(TcpProbe::new(
                "forwarder",
                health.forwarder_addr,
                health.probe_timeout(),
            )),
            SupervisorTimings::from(health),
        )
    }

    pub fn with_probes(
        record: ProcessRecord,
        cpi: Arc<dyn HealthProbe>,
        forwarder: Arc<dyn HealthProbe>,
        timings: SupervisorTimings,
    ) -> Self {
        Self {
            record,
            cpi,
            forwarder,
            timings,
        }
    }

    pub fn record(&self) -> &ProcessRecord {
        &self.record
    }

    /// Determine the current status.
    ///
    /// Never fails: an unusable process record reads as `Stopped` and a
    /// failing probe as `Unresponsive`. Probes are skipped entirely when no
    /// live process is recorded.
    pub async fn status(&self) -> VmStatus {
        let Some(pid) = self.record.live_pid() else {
            return VmStatus::Stopped;
        };

        let (cpi, forwarder) = tokio::join!(self.cpi.ping(), self.forwarder.ping());

        let mut healthy = true;
        for (name, result) in [(self.cpi.name(), cpi), (self.forwarder.name(), forwarder)] {
            if let Err(e) = result {
                debug!(pid = pid.as_raw(), probe = name, error = %e, "health probe failed");
                healthy = false;
            }
        }

        if healthy {
            VmStatus::Running
        } else {
            VmStatus::Unresponsive
        }
    }

    /// Poll [`status`](Self::status) until it reports `desired`.
    ///
    /// The first sample is taken immediately, then one per poll interval.
    /// Fails with [`BltError::WaitTimeout`] once `timeout` elapses; an
    /// in-flight sample is abandoned at that point.
    pub async fn wait_for_status(&self, desired: VmStatus, timeout: Duration) -> BltResult<()> {
        let started = Instant::now();
        let mut last = None;

        let observed = tokio::time::timeout(timeout, async {
            let mut ticker = tokio::time::interval(self.timings.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let status = self.status().await;
                last = Some(status);
                if status == desired {
                    return;
                }
            }
        })
        .await;

        match observed {
            Ok(()) => {
                debug!(status = %desired, elapsed = ?started.elapsed(), "VM reached desired status");
                Ok(())
            }
            Err(_) => Err(BltError::WaitTimeout {
                desired,
                last,
                elapsed: started.elapsed(),
            }),
        }
    }

    /// Shut the VM down, gracefully if possible.
    ///
    /// Sends `SIGINT`, waits up to the stop grace window for `Stopped`, then
    /// sends `SIGKILL`. Stopping a VM that is not running is a no-op. Callers
    /// that need confirmation should check [`status`](Self::status) afterwards.
    pub async fn stop(&self) {
        let Some(pid) = self.record.live_pid() else {
            debug!("no live VM process recorded; nothing to stop");
            return;
        };

        info!(pid = pid.as_raw(), "interrupting VM process");
        if let Err(e) = process::interrupt(pid) {
            warn!(pid = pid.as_raw(), error = %e, "failed to interrupt VM process");
        }

        match self
            .wait_for_status(VmStatus::Stopped, self.timings.stop_grace)
            .await
        {
            Ok(()) => {
                info!(pid = pid.as_raw(), "VM stopped");
                if let Err(e) = self.record.clear() {
                    warn!(error = %e, "failed to remove stale process record");
                }
            }
            Err(e) => {
                warn!(
                    pid = pid.as_raw(),
                    grace = ?self.timings.stop_grace,
                    error = %e,
                    "VM did not terminate gracefully, force quitting"
                );
                if let Err(e) = process::force_kill(pid) {
                    warn!(pid = pid.as_raw(), error = %e, "failed to kill VM process");
                }
            }
        }
    }

    /// Check that the VM is in `required` status before `operation`.
    pub async fn require_status(
        &self,
        required: VmStatus,
        operation: &'static str,
    ) -> BltResult<()> {
        let actual = self.status().await;
        if actual == required {
            Ok(())
        } else {
            Err(BltError::Precondition {
                operation,
                required,
                actual,
            })
        }
    }

    /// Wipe all saved VM state. Only allowed while exactly `Stopped`.
    pub async fn destroy_state(&self, paths: &BltPaths) -> BltResult<()> {
        self.require_status(VmStatus::Stopped, "destroy its state")
            .await?;

        match std::fs::remove_dir_all(&paths.state) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(BltError::io(
                    format!("remove {}", paths.state.display()),
                    e,
                ));
            }
        }
        std::fs::create_dir_all(&paths.state)
            .map_err(|e| BltError::io(format!("recreate {}", paths.state.display()), e))?;

        info!(state = %paths.state.display(), "VM state destroyed");
        Ok(())
    }
}
