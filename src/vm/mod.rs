//! VM management module for blt.
//!
//! Provides the process record, the two health probes, the lifecycle
//! supervisor that combines them into a [`VmStatus`], and the hypervisor
//! runner invocation.

use std::fmt;

pub mod launcher;
pub mod lifecycle;
pub mod probe;
pub mod process;

// ---------------------------------------------------------------------------
// Shared types used across submodules
// ---------------------------------------------------------------------------

/// Observed lifecycle state of the VM.
///
/// Never persisted: always recomputed from process liveness and both probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VmStatus {
    /// The recorded process is alive and both probes succeed.
    Running,
    /// No live process is recorded.
    Stopped,
    /// The recorded process is alive but at least one probe fails.
    Unresponsive,
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VmStatus::Running => "Running",
            VmStatus::Stopped => "Stopped",
            VmStatus::Unresponsive => "Unresponsive",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use launcher::launch_vm;
pub use lifecycle::{Supervisor, SupervisorTimings};
pub use probe::{HealthProbe, TcpProbe};
pub use process::ProcessRecord;

#[cfg(test)]
mod tests {
    use super::VmStatus;

    #[test]
    fn status_displays_its_name() {
        assert_eq!(VmStatus::Running.to_string(), "Running");
        assert_eq!(VmStatus::Stopped.to_string(), "Stopped");
        assert_eq!(VmStatus::Unresponsive.to_string(), "Unresponsive");
    }
}
