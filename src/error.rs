//! Error taxonomy for the lifecycle supervisor and the asset pipeline.
//!
//! Library operations return [`BltResult`]; the binary and the `up`
//! sequencing wrap these in `anyhow` with additional context.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::vm::VmStatus;

pub type BltResult<T> = Result<T, BltError>;

#[derive(Debug, Error)]
pub enum BltError {
    /// Connection failure or an error while streaming the response body.
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("received [{status}] for {url}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to fetch {url} after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        #[source]
        last: Box<BltError>,
    },

    #[error("checksum validation failed for {}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("failed to unpack {} into {}: {status}: {output}", archive.display(), destination.display())]
    Unpack {
        archive: PathBuf,
        destination: PathBuf,
        status: String,
        output: String,
    },

    #[error("your VM must be {required} before you can {operation}, it is currently: {actual}")]
    Precondition {
        operation: &'static str,
        required: VmStatus,
        actual: VmStatus,
    },

    #[error(
        "VM failed to reach a status of {desired} after {elapsed:?} (last seen: {})",
        describe_last(.last)
    )]
    WaitTimeout {
        desired: VmStatus,
        last: Option<VmStatus>,
        elapsed: Duration,
    },

    #[error("health probe {name} ({addr}) failed: {reason}")]
    Probe {
        name: &'static str,
        addr: String,
        reason: String,
    },

    #[error("invalid process record {}: {reason}", path.display())]
    ProcessRecord { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl BltError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether a failed fetch attempt may be retried.
    ///
    /// Only network-side failures qualify. Integrity and local I/O errors
    /// escalate immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::HttpStatus { .. })
    }
}

fn describe_last(last: &Option<VmStatus>) -> String {
    match last {
        Some(status) => status.to_string(),
        None => "never sampled".to_string(),
    }
}
