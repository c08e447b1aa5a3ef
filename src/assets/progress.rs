//! Progress events emitted by the asset pipeline.
//!
//! Delivery is best-effort: events go through a bounded channel with
//! `try_send`, so a slow or absent consumer never holds up a download.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Identifies one fetch attempt in progress output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptLabel {
    pub attempt: u32,
    pub attempts: u32,
    /// File name of the URL being fetched.
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Periodic transfer tick.
    Fetching {
        label: AttemptLabel,
        transferred: u64,
        total: Option<u64>,
    },
    /// Terminal event of a successful attempt.
    Fetched {
        label: AttemptLabel,
        transferred: u64,
        elapsed: Duration,
    },
    /// Terminal event of a failed attempt.
    AttemptFailed { label: AttemptLabel, reason: String },
    Retrying {
        next_attempt: u32,
        attempts: u32,
        delay: Duration,
    },
    Verifying { name: String },
    Unpacking { destination: PathBuf },
    Installed { destination: PathBuf, version: String },
}

impl ProgressEvent {
    /// Whether the event ends an attempt's reporting.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fetched { .. } | Self::AttemptFailed { .. })
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetching {
                label,
                transferred,
                total,
            } => {
                let total = total.map_or_else(|| "?".to_string(), format_bytes);
                write!(
                    f,
                    "[{}/{}] ({}/{}) Downloading '{}'...",
                    label.attempt,
                    label.attempts,
                    format_bytes(*transferred),
                    total,
                    label.name
                )
            }
            Self::Fetched {
                label,
                transferred,
                elapsed,
            } => write!(
                f,
                "[{}/{}] ({}) Downloaded '{}' in {:.1?}",
                label.attempt,
                label.attempts,
                format_bytes(*transferred),
                label.name,
                elapsed
            ),
            Self::AttemptFailed { label, reason } => write!(
                f,
                "[{}/{}] Downloading '{}' failed: {}",
                label.attempt, label.attempts, label.name, reason
            ),
            Self::Retrying {
                next_attempt,
                attempts,
                delay,
            } => write!(
                f,
                "Retrying in {delay:?} (attempt {next_attempt}/{attempts})"
            ),
            Self::Verifying { name } => write!(f, "Performing integrity validation of '{name}'"),
            Self::Unpacking { destination } => {
                write!(f, "Unpacking assets into {}", destination.display())
            }
            Self::Installed {
                destination,
                version,
            } => write!(
                f,
                "Installed assets {version} at {}",
                destination.display()
            ),
        }
    }
}

/// Caller-supplied destination for progress events.
///
/// Cloning shares the same channel. A sink built with [`ProgressSink::discard`]
/// drops every event.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A bounded channel and a sink feeding it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn discard() -> Self {
        Self { tx: None }
    }

    /// Deliver `event` if there is room. Never blocks, never retries.
    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(event);
        }
    }
}

/// How an attempt's transfer ended, as told to its reporter.
#[derive(Debug)]
pub(crate) enum TransferOutcome {
    Completed,
    Failed(String),
}

/// Per-attempt reporting task.
///
/// The fetch publishes transferred bytes through `progress` and the outcome
/// through `finish`; [`AttemptReporter::finish`] waits for the reporter's
/// terminal event so reporters of consecutive attempts never overlap.
pub(crate) struct AttemptReporter {
    progress: watch::Sender<u64>,
    done: oneshot::Sender<TransferOutcome>,
    handle: JoinHandle<()>,
}

impl AttemptReporter {
    pub(crate) fn spawn(
        sink: ProgressSink,
        label: AttemptLabel,
        total: Option<u64>,
        tick: Duration,
    ) -> Self {
        let (progress, transferred) = watch::channel(0u64);
        let (done, mut outcome) = oneshot::channel();
        let started = tokio::time::Instant::now();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    result = &mut outcome => {
                        let terminal = match result {
                            Ok(TransferOutcome::Completed) => ProgressEvent::Fetched {
                                label,
                                transferred: *transferred.borrow(),
                                elapsed: started.elapsed(),
                            },
                            Ok(TransferOutcome::Failed(reason)) => {
                                ProgressEvent::AttemptFailed { label, reason }
                            }
                            Err(_) => ProgressEvent::AttemptFailed {
                                label,
                                reason: "transfer abandoned".to_string(),
                            },
                        };
                        sink.emit(terminal);
                        return;
                    }
                    _ = ticker.tick() => {
                        sink.emit(ProgressEvent::Fetching {
                            label: label.clone(),
                            transferred: *transferred.borrow(),
                            total,
                        });
                    }
                }
            }
        });

        Self {
            progress,
            done,
            handle,
        }
    }

    /// Publish the running byte count. Counts only ever grow.
    pub(crate) fn advance(&self, transferred: u64) {
        self.progress.send_if_modified(|current| {
            if transferred > *current {
                *current = transferred;
                true
            } else {
                false
            }
        });
    }

    /// Report the outcome and wait until the terminal event has been emitted.
    pub(crate) async fn finish(self, outcome: TransferOutcome) {
        let _ = self.done.send(outcome);
        let _ = self.handle.await;
    }
}

/// Human-readable byte count (SI units, like `12 MB`).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "kB", "MB", "GB", "TB", "PB"];
    if bytes < 1000 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if value < 10.0 {
        format!("{value:.1} {}", UNITS[unit])
    } else {
        format!("{value:.0} {}", UNITS[unit])
    }
}
