//! blt: supervisor for a local BOSH Lit VM.
//!
//! Two independent halves:
//!
//! - [`vm`]: status from process liveness plus two TCP health probes,
//!   waiting for a status, graceful-then-forced stop, destroy gating.
//! - [`assets`]: retried downloads with live progress, SHA-1 verification
//!   and an atomic swap of the asset directory.
//!
//! [`up`] composes them with [`preflight`] and [`deploy`].

pub mod assets;
pub mod config;
pub mod deploy;
pub mod error;
pub mod logging;
pub mod paths;
pub mod preflight;
pub mod up;
pub mod vm;

pub use error::{BltError, BltResult};
