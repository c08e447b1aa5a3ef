//! Asset acquisition: download, integrity check and installation of the
//! versioned bundle holding the VM image and deployment inputs.

pub mod fetch;
pub mod install;
pub mod pipeline;
pub mod progress;
pub mod verify;

pub use fetch::{Fetcher, RetryPolicy};
pub use install::{VERSION_MARKER, install_bundle, unpack};
pub use pipeline::AssetPipeline;
pub use progress::{AttemptLabel, ProgressEvent, ProgressSink, format_bytes};
pub use verify::{sha1_hex, verify_sha1};

use crate::paths::BltPaths;

/// Version that never triggers a download; used by development builds.
pub const DEV_VERSION: &str = "DEV";

/// Bundle version this binary was built against.
///
/// Release builds set `BLT_ASSET_VERSION` at compile time.
pub const BUILD_ASSET_VERSION: &str = match option_env!("BLT_ASSET_VERSION") {
    Some(version) => version,
    None => DEV_VERSION,
};

/// Whether the installed assets differ from `version`.
pub fn needs_update(paths: &BltPaths, version: &str) -> bool {
    if version == DEV_VERSION {
        return false;
    }
    match std::fs::read_to_string(paths.asset_version_file()) {
        Ok(installed) => installed.trim() != version,
        Err(_) => true,
    }
}
