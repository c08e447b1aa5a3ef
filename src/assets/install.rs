//! Unpacking a verified bundle and swapping it into place.
//!
//! The new tree is assembled inside a staging directory next to the target,
//! so the final step is a pair of renames on the same filesystem. Until the
//! second rename succeeds the previous tree stays recoverable.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{BltError, BltResult};

/// File inside the asset tree recording which bundle version it holds.
pub const VERSION_MARKER: &str = "version";

const STAGING_PREFIX: &str = ".assets-staging-";

/// Extract `archive` into `destination` with the system `tar`.
pub async fn unpack(archive: &Path, destination: &Path) -> BltResult<()> {
    let output = Command::new("tar")
        .arg("xf")
        .arg(archive)
        .arg("-C")
        .arg(destination)
        .output()
        .await
        .map_err(|e| BltError::io("failed to run tar", e))?;

    if output.status.success() {
        return Ok(());
    }

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    Err(BltError::Unpack {
        archive: archive.to_path_buf(),
        destination: destination.to_path_buf(),
        status: output.status.to_string(),
        output: combined.trim().to_string(),
    })
}

/// Replace `target` with the contents of `archive`, tagged with `version`.
///
/// When the archive has a top-level directory named like `target` (the
/// published bundles carry `assets/`), that directory becomes the new tree.
/// Otherwise the archive root does.
pub async fn install_bundle(archive: &Path, target: &Path, version: &str) -> BltResult<()> {
    let parent = target.parent().ok_or_else(|| {
        BltError::io(
            format!("{} has no parent directory", target.display()),
            std::io::Error::from(std::io::ErrorKind::InvalidInput),
        )
    })?;
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| BltError::io(format!("failed to create {}", parent.display()), e))?;

    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(parent)
        .map_err(|e| BltError::io(format!("failed to create staging dir in {}", parent.display()), e))?;

    let unpack_root = staging.path().join("unpack");
    tokio::fs::create_dir(&unpack_root)
        .await
        .map_err(|e| BltError::io(format!("failed to create {}", unpack_root.display()), e))?;

    unpack(archive, &unpack_root).await?;

    let (new_tree, ignored) = new_tree_root(&unpack_root, target).await?;
    if !ignored.is_empty() {
        warn!(
            archive = %archive.display(),
            ignored = ?ignored,
            "archive entries outside the asset directory are not installed"
        );
    }
    let marker = new_tree.join(VERSION_MARKER);
    tokio::fs::write(&marker, format!("{version}\n"))
        .await
        .map_err(|e| BltError::io(format!("failed to write {}", marker.display()), e))?;

    swap_into_place(&new_tree, target, &staging.path().join("previous")).await?;
    info!(target = %target.display(), version, "assets installed");

    let staging_path = staging.path().to_path_buf();
    match tokio::task::spawn_blocking(move || staging.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(path = %staging_path.display(), error = %e, "failed to remove staging dir"),
        Err(e) => warn!(path = %staging_path.display(), error = %e, "staging cleanup did not complete"),
    }
    Ok(())
}

/// The directory to install, plus any top-level entries left out of it.
async fn new_tree_root(unpack_root: &Path, target: &Path) -> BltResult<(PathBuf, Vec<OsString>)> {
    let Some(name) = target.file_name() else {
        return Ok((unpack_root.to_path_buf(), Vec::new()));
    };
    let nested = unpack_root.join(name);
    if !tokio::fs::metadata(&nested).await.is_ok_and(|m| m.is_dir()) {
        return Ok((unpack_root.to_path_buf(), Vec::new()));
    }

    let mut ignored = Vec::new();
    let mut entries = tokio::fs::read_dir(unpack_root)
        .await
        .map_err(|e| BltError::io(format!("failed to list {}", unpack_root.display()), e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| BltError::io(format!("failed to list {}", unpack_root.display()), e))?
    {
        if entry.file_name() != name {
            ignored.push(entry.file_name());
        }
    }
    ignored.sort();
    Ok((nested, ignored))
}

/// Move `target` aside to `previous`, then `new_tree` to `target`.
/// Restores `previous` if the second rename fails.
async fn swap_into_place(new_tree: &Path, target: &Path, previous: &Path) -> BltResult<()> {
    let had_previous = match tokio::fs::rename(target, previous).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            return Err(BltError::io(
                format!("failed to move {} aside", target.display()),
                e,
            ));
        }
    };

    if let Err(e) = tokio::fs::rename(new_tree, target).await {
        if had_previous {
            if let Err(restore) = tokio::fs::rename(previous, target).await {
                warn!(
                    previous = %previous.display(),
                    error = %restore,
                    "failed to restore previous assets"
                );
            }
        }
        return Err(BltError::io(
            format!("failed to move new assets into {}", target.display()),
            e,
        ));
    }

    debug!(target = %target.display(), replaced = had_previous, "asset tree swapped");
    Ok(())
}
