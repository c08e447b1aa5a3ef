//! SHA-1 integrity check of downloaded files.

use std::fs::File;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};

use crate::error::{BltError, BltResult};

/// Lowercase hex SHA-1 of the file at `path`.
pub fn sha1_hex(path: &Path) -> BltResult<String> {
    let mut file =
        File::open(path).map_err(|e| BltError::io(format!("failed to open {}", path.display()), e))?;
    let mut hasher = Sha1::new();
    std::io::copy(&mut file, &mut hasher)
        .map_err(|e| BltError::io(format!("failed to read {}", path.display()), e))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Compare the file's digest with `expected` after trimming whitespace.
///
/// The comparison is case-sensitive against the lowercase digest.
pub fn verify_sha1(path: &Path, expected: &str) -> BltResult<()> {
    let expected = expected.trim();
    let actual = sha1_hex(path)?;
    if actual == expected {
        Ok(())
    } else {
        Err(BltError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        })
    }
}

/// [`verify_sha1`] on the blocking pool; hashing a bundle takes a while.
pub async fn verify_sha1_blocking(path: PathBuf, expected: String) -> BltResult<()> {
    let display = path.display().to_string();
    tokio::task::spawn_blocking(move || verify_sha1(&path, &expected))
        .await
        .map_err(|e| {
            BltError::io(
                format!("verification of {display} did not complete"),
                std::io::Error::other(e),
            )
        })?
}
