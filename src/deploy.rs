//! Director deployment once the VM is running.
//!
//! The lifecycle code only needs "deploy now, tell me if it failed"; the
//! [`Deployer`] trait is that boundary. [`CommandDeployer`] implements it
//! with the `bosh` CLI:
//!
//! 1. drop `current_manifest_sha` from the previous deployment state so
//!    `create-env` re-applies the manifest against the fresh VM
//! 2. `bosh create-env` with the bundled manifest and operations files
//! 3. extract the director CA and the jumpbox key from the vars store

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::paths::BltPaths;
use crate::preflight::DIRECTOR_IP;

#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, paths: &BltPaths) -> Result<()>;
}

/// Deploys with the `bosh` CLI found on `PATH`.
#[derive(Debug, Clone)]
pub struct CommandDeployer {
    program: PathBuf,
}

impl Default for CommandDeployer {
    fn default() -> Self {
        Self::new("bosh")
    }
}

impl CommandDeployer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments for `bosh create-env`.
    pub fn create_env_args(paths: &BltPaths) -> Vec<String> {
        let deployment = paths.bosh_deployment_dir();
        let operations = paths.bosh_operations_dir();
        let display = |p: PathBuf| p.display().to_string();

        let mut args = vec![
            "create-env".to_string(),
            display(deployment.join("bosh.yml")),
            "-o".to_string(),
            display(deployment.join("jumpbox-user.yml")),
            "-o".to_string(),
            display(operations.join("runc-cpi.yml")),
            "--state".to_string(),
            display(paths.bosh_state_json()),
            "--vars-store".to_string(),
            display(paths.bosh_creds()),
        ];
        for var in [
            "director_name=director".to_string(),
            "external_cpid_ip=127.0.0.1".to_string(),
            "internal_cpid_ip=192.168.65.3".to_string(),
            "internal_cpid_gw=192.168.65.1".to_string(),
            format!("internal_ip={DIRECTOR_IP}"),
            "internal_gw=10.0.0.1".to_string(),
            "internal_cidr=10.0.0.0/16".to_string(),
        ] {
            args.push("-v".to_string());
            args.push(var);
        }
        args
    }

    async fn extract_credentials(&self, paths: &BltPaths) -> Result<()> {
        let creds = paths.bosh_creds();

        let ca = self.interpolate(&creds, "/director_ssl/ca").await?;
        let ca_path = paths.bosh_ca_cert();
        tokio::fs::write(&ca_path, ca)
            .await
            .with_context(|| format!("failed to write {}", ca_path.display()))?;

        let key = self.interpolate(&creds, "/jumpbox_ssh/private_key").await?;
        let key_path = paths.bosh_gw_private_key();
        tokio::fs::write(&key_path, key)
            .await
            .with_context(|| format!("failed to write {}", key_path.display()))?;
        tokio::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))
            .await
            .with_context(|| format!("failed to restrict {}", key_path.display()))?;

        Ok(())
    }

    /// `bosh int <file> --path <path>`, returning stdout.
    async fn interpolate(&self, file: &Path, path: &str) -> Result<Vec<u8>> {
        let program = self.program.display().to_string();
        let output = Command::new(&self.program)
            .arg("int")
            .arg(file)
            .args(["--path", path])
            .output()
            .await
            .with_context(|| format!("failed to spawn `{program}` for: int {path}"))?;

        if !output.status.success() {
            bail!(
                "`{program} int {} --path {path}` failed ({}): {}",
                file.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl Deployer for CommandDeployer {
    async fn deploy(&self, paths: &BltPaths) -> Result<()> {
        tokio::fs::create_dir_all(paths.bosh_state_dir())
            .await
            .with_context(|| format!("failed to create {}", paths.bosh_state_dir().display()))?;
        reset_state_json(&paths.bosh_state_json())?;

        run_command(&self.program, &Self::create_env_args(paths), "deploy director").await?;

        self.extract_credentials(paths)
            .await
            .context("failed to configure director credentials")?;
        info!("director deployed");
        Ok(())
    }
}

/// Remove `current_manifest_sha` from the deployment state, if present.
///
/// A missing file is fine; so is a file that is not a JSON object, which
/// `create-env` will report itself.
pub fn reset_state_json(path: &Path) -> Result<()> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };

    let Ok(serde_json::Value::Object(mut state)) = serde_json::from_slice(&data) else {
        debug!(path = %path.display(), "deployment state is not a JSON object, leaving as is");
        return Ok(());
    };
    if state.remove("current_manifest_sha").is_none() {
        return Ok(());
    }

    let contents = serde_json::to_vec(&state).context("failed to encode deployment state")?;
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("failed to restrict {}", path.display()))?;
    Ok(())
}

/// Spawn an external command with inherited stdio and map non-zero exit to `Err`.
async fn run_command(program: &Path, args: &[String], label: &str) -> Result<()> {
    let name = program.display();
    let status = Command::new(program)
        .args(args)
        .status()
        .await
        .with_context(|| format!("failed to spawn `{name}` for: {label}"))?;

    if status.success() {
        Ok(())
    } else {
        bail!(
            "`{name} {}` failed (exit {}) during: {label}",
            args.first().map(String::as_str).unwrap_or_default(),
            status.code().unwrap_or(-1)
        )
    }
}
