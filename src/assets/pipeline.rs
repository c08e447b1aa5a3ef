use std::time::Duration;

use tracing::info;
use url::Url;

use crate::assets::fetch::{Fetcher, RetryPolicy};
use crate::assets::install::install_bundle;
use crate::assets::progress::{ProgressEvent, ProgressSink};
use crate::config::AssetConfig;
use crate::error::{BltError, BltResult};
use crate::paths::BltPaths;

/// Fetches a versioned asset bundle, verifies it against its published
/// checksum, and installs it as the asset directory.
#[derive(Debug, Clone)]
pub struct AssetPipeline {
    fetcher: Fetcher,
    base_url: Url,
    bundle_name: String,
    manifest_name: String,
}

impl AssetPipeline {
    pub fn new(
        client: reqwest::Client,
        base_url: Url,
        bundle_name: impl Into<String>,
        manifest_name: impl Into<String>,
        retry: RetryPolicy,
        tick: Duration,
    ) -> Self {
        Self {
            fetcher: Fetcher::new(client, retry, tick),
            base_url,
            bundle_name: bundle_name.into(),
            manifest_name: manifest_name.into(),
        }
    }

    pub fn from_config(config: &AssetConfig) -> BltResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("blt/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BltError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self::new(
            client,
            config.base_url()?,
            config.bundle_name.clone(),
            config.manifest_name.clone(),
            RetryPolicy {
                retries: config.retries,
                delay: config.retry_delay(),
            },
            config.progress_tick(),
        ))
    }

    /// `<base>/<version>/<name>`
    pub fn url_for(&self, version: &str, name: &str) -> BltResult<Url> {
        self.base_url
            .join(&format!("{version}/{name}"))
            .map_err(|e| BltError::Config(format!("invalid asset URL for {version}/{name}: {e}")))
    }

    /// Download, verify and install `version` into `paths.assets`.
    ///
    /// The asset directory is only touched after the bundle has passed
    /// integrity validation. Downloaded files are removed on every path.
    pub async fn fetch_and_install(
        &self,
        version: &str,
        paths: &BltPaths,
        progress: &ProgressSink,
    ) -> BltResult<()> {
        let manifest_url = self.url_for(version, &self.manifest_name)?;
        let bundle_url = self.url_for(version, &self.bundle_name)?;

        let manifest_path = self.fetcher.fetch(&manifest_url, None, progress).await?;
        let expected = tokio::fs::read_to_string(&manifest_path)
            .await
            .map_err(|e| BltError::io(format!("failed to read {}", manifest_path.display()), e))?;
        drop(manifest_path);

        let bundle_path = self
            .fetcher
            .fetch(&bundle_url, Some(&expected), progress)
            .await?;

        progress.emit(ProgressEvent::Unpacking {
            destination: paths.assets.clone(),
        });
        install_bundle(&bundle_path, &paths.assets, version).await?;

        progress.emit(ProgressEvent::Installed {
            destination: paths.assets.clone(),
            version: version.to_string(),
        });
        info!(version, assets = %paths.assets.display(), "asset bundle ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_nest_version_under_base() {
        let pipeline = AssetPipeline::from_config(&AssetConfig::default()).unwrap();
        assert_eq!(
            pipeline.url_for("v0.4.1", "assets.tgz").unwrap().as_str(),
            "https://github.com/aemengo/blt/releases/download/v0.4.1/assets.tgz"
        );
        assert_eq!(
            pipeline.url_for("v0.4.1", "assets.tgz.sha1").unwrap().as_str(),
            "https://github.com/aemengo/blt/releases/download/v0.4.1/assets.tgz.sha1"
        );
    }
}
