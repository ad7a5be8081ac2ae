//! Shell framework download and cache
//!
//! The zsh framework payload is kept in a local cache shared by every
//! compile invocation on the host and copied into the target filesystem by
//! the backend's copy-from-local-cache operation. The download-or-cache
//! check is race tolerant: a download completed concurrently by another
//! invocation counts as success.

use crate::error::{ForgeError, ForgeResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the framework payload within the local cache
pub const FRAMEWORK_CACHE_NAME: &str = "oh-my-zsh.tar.gz";

const ARCHIVE_URL: &str = "https://github.com/ohmyzsh/ohmyzsh/archive/refs/heads/master.tar.gz";

const HOME: &str = "/home/envd";

/// Source of the interactive-shell framework payload and its scripts
#[async_trait]
pub trait FrameworkSource: Send + Sync {
    /// Ensure the framework payload is present in the local cache.
    /// Returns true on cache hit, meaning no network fetch occurred.
    async fn download_or_cache(&self) -> ForgeResult<bool>;

    /// Name of the payload within the local cache
    fn cache_name(&self) -> &str;

    /// Script that installs the framework inside the target filesystem
    fn install_script(&self) -> String;

    /// Rendered run-control file for the framework's shell
    fn run_control_content(&self) -> String;
}

/// oh-my-zsh fetched from the upstream archive
pub struct OhMyZshSource {
    cache_dir: PathBuf,
}

impl Default for OhMyZshSource {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("envforge");
        Self { cache_dir }
    }
}

impl OhMyZshSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit cache directory instead of the user cache dir
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    fn payload_path(&self) -> PathBuf {
        self.cache_dir.join(FRAMEWORK_CACHE_NAME)
    }

    fn fetch(url: &str) -> ForgeResult<Vec<u8>> {
        let mut response = ureq::get(url)
            .call()
            .map_err(|e| ForgeError::download(url, e))?;
        response
            .body_mut()
            .read_to_vec()
            .map_err(|e| ForgeError::download(url, e))
    }

    fn place(payload: &Path, bytes: &[u8]) -> ForgeResult<()> {
        let partial = payload.with_extension(format!("partial.{}", std::process::id()));
        std::fs::write(&partial, bytes)
            .map_err(|e| ForgeError::io(format!("writing {}", partial.display()), e))?;
        match std::fs::rename(&partial, payload) {
            Ok(()) => Ok(()),
            // Another invocation finished first; its payload is as good as ours.
            Err(_) if payload.exists() => {
                let _ = std::fs::remove_file(&partial);
                Ok(())
            }
            Err(e) => Err(ForgeError::io(format!("caching {}", payload.display()), e)),
        }
    }
}

#[async_trait]
impl FrameworkSource for OhMyZshSource {
    async fn download_or_cache(&self) -> ForgeResult<bool> {
        let payload = self.payload_path();
        if payload.exists() {
            debug!(path = %payload.display(), "framework payload cached");
            return Ok(true);
        }

        std::fs::create_dir_all(&self.cache_dir)
            .map_err(|e| ForgeError::io(format!("creating {}", self.cache_dir.display()), e))?;

        debug!(url = ARCHIVE_URL, "fetching framework payload");
        let bytes = tokio::task::spawn_blocking(|| Self::fetch(ARCHIVE_URL))
            .await
            .map_err(|e| {
                ForgeError::CacheUnavailable(format!("download task aborted: {e}"))
            })??;

        Self::place(&payload, &bytes)?;
        Ok(false)
    }

    fn cache_name(&self) -> &str {
        FRAMEWORK_CACHE_NAME
    }

    fn install_script(&self) -> String {
        format!(
            "#!/bin/sh\n\
             set -e\n\
             mkdir -p {HOME}/.oh-my-zsh\n\
             tar -xzf {HOME}/{FRAMEWORK_CACHE_NAME} -C {HOME}/.oh-my-zsh --strip-components=1\n\
             rm {HOME}/{FRAMEWORK_CACHE_NAME}\n"
        )
    }

    fn run_control_content(&self) -> String {
        format!(
            "export ZSH=\"{HOME}/.oh-my-zsh\"\n\
             ZSH_THEME=\"robbyrussell\"\n\
             plugins=(git)\n\
             source $ZSH/oh-my-zsh.sh\n"
        )
    }
}
