//! CA bundle placement
//!
//! A bundled PEM file is copied once to a writable cache directory and its
//! path reused afterwards. The copy happens only when the destination is
//! missing or empty.

use crate::{Error, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Default bundle file name
pub const DEFAULT_BUNDLE_NAME: &str = "cacert.pem";

#[derive(Debug, Clone)]
enum BundleSource {
    File(PathBuf),
    Bytes(Vec<u8>),
}

/// A CA bundle and where it lives once extracted
#[derive(Debug, Clone)]
pub struct CaBundle {
    source: BundleSource,
    destination: PathBuf,
}

impl CaBundle {
    /// Bundle copied from `source` into `cache_dir/file_name`
    pub fn from_file(source: impl Into<PathBuf>, cache_dir: &Path, file_name: &str) -> Self {
        Self {
            source: BundleSource::File(source.into()),
            destination: cache_dir.join(file_name),
        }
    }

    /// Bundle written from embedded bytes into `cache_dir/file_name`
    pub fn from_bytes(bytes: Vec<u8>, cache_dir: &Path, file_name: &str) -> Self {
        Self {
            source: BundleSource::Bytes(bytes),
            destination: cache_dir.join(file_name),
        }
    }

    /// Bundle copied from `source` into the per-user cache directory
    pub fn in_default_cache(source: impl Into<PathBuf>) -> Result<Self> {
        let dirs = ProjectDirs::from("", "", "pinprobe")
            .ok_or_else(|| Error::Config("No cache directory available".to_string()))?;
        Ok(Self::from_file(source, dirs.cache_dir(), DEFAULT_BUNDLE_NAME))
    }

    /// Where the bundle lives once extracted
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Extract if needed and return the path
    pub fn ensure(&self) -> Result<PathBuf> {
        let present = std::fs::metadata(&self.destination)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false);
        if present {
            return Ok(self.destination.clone());
        }

        if let Some(parent) = self.destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match &self.source {
            BundleSource::File(source) => {
                std::fs::copy(source, &self.destination).map_err(|e| {
                    Error::Config(format!("Failed to copy CA bundle {}: {}", source.display(), e))
                })?;
            }
            BundleSource::Bytes(bytes) => std::fs::write(&self.destination, bytes)?,
        }
        info!(path = %self.destination.display(), "CA bundle extracted");
        Ok(self.destination.clone())
    }
}
