//! Firmware image loading.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
#[error("Failed to load firmware from {}: {source}", path.display())]
pub struct FileLoadError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Raw firmware bytes to deliver. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Read an image from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, FileLoadError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| FileLoadError {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), size = data.len(), "Loaded firmware image");
        Ok(Self { data })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
