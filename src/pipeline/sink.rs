//! Where fetched parts end up

use crate::error::SessionError;
use crate::reconcile::NamingConvention;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Stores fetched parts
///
/// Each part carries its index, so writes may arrive in any order and writing the same
/// part twice replaces the earlier copy.
#[async_trait]
pub trait PartSink: Send + Sync {
    /// Store part `index` fetched from `url`, returning where it was written
    async fn write_part(&self, index: usize, url: &str, bytes: Vec<u8>) -> Result<PathBuf, SessionError>;
}

/// How part files are named inside the item directory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartLayout {
    /// `page NNNN.<ext>`
    Pages,
    /// File name taken from the part location
    TransferFiles,
}

/// Writes parts into an item directory
///
/// Every file written is recorded, so cleanup can remove exactly what this sink produced.
#[derive(Debug)]
pub struct DirectorySink {
    dir: PathBuf,
    naming: NamingConvention,
    layout: PartLayout,
    written: Mutex<Vec<PathBuf>>,
}

impl DirectorySink {
    /// Sink writing into `dir`, which must already exist
    pub fn new(dir: impl Into<PathBuf>, naming: NamingConvention, layout: PartLayout) -> Self {
        Self {
            dir: dir.into(),
            naming,
            layout,
            written: Mutex::new(Vec::new()),
        }
    }

    /// Target directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files written so far, in write order, each listed once
    pub fn written(&self) -> Vec<PathBuf> {
        self.written.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn path_for(&self, index: usize, url: &str) -> PathBuf {
        let name = match self.layout {
            PartLayout::Pages => self.naming.part_file_name(index, url),
            PartLayout::TransferFiles => self.naming.transfer_file_name(index, url),
        };
        self.dir.join(name)
    }
}

#[async_trait]
impl PartSink for DirectorySink {
    async fn write_part(&self, index: usize, url: &str, bytes: Vec<u8>) -> Result<PathBuf, SessionError> {
        let path = self.path_for(index, url);
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            tracing::error!(part = index, path = %path.display(), error = %e, "error writing part");
            SessionError::WriteFailed {
                index,
                path: path.clone(),
                reason: e.to_string(),
            }
        })?;
        let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        if !written.contains(&path) {
            written.push(path.clone());
        }
        Ok(path)
    }
}
