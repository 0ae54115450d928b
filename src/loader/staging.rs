use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::{RagError, Result};

/// Scoped copy of uploaded files handed to the loader.
///
/// Files are copied into a fresh directory under the upload root, each in
/// its own numbered slot so uploads sharing a file name stay distinct. The
/// directory and everything in it is removed when the guard is dropped,
/// whether ingestion succeeded or not.
#[derive(Debug)]
pub struct UploadStaging {
    dir: TempDir,
    files: Vec<PathBuf>,
}

impl UploadStaging {
    #[inline]
    pub fn new(upload_root: &Path) -> Result<Self> {
        fs::create_dir_all(upload_root)?;

        let dir = tempfile::Builder::new()
            .prefix("upload-")
            .tempdir_in(upload_root)?;
        debug!("Created upload staging area at {}", dir.path().display());

        Ok(Self {
            dir,
            files: Vec::new(),
        })
    }

    /// Copy one file into the staging area and return the staged path
    #[inline]
    pub fn stage(&mut self, source: &Path) -> Result<PathBuf> {
        let file_name = source
            .file_name()
            .ok_or_else(|| RagError::Load {
                path: source.to_path_buf(),
                message: "path has no file name".to_string(),
            })?
            .to_string_lossy()
            .into_owned();

        // One slot per upload keeps the original name and never collides
        let slot = self.dir.path().join(self.files.len().to_string());
        fs::create_dir_all(&slot)?;
        let target = slot.join(&file_name);

        fs::copy(source, &target).map_err(|e| RagError::Load {
            path: source.to_path_buf(),
            message: format!("failed to stage upload: {}", e),
        })?;

        self.files.push(target.clone());
        Ok(target)
    }

    /// Directory holding the staged files
    #[inline]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Staged file paths in the order they were added
    #[inline]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Remove the staging area now and report any cleanup failure
    #[inline]
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|e| {
            warn!(
                "Failed to clean up staging area {}: {}",
                path.display(),
                e
            );
            RagError::Io(e)
        })
    }
}
