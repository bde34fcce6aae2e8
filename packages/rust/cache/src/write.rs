//! Scoped temp-file writes that either publish completely or leave no trace.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use newsdesk_shared::{NewsdeskError, Result};

/// A temp file that becomes `target` on [`commit`](Self::commit) and is
/// deleted if dropped uncommitted.
#[derive(Debug)]
pub(crate) struct PendingWrite {
    temp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl PendingWrite {
    /// Create a fresh temp file next to `target`.
    pub(crate) fn begin(dir: &Path, target: &Path) -> Result<(Self, File)> {
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| NewsdeskError::Cache(format!("bad cache path {}", target.display())))?;
        let temp = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::now_v7()));

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp)
            .map_err(|e| NewsdeskError::io(&temp, e))?;

        Ok((
            Self {
                temp,
                target: target.to_path_buf(),
                committed: false,
            },
            file,
        ))
    }

    pub(crate) fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// Publish the temp file under the target name.
    pub(crate) fn commit(mut self) -> Result<()> {
        std::fs::rename(&self.temp, &self.target)
            .map_err(|e| NewsdeskError::io(&self.target, e))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.temp);
        }
    }
}
