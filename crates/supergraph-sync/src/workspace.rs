//! Per-run scratch directory.
//!
//! A [`Workspace`] is acquired at the top of a run and released when it is
//! dropped, on success, on error and while unwinding. Release happens exactly
//! once.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::diagnostic::SyncError;

/// Observer called with the workspace root right before it is deleted.
pub type ReleaseHook = Arc<dyn Fn(&Path) + Send + Sync>;

const PREFIX: &str = "supergraph-sync-";

/// Exclusively owned temporary directory for one pipeline run.
pub struct Workspace {
    root: PathBuf,
    dir: Option<TempDir>,
    release_hook: Option<ReleaseHook>,
}

impl Workspace {
    /// Creates a fresh directory under `parent`, or under the system temp dir.
    pub fn acquire(parent: Option<&Path>) -> Result<Self, SyncError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(PREFIX);

        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SyncError::io(parent, e.to_string()))?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| SyncError::Workspace {
            message: e.to_string(),
        })?;

        debug!(root = %dir.path().display(), "workspace acquired");

        Ok(Self {
            root: dir.path().to_path_buf(),
            dir: Some(dir),
            release_hook: None,
        })
    }

    pub fn with_release_hook(mut self, hook: Option<ReleaseHook>) -> Self {
        self.release_hook = hook;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a file directly inside the workspace.
    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    /// Writes `contents` to `file_name` inside the workspace.
    pub fn write(&self, file_name: &str, contents: &[u8]) -> Result<PathBuf, SyncError> {
        let path = self.path_for(file_name);
        std::fs::write(&path, contents).map_err(|e| SyncError::io(&path, e.to_string()))?;
        Ok(path)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        if let Some(hook) = &self.release_hook {
            hook(dir.path());
        }

        let root = dir.path().to_path_buf();
        match dir.close() {
            Ok(()) => debug!(root = %root.display(), "workspace released"),
            Err(e) => warn!(root = %root.display(), error = %e, "failed to remove workspace"),
        }
    }
}

/// Release hook that copies every file in the workspace into `dest` before
/// the workspace is deleted.
pub fn keep_files_in(dest: PathBuf) -> ReleaseHook {
    Arc::new(move |root: &Path| {
        if let Err(e) = copy_files(root, &dest) {
            warn!(dest = %dest.display(), error = %e, "failed to keep workspace files");
        }
    })
}

fn copy_files(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            std::fs::copy(entry.path(), to.join(entry.file_name()))?;
        }
    }
    Ok(())
}
