//! Proc filesystem access
//!
//! All collectors read through [`ProcPaths`] so tests can point them at a
//! synthetic tree instead of the live `/proc`.

use std::path::{Path, PathBuf};

use crate::CollectError;

/// Root of the proc filesystem the collectors read from.
#[derive(Debug, Clone)]
pub struct ProcPaths {
    proc_root: PathBuf,
}

impl Default for ProcPaths {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
        }
    }
}

impl ProcPaths {
    /// Use a proc tree rooted somewhere other than `/proc`.
    pub fn with_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    /// Absolute path of a file under the proc root.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.proc_root.join(relative)
    }

    /// Read a proc file to a string.
    pub fn read(&self, relative: &str) -> Result<String, CollectError> {
        let path = self.path(relative);
        std::fs::read_to_string(&path).map_err(|source| CollectError::Read { path, source })
    }
}

/// Parse error helper carrying the offending file.
pub(crate) fn parse_error(path: &Path, reason: impl Into<String>) -> CollectError {
    CollectError::Parse {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}
