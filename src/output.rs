//! Output locations.
//!
//! Stacks write their artifacts under `<log_root>/<stack>/`. Creating that
//! directory is best effort: a failure is reported to the caller, who logs
//! it and carries on. A later write into the missing directory then fails
//! on its own and is reported the same way.

use std::io;
use std::path::{Path, PathBuf};

/// Outcome of [`ensure_output_dir`].
#[derive(Debug)]
pub enum DirStatus {
    /// The directory was already present.
    Existing,
    /// The directory (and any missing parents) was created.
    Created,
    /// The directory could not be created.
    Failed(io::Error),
}

impl DirStatus {
    /// Returns true if the directory is usable.
    pub fn is_ok(&self) -> bool {
        !matches!(self, DirStatus::Failed(_))
    }
}

/// Makes sure `dir` exists, creating parents as needed.
///
/// # Example
///
/// ```
/// use stackweave::output::{ensure_output_dir, DirStatus};
///
/// let root = tempfile::tempdir().unwrap();
/// let dir = root.path().join("logs").join("thz");
///
/// assert!(matches!(ensure_output_dir(&dir), DirStatus::Created));
/// assert!(matches!(ensure_output_dir(&dir), DirStatus::Existing));
/// ```
pub fn ensure_output_dir(dir: &Path) -> DirStatus {
    if dir.is_dir() {
        return DirStatus::Existing;
    }
    match std::fs::create_dir_all(dir) {
        Ok(()) => {
            tracing::debug!(dir = %dir.display(), "created output directory");
            DirStatus::Created
        }
        Err(err) => DirStatus::Failed(err),
    }
}

/// Path of the flow artifact of `stack` inside `dir`.
pub fn artifact_path(dir: &Path, stack: &str) -> PathBuf {
    dir.join(format!("{stack}.xml"))
}
