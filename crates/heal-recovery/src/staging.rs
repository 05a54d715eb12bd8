use std::io;
use std::path::{Path, PathBuf};

use heal_core::{HealError, SnapshotId};
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-call scratch root for candidate restores.
///
/// Removed with everything under it when dropped, so every exit path of a
/// recovery call (success, exhaustion, or an early `?`) leaves nothing behind.
#[derive(Debug)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn create(parent: &Path) -> Result<Self, HealError> {
        let root = parent.join(format!("recover-{}", Uuid::new_v4().simple()));
        std::fs::create_dir_all(&root).map_err(|e| HealError::staging(&root, e))?;
        debug!(root = %root.display(), "created staging root");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fresh directory for one candidate. Fails if it already exists.
    pub fn candidate_dir(&self, id: &SnapshotId) -> Result<PathBuf, HealError> {
        let dir = self.root.join(id.as_str());
        std::fs::create_dir(&dir).map_err(|e| HealError::staging(&dir, e))?;
        Ok(dir)
    }

    /// Drops one candidate's tree as soon as it has been judged.
    pub fn discard(&self, dir: &Path) {
        if let Err(e) = remove_tree(dir) {
            warn!(path = %dir.display(), "failed to remove candidate staging dir: {e:?}");
        }
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if let Err(e) = remove_tree(&self.root) {
            warn!(root = %self.root.display(), "failed to remove staging root: {e:?}");
        }
    }
}

fn remove_tree(path: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
