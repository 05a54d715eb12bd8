use std::path::Path;

use heal_core::{RepoError, Snapshot, SnapshotId, Tag};

/// Boundary to the external versioned-object store.
///
/// Implementations are expected to serialize their own writes; callers never
/// coordinate concurrent `backup` calls.
pub trait SnapshotRepository: Send + Sync {
    /// Short adapter name used in logs ("restic", "memory").
    fn kind(&self) -> &'static str;

    fn is_initialized(&self) -> Result<bool, RepoError>;

    fn init(&self) -> Result<(), RepoError>;

    /// Snapshot `source` with every tag in `tags`. On failure nothing is visible.
    fn backup(&self, source: &Path, tags: &[Tag]) -> Result<Snapshot, RepoError>;

    /// Existing snapshots, optionally restricted to those carrying `tag`.
    /// No ordering is guaranteed.
    fn snapshots(&self, tag: Option<&Tag>) -> Result<Vec<Snapshot>, RepoError>;

    /// Materialize a snapshot somewhere under `target`. The nesting below
    /// `target` is adapter-specific and must be searched for.
    fn restore(&self, id: &SnapshotId, target: &Path) -> Result<(), RepoError>;
}
