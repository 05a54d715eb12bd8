use std::sync::Arc;

use heal_core::{sort_newest_first, HealError, Snapshot, Tag};
use tracing::debug;

use crate::SnapshotRepository;

/// Read-only view over the repository's snapshot records.
#[derive(Clone)]
pub struct SnapshotCatalog {
    repo: Arc<dyn SnapshotRepository>,
}

impl SnapshotCatalog {
    pub fn new(repo: Arc<dyn SnapshotRepository>) -> Self {
        Self { repo }
    }

    /// Snapshots newest first, optionally restricted to `tag`.
    pub fn list(&self, tag: Option<&Tag>) -> Result<Vec<Snapshot>, HealError> {
        let mut snapshots = self.repo.snapshots(tag).map_err(HealError::from_query)?;
        if let Some(tag) = tag {
            snapshots.retain(|s| s.has_tag(tag));
        }
        sort_newest_first(&mut snapshots);
        debug!(
            repo = self.repo.kind(),
            tag = tag.map(Tag::as_str).unwrap_or("*"),
            count = snapshots.len(),
            "listed snapshots"
        );
        Ok(snapshots)
    }

    pub fn baselines(&self) -> Result<Vec<Snapshot>, HealError> {
        self.list(Some(&Tag::Baseline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryRepository;
    use tempfile::tempdir;

    #[test]
    fn lists_newest_first_even_when_store_reports_oldest_first() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "x").unwrap();
        let repo = Arc::new(InMemoryRepository::new());
        let a = repo.backup(dir.path(), &[Tag::Baseline]).unwrap();
        let b = repo.backup(dir.path(), &[Tag::Auto]).unwrap();
        let c = repo.backup(dir.path(), &[Tag::Baseline]).unwrap();

        let catalog = SnapshotCatalog::new(repo.clone());
        let all = catalog.list(None).unwrap();
        assert_eq!(all.iter().map(|s| &s.id).collect::<Vec<_>>(), vec![&c.id, &b.id, &a.id]);

        let baselines = catalog.baselines().unwrap();
        assert_eq!(baselines.iter().map(|s| &s.id).collect::<Vec<_>>(), vec![&c.id, &a.id]);
    }

    #[test]
    fn listing_failure_is_repository_unavailable() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.fail_listing("lock held");
        let err = SnapshotCatalog::new(repo).list(None).unwrap_err();
        assert!(matches!(err, HealError::RepositoryUnavailable(_)));
    }

    #[test]
    fn bad_secret_is_authentication_failure() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.reject_credentials();
        let err = SnapshotCatalog::new(repo).baselines().unwrap_err();
        assert!(matches!(err, HealError::AuthenticationFailed(_)));
    }
}
