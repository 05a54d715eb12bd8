use std::path::Path;
use std::sync::Arc;

use heal_core::{HealError, Snapshot, Tag};
use tracing::info;

use crate::SnapshotRepository;

/// "Snapshot this directory with this tag."
#[derive(Clone)]
pub struct CaptureService {
    repo: Arc<dyn SnapshotRepository>,
}

impl CaptureService {
    pub fn new(repo: Arc<dyn SnapshotRepository>) -> Self {
        Self { repo }
    }

    pub fn capture(&self, source: &Path, tag: Tag) -> Result<Snapshot, HealError> {
        match self.repo.backup(source, std::slice::from_ref(&tag)) {
            Ok(snapshot) => {
                info!(
                    snapshot = snapshot.id.short(),
                    tag = %tag,
                    source = %source.display(),
                    "captured snapshot"
                );
                Ok(snapshot)
            }
            Err(e) => Err(HealError::from_capture(tag, e)),
        }
    }
}
