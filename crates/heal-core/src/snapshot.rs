use std::cmp::Ordering;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{SnapshotId, Tag};

/// Immutable point-in-time record held by the backup repository.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

impl Snapshot {
    pub fn has_tag(&self, tag: &Tag) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Trust order: newer first, ties broken by the larger id.
    pub fn newest_first(a: &Snapshot, b: &Snapshot) -> Ordering {
        b.time.cmp(&a.time).then_with(|| b.id.cmp(&a.id))
    }
}

/// Sorts in place, newest first. Callers never rely on the backing store's order.
pub fn sort_newest_first(snapshots: &mut [Snapshot]) {
    snapshots.sort_by(Snapshot::newest_first);
}
