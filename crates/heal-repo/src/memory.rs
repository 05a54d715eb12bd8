use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use heal_core::{RepoError, Snapshot, SnapshotId, Tag};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use walkdir::WalkDir;

use crate::traits::SnapshotRepository;

/// In-memory repository for tests. Not durable, but restores real trees to
/// disk with the same absolute-path nesting restic uses, and lets tests inject
/// the failures the recovery path has to survive.
pub struct InMemoryRepository {
    inner: Mutex<Inner>,
}

struct Inner {
    initialized: bool,
    clock: OffsetDateTime,
    seq: i64,
    stored: Vec<Stored>,
    faults: Faults,
    restores: Vec<SnapshotId>,
}

#[derive(Default)]
struct Faults {
    listing: Option<String>,
    next_backups: u32,
    restore: HashSet<SnapshotId>,
    credentials: bool,
}

#[derive(Clone)]
struct Stored {
    snapshot: Snapshot,
    source: PathBuf,
    entries: BTreeMap<PathBuf, Entry>,
}

#[derive(Clone)]
enum Entry {
    Dir,
    File { bytes: Vec<u8>, modified: SystemTime },
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::with_clock(OffsetDateTime::now_utc())
    }

    /// Every backup is stamped one second after the previous one, starting at `start`.
    pub fn with_clock(start: OffsetDateTime) -> Self {
        Self {
            inner: Mutex::new(Inner {
                initialized: true,
                clock: start,
                seq: 0,
                stored: Vec::new(),
                faults: Faults::default(),
                restores: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_listing(&self, msg: &str) {
        self.lock().faults.listing = Some(msg.to_string());
    }

    pub fn fail_next_backups(&self, n: u32) {
        self.lock().faults.next_backups = n;
    }

    pub fn fail_restore(&self, id: &SnapshotId) {
        self.lock().faults.restore.insert(id.clone());
    }

    pub fn reject_credentials(&self) {
        self.lock().faults.credentials = true;
    }

    pub fn snapshot_count(&self) -> usize {
        self.lock().stored.len()
    }

    /// Ids passed to `restore`, in call order.
    pub fn restored_ids(&self) -> Vec<SnapshotId> {
        self.lock().restores.clone()
    }

    fn check_credentials(inner: &Inner) -> Result<(), RepoError> {
        if inner.faults.credentials {
            return Err(RepoError::Authentication("wrong password or no key found".into()));
        }
        Ok(())
    }
}

impl SnapshotRepository for InMemoryRepository {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn is_initialized(&self) -> Result<bool, RepoError> {
        Ok(self.lock().initialized)
    }

    fn init(&self) -> Result<(), RepoError> {
        self.lock().initialized = true;
        Ok(())
    }

    fn backup(&self, source: &Path, tags: &[Tag]) -> Result<Snapshot, RepoError> {
        {
            let mut inner = self.lock();
            Self::check_credentials(&inner)?;
            if inner.faults.next_backups > 0 {
                inner.faults.next_backups -= 1;
                return Err(RepoError::Locked("unable to create lock in backend".into()));
            }
        }

        // Read the tree without holding the lock.
        let entries = read_tree(source)?;

        let mut inner = self.lock();
        inner.seq += 1;
        let time = inner.clock + Duration::seconds(inner.seq);

        let mut hasher = Sha256::new();
        hasher.update(inner.seq.to_le_bytes());
        hasher.update(source.to_string_lossy().as_bytes());
        for (rel, entry) in &entries {
            hasher.update(rel.to_string_lossy().as_bytes());
            if let Entry::File { bytes, .. } = entry {
                hasher.update(bytes);
            }
        }
        let snapshot = Snapshot {
            id: SnapshotId::from_str(hex::encode(hasher.finalize())),
            time,
            tags: tags.to_vec(),
            paths: vec![source.to_path_buf()],
        };
        inner.stored.push(Stored { snapshot: snapshot.clone(), source: source.to_path_buf(), entries });
        Ok(snapshot)
    }

    fn snapshots(&self, tag: Option<&Tag>) -> Result<Vec<Snapshot>, RepoError> {
        let inner = self.lock();
        Self::check_credentials(&inner)?;
        if let Some(msg) = &inner.faults.listing {
            return Err(RepoError::Unavailable(msg.clone()));
        }
        // Oldest first: the opposite of the order callers need.
        Ok(inner
            .stored
            .iter()
            .filter(|s| tag.map_or(true, |t| s.snapshot.has_tag(t)))
            .map(|s| s.snapshot.clone())
            .collect())
    }

    fn restore(&self, id: &SnapshotId, target: &Path) -> Result<(), RepoError> {
        let stored = {
            let mut inner = self.lock();
            Self::check_credentials(&inner)?;
            inner.restores.push(id.clone());
            if inner.faults.restore.contains(id) {
                return Err(RepoError::Command(format!("restore {}: pack checksum mismatch", id.short())));
            }
            inner
                .stored
                .iter()
                .find(|s| &s.snapshot.id == id)
                .cloned()
                .ok_or_else(|| RepoError::Command(format!("no matching ID found for prefix \"{id}\"")))?
        };

        let base = target.join(strip_root(&stored.source));
        std::fs::create_dir_all(&base).map_err(|e| io_err(&base, e))?;
        for (rel, entry) in &stored.entries {
            let dest = base.join(rel);
            match entry {
                Entry::Dir => std::fs::create_dir_all(&dest).map_err(|e| io_err(&dest, e))?,
                Entry::File { bytes, modified } => {
                    if let Some(parent) = dest.parent() {
                        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
                    }
                    std::fs::write(&dest, bytes).map_err(|e| io_err(&dest, e))?;
                    let f = File::options().write(true).open(&dest).map_err(|e| io_err(&dest, e))?;
                    f.set_modified(*modified).map_err(|e| io_err(&dest, e))?;
                }
            }
        }
        Ok(())
    }
}

fn read_tree(source: &Path) -> Result<BTreeMap<PathBuf, Entry>, RepoError> {
    if !source.is_dir() {
        return Err(RepoError::Command(format!("{} does not exist", source.display())));
    }
    let mut entries = BTreeMap::new();
    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| RepoError::Command(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| RepoError::Command(e.to_string()))?
            .to_path_buf();
        if entry.file_type().is_dir() {
            entries.insert(rel, Entry::Dir);
        } else if entry.file_type().is_file() {
            let bytes = std::fs::read(entry.path()).map_err(|e| io_err(entry.path(), e))?;
            let modified = entry
                .metadata()
                .map_err(|e| RepoError::Command(e.to_string()))?
                .modified()
                .map_err(|e| io_err(entry.path(), e))?;
            entries.insert(rel, Entry::File { bytes, modified });
        }
    }
    Ok(entries)
}

/// `/srv/data` restores to `<target>/srv/data`, as restic does.
fn strip_root(p: &Path) -> PathBuf {
    p.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

fn io_err(path: &Path, e: std::io::Error) -> RepoError {
    RepoError::Command(format!("{}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_new_repository_is_empty() {
        let repo = InMemoryRepository::new();
        assert!(repo.is_initialized().unwrap());
        assert!(repo.snapshots(None).unwrap().is_empty());
    }

    #[test]
    fn test_restore_nests_under_source_path() {
        let src = tempdir().unwrap();
        let data = src.path().join("victim_data");
        std::fs::create_dir_all(data.join("docs")).unwrap();
        std::fs::create_dir_all(data.join("logs")).unwrap();
        std::fs::write(data.join("docs/report.txt"), "revenue").unwrap();

        let repo = InMemoryRepository::new();
        let snap = repo.backup(&data, &[Tag::Baseline]).unwrap();

        let target = tempdir().unwrap();
        repo.restore(&snap.id, target.path()).unwrap();
        let restored = target.path().join(strip_root(&data));
        assert_eq!(std::fs::read_to_string(restored.join("docs/report.txt")).unwrap(), "revenue");
        assert!(restored.join("logs").is_dir());
    }

    #[test]
    fn test_restore_preserves_modification_time() {
        let src = tempdir().unwrap();
        let file = src.path().join("a.txt");
        std::fs::write(&file, "a").unwrap();
        let past = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_600_000_000);
        File::options().write(true).open(&file).unwrap().set_modified(past).unwrap();

        let repo = InMemoryRepository::new();
        let snap = repo.backup(src.path(), &[]).unwrap();
        let target = tempdir().unwrap();
        repo.restore(&snap.id, target.path()).unwrap();
        let restored = target.path().join(strip_root(src.path())).join("a.txt");
        assert_eq!(std::fs::metadata(restored).unwrap().modified().unwrap(), past);
    }

    #[test]
    fn test_injected_restore_failure() {
        let src = tempdir().unwrap();
        let repo = InMemoryRepository::new();
        let snap = repo.backup(src.path(), &[Tag::Baseline]).unwrap();
        repo.fail_restore(&snap.id);
        let target = tempdir().unwrap();
        assert!(repo.restore(&snap.id, target.path()).is_err());
        assert_eq!(repo.restored_ids(), vec![snap.id]);
    }

    #[test]
    fn test_times_strictly_increase() {
        let src = tempdir().unwrap();
        let repo = InMemoryRepository::new();
        let a = repo.backup(src.path(), &[]).unwrap();
        let b = repo.backup(src.path(), &[]).unwrap();
        assert!(b.time > a.time);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_missing_source_fails_backup() {
        let repo = InMemoryRepository::new();
        let err = repo.backup(Path::new("/definitely/not/here"), &[Tag::Auto]).unwrap_err();
        assert!(matches!(err, RepoError::Command(_)));
        assert_eq!(repo.snapshot_count(), 0);
    }
}
