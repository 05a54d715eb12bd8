use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use heal_core::{HealError, Tag};
use heal_repo::CaptureService;
use notify::event::{AccessKind, AccessMode, ModifyKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::lifecycle::Lifecycle;

/// Decides which filesystem events should trigger an `auto` capture.
#[derive(Clone, Debug)]
pub struct EventFilter {
    root: PathBuf,
    ignore: Vec<PathBuf>,
}

impl EventFilter {
    /// Only events under `root` count; those under any of `ignore` are dropped.
    pub fn new(root: PathBuf, ignore: Vec<PathBuf>) -> Self {
        Self { root, ignore }
    }

    pub fn is_write(kind: &EventKind) -> bool {
        matches!(
            kind,
            EventKind::Access(AccessKind::Close(AccessMode::Write)) | EventKind::Modify(ModifyKind::Data(_))
        )
    }

    /// Paths of `event` that are regular files inside the root and outside
    /// the ignored trees.
    pub fn qualifying(&self, event: &Event) -> Vec<PathBuf> {
        if !Self::is_write(&event.kind) {
            return Vec::new();
        }
        event
            .paths
            .iter()
            .filter(|p| p.starts_with(&self.root) && !self.is_ignored(p) && p.is_file())
            .cloned()
            .collect()
    }

    /// True when the root directory itself was created, renamed or removed,
    /// which invalidates a watch held on it.
    pub fn replaces_root(&self, event: &Event) -> bool {
        matches!(event.kind, EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)))
            && event.paths.iter().any(|p| p == &self.root)
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.ignore.iter().any(|prefix| path.starts_with(prefix))
    }
}

#[derive(Debug)]
enum Trigger {
    Changed(PathBuf),
    RootReplaced,
}

/// Subscribes to `source` and captures it with tag `auto` after writes.
///
/// The notify callback only enqueues; one consumer task drains the bounded
/// queue and runs captures one at a time. Triggers already queued when a
/// capture starts are folded into that capture.
///
/// `source`'s parent is watched as well. When `source` is swapped for a new
/// directory (as `finalize` does) the recursive watch is renewed on it.
pub fn spawn_watcher(
    capture: CaptureService,
    source: PathBuf,
    filter: EventFilter,
    capacity: usize,
    lifecycle: &mut Lifecycle,
) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<Trigger>(capacity);

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                // blocks the notify thread while the queue is full
                if filter.replaces_root(&event) && tx.blocking_send(Trigger::RootReplaced).is_err() {
                    return;
                }
                for path in filter.qualifying(&event) {
                    if tx.blocking_send(Trigger::Changed(path)).is_err() {
                        return;
                    }
                }
            }
            Err(e) => warn!("watch error: {e:?}"),
        },
        notify::Config::default(),
    )
    .context("create filesystem watcher")?;
    match source.parent() {
        Some(parent) => watcher
            .watch(parent, RecursiveMode::NonRecursive)
            .with_context(|| format!("watch {}", parent.display()))?,
        None => warn!(root = %source.display(), "data root has no parent; replacement will not be detected"),
    }
    watcher
        .watch(&source, RecursiveMode::Recursive)
        .with_context(|| format!("watch {}", source.display()))?;
    info!(root = %source.display(), capacity, "watching for changes");

    let mut stop = lifecycle.signal();
    lifecycle.spawn("change-capture", async move {
        loop {
            let first = tokio::select! {
                _ = stop.stopped() => break,
                next = rx.recv() => match next {
                    Some(trigger) => trigger,
                    None => break,
                },
            };
            let mut changed = None;
            let mut folded = 0usize;
            let mut root_replaced = false;
            for trigger in std::iter::once(first).chain(std::iter::from_fn(|| rx.try_recv().ok())) {
                match trigger {
                    Trigger::RootReplaced => root_replaced = true,
                    Trigger::Changed(path) => {
                        folded += 1;
                        changed.get_or_insert(path);
                    }
                }
            }
            if root_replaced {
                renew_watch(&mut watcher, &source);
            }
            let Some(trigger) = changed else {
                continue;
            };
            debug!(path = %trigger.display(), folded = folded - 1, "change detected");

            let svc = capture.clone();
            let src = source.clone();
            match tokio::task::spawn_blocking(move || svc.capture(&src, Tag::Auto)).await {
                Ok(Ok(_)) => {}
                Ok(Err(HealError::AuthenticationFailed(msg))) => {
                    error!("change capture stopping: {msg}");
                    break;
                }
                Ok(Err(e)) => warn!("auto capture failed: {e:?}"),
                Err(e) => warn!("auto capture panicked: {e:?}"),
            }
        }
        drop(rx);
        drop(watcher);
        info!("change capture stopped");
    });
    Ok(())
}

/// Drops the stale subscription and watches whatever now sits at `root`.
/// A root that is briefly absent mid-swap is picked up by the next event.
fn renew_watch(watcher: &mut RecommendedWatcher, root: &Path) {
    let _ = watcher.unwatch(root);
    match watcher.watch(root, RecursiveMode::Recursive) {
        Ok(()) => info!(root = %root.display(), "data root replaced; watch renewed"),
        Err(e) => debug!(root = %root.display(), "data root not present yet: {e:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind, RenameMode};
    use tempfile::tempdir;

    #[test]
    fn only_write_events_on_files_qualify() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("report.txt");
        std::fs::write(&file, "x").unwrap();
        let filter = EventFilter::new(dir.path().to_path_buf(), Vec::new());

        let close = Event::new(EventKind::Access(AccessKind::Close(AccessMode::Write))).add_path(file.clone());
        assert_eq!(filter.qualifying(&close), vec![file.clone()]);

        let data = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content))).add_path(file.clone());
        assert_eq!(filter.qualifying(&data), vec![file.clone()]);

        let create = Event::new(EventKind::Create(CreateKind::File)).add_path(file.clone());
        assert!(filter.qualifying(&create).is_empty());

        let on_dir = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Any))).add_path(dir.path().to_path_buf());
        assert!(filter.qualifying(&on_dir).is_empty());
    }

    #[test]
    fn ignored_prefixes_are_dropped() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        let inside = staging.join("f.txt");
        std::fs::write(&inside, "x").unwrap();
        let filter = EventFilter::new(dir.path().to_path_buf(), vec![staging]);
        let ev = Event::new(EventKind::Access(AccessKind::Close(AccessMode::Write))).add_path(inside);
        assert!(filter.qualifying(&ev).is_empty());
    }

    #[test]
    fn writes_beside_the_root_are_dropped() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("victim_data");
        std::fs::create_dir_all(&root).unwrap();
        let config = dir.path().join("heal.toml");
        std::fs::write(&config, "x").unwrap();
        let filter = EventFilter::new(root, Vec::new());
        let ev = Event::new(EventKind::Access(AccessKind::Close(AccessMode::Write))).add_path(config);
        assert!(filter.qualifying(&ev).is_empty());
    }

    #[test]
    fn renaming_the_root_itself_is_a_replacement() {
        let root = PathBuf::from("/srv/victim_data");
        let filter = EventFilter::new(root.clone(), Vec::new());

        let moved_in = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To))).add_path(root.clone());
        assert!(filter.replaces_root(&moved_in));
        let removed = Event::new(EventKind::Remove(RemoveKind::Folder)).add_path(root.clone());
        assert!(filter.replaces_root(&removed));

        let child = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To))).add_path(root.join("docs"));
        assert!(!filter.replaces_root(&child));
        let written = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Any))).add_path(root);
        assert!(!filter.replaces_root(&written));
    }
}
