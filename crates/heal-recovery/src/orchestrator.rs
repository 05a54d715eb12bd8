use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use heal_core::{
    AttemptOutcome, CandidateAttempt, CriticalFileSet, HealError, RecoveryOutcome, RejectReason, Snapshot,
    VerifiedFile,
};
use heal_repo::{SnapshotCatalog, SnapshotRepository};
use tracing::{info, warn};

use crate::replace::{move_tree, replace_dir};
use crate::staging::StagingArea;
use crate::tree::{find_data_root, DEFAULT_MAX_DEPTH};
use crate::verify::verify_critical_files;

/// Snapshot ids are hex, so this never collides with a candidate dir.
const PROMOTION_DIR: &str = "promoted";

#[derive(Clone, Debug)]
pub struct RecoverySettings {
    /// Directory name of the protected data root, e.g. `victim_data`.
    pub data_root_name: String,
    /// Paths relative to the data root that must verify.
    pub critical_files: CriticalFileSet,
    /// Parent of the per-call staging roots.
    pub staging_dir: PathBuf,
    /// Replaced on promotion so that it holds only `<data_root_name>`.
    pub restore_target: PathBuf,
    pub max_depth: usize,
}

impl RecoverySettings {
    pub fn new(data_root_name: impl Into<String>, staging_dir: PathBuf, restore_target: PathBuf) -> Self {
        Self {
            data_root_name: data_root_name.into(),
            critical_files: CriticalFileSet::default(),
            staging_dir,
            restore_target,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_critical_files(mut self, files: CriticalFileSet) -> Self {
        self.critical_files = files;
        self
    }

    pub fn promoted_root(&self) -> PathBuf {
        self.restore_target.join(&self.data_root_name)
    }
}

/// Picks the newest baseline that restores and verifies, and promotes it.
pub struct RecoveryOrchestrator {
    repo: Arc<dyn SnapshotRepository>,
    catalog: SnapshotCatalog,
    settings: RecoverySettings,
}

impl RecoveryOrchestrator {
    pub fn new(repo: Arc<dyn SnapshotRepository>, settings: RecoverySettings) -> Self {
        let catalog = SnapshotCatalog::new(repo.clone());
        Self { repo, catalog, settings }
    }

    pub fn recover(&self) -> Result<RecoveryOutcome, HealError> {
        let candidates = self.catalog.baselines()?;
        if candidates.is_empty() {
            return Err(HealError::NoCandidates);
        }
        info!(candidates = candidates.len(), "starting recovery");

        let staging = StagingArea::create(&self.settings.staging_dir)?;
        let mut attempts = Vec::with_capacity(candidates.len());

        for snapshot in &candidates {
            let dir = staging.candidate_dir(&snapshot.id)?;
            match self.examine(snapshot, &dir) {
                Ok((data_root, verified)) => {
                    let promoted_root = self.promote(&staging, &data_root).map_err(|source| {
                        HealError::PromotionFailed { path: self.settings.restore_target.clone(), source }
                    })?;
                    staging.discard(&dir);
                    attempts.push(CandidateAttempt::new(snapshot, dir, AttemptOutcome::Promoted));
                    info!(
                        snapshot = snapshot.id.short(),
                        target = %promoted_root.display(),
                        rejected = attempts.len() - 1,
                        "promoted baseline"
                    );
                    return Ok(RecoveryOutcome { promoted: snapshot.id.clone(), promoted_root, attempts, verified });
                }
                Err(reason) => {
                    warn!(snapshot = snapshot.id.short(), %reason, "rejected candidate");
                    staging.discard(&dir);
                    attempts.push(CandidateAttempt::new(snapshot, dir, AttemptOutcome::Rejected(reason)));
                }
            }
        }

        Err(HealError::NoTrustworthyCandidate { attempts })
    }

    /// Wraps the verified root in a fresh directory inside staging and swaps
    /// that in as the restore target, so nothing from earlier runs survives.
    fn promote(&self, staging: &StagingArea, data_root: &Path) -> io::Result<PathBuf> {
        let container = staging.root().join(PROMOTION_DIR);
        std::fs::create_dir(&container)?;
        move_tree(data_root, &container.join(&self.settings.data_root_name))?;
        replace_dir(&container, &self.settings.restore_target)?;
        Ok(self.settings.promoted_root())
    }

    /// Restore, locate, verify. Any rejection is returned rather than raised.
    fn examine(&self, snapshot: &Snapshot, dir: &Path) -> Result<(PathBuf, Vec<VerifiedFile>), RejectReason> {
        self.repo.restore(&snapshot.id, dir).map_err(|e| RejectReason::RestoreFailed(e.to_string()))?;
        let root = find_data_root(dir, &self.settings.data_root_name, self.settings.max_depth)
            .ok_or(RejectReason::DataRootNotFound)?;
        let verified =
            verify_critical_files(&root, &self.settings.critical_files).map_err(RejectReason::Verification)?;
        Ok((root, verified))
    }
}
