use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use heal_core::{FileReport, FinalizeReport, HealError};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::replace::{remove_entry, replace_dir};
use crate::tree::{find_data_root, DEFAULT_MAX_DEPTH};

pub const ANY_EXTENSION: &str = "*";

#[derive(Clone, Debug)]
pub struct FinalizeSettings {
    pub data_root_name: String,
    /// File-name suffixes treated as attacker artifacts.
    pub malicious_suffixes: Vec<String>,
    /// Log directory, relative to the live data path.
    pub logs_subdir: PathBuf,
    /// Extension of prunable logs. [`ANY_EXTENSION`] covers every regular file.
    pub log_extension: String,
    pub max_depth: usize,
}

impl FinalizeSettings {
    pub fn new(data_root_name: impl Into<String>) -> Self {
        Self {
            data_root_name: data_root_name.into(),
            malicious_suffixes: vec![".enc".to_string()],
            logs_subdir: PathBuf::from("logs"),
            log_extension: ANY_EXTENSION.to_string(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Cleans a promoted restore and puts it live.
pub struct Finalizer {
    settings: FinalizeSettings,
}

impl Finalizer {
    pub fn new(settings: FinalizeSettings) -> Self {
        Self { settings }
    }

    /// Locates the data root under `staged_root`, then finalizes from it.
    pub fn finalize(&self, staged_root: &Path, live: &Path) -> Result<FinalizeReport, HealError> {
        let data_root = find_data_root(staged_root, &self.settings.data_root_name, self.settings.max_depth)
            .ok_or_else(|| HealError::DataRootNotFound {
                name: self.settings.data_root_name.clone(),
                under: staged_root.to_path_buf(),
            })?;
        self.finalize_root(data_root, staged_root, live)
    }

    /// Purge, replace, prune logs, clear staging. Only replacing the live
    /// directory can fail the call; everything else is reported entry by entry.
    pub fn finalize_root(
        &self,
        data_root: PathBuf,
        staged_root: &Path,
        live: &Path,
    ) -> Result<FinalizeReport, HealError> {
        if !data_root.is_dir() {
            return Err(HealError::DataRootNotFound {
                name: self.settings.data_root_name.clone(),
                under: staged_root.to_path_buf(),
            });
        }

        let purged = self.purge(&data_root);

        replace_dir(&data_root, live).map_err(|source| HealError::FinalizeFailed { path: live.to_path_buf(), source })?;
        info!(live = %live.display(), purged = purged.len(), "live data replaced");

        let (kept_log, pruned_logs) = self.prune_logs(&live.join(&self.settings.logs_subdir));
        let cleared = clear_dir(staged_root);

        let report = FinalizeReport { data_root, purged, kept_log, pruned_logs, cleared };
        for failure in report.failures() {
            warn!(path = %failure.path.display(), outcome = ?failure.outcome, "finalize step incomplete");
        }
        Ok(report)
    }

    fn is_malicious(&self, name: &OsStr) -> bool {
        let name = name.to_string_lossy();
        self.settings.malicious_suffixes.iter().any(|s| !s.is_empty() && name.ends_with(s.as_str()))
    }

    fn purge(&self, root: &Path) -> Vec<FileReport> {
        let mut reports = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                    reports.push(FileReport::failed(path, e));
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.is_malicious(entry.file_name()) {
                continue;
            }
            reports.push(match std::fs::remove_file(entry.path()) {
                Ok(()) => FileReport::deleted(entry.path()),
                Err(e) => FileReport::failed(entry.path(), e),
            });
        }
        reports
    }

    /// Keeps the most recently modified log. Equal times fall back to the
    /// larger file name.
    fn prune_logs(&self, logs: &Path) -> (Option<PathBuf>, Vec<FileReport>) {
        let read = match std::fs::read_dir(logs) {
            Ok(r) => r,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return (None, Vec::new()),
            Err(e) => return (None, vec![FileReport::failed(logs, e)]),
        };
        let ext = self.settings.log_extension.as_str();
        let mut candidates: Vec<(SystemTime, PathBuf)> = read
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter(|e| ext == ANY_EXTENSION || e.path().extension() == Some(OsStr::new(ext)))
            .map(|e| {
                let modified = e.metadata().and_then(|m| m.modified()).unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, e.path())
            })
            .collect();
        candidates.sort();
        let Some((_, keep)) = candidates.pop() else {
            return (None, Vec::new());
        };
        let pruned = candidates
            .into_iter()
            .map(|(_, path)| match std::fs::remove_file(&path) {
                Ok(()) => FileReport::deleted(path),
                Err(e) => FileReport::failed(path, e),
            })
            .collect();
        (Some(keep), pruned)
    }
}

fn clear_dir(dir: &Path) -> Vec<FileReport> {
    let read = match std::fs::read_dir(dir) {
        Ok(r) => r,
        Err(e) => return vec![FileReport::failed(dir, e)],
    };
    let mut paths: Vec<PathBuf> = read.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    paths.sort();
    paths
        .into_iter()
        .map(|p| match remove_entry(&p) {
            Ok(()) => FileReport::deleted(p),
            Err(e) => FileReport::failed(p, e),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_data_root_is_an_error_and_live_is_untouched() {
        let dir = tempdir().unwrap();
        let staged = dir.path().join("restore");
        std::fs::create_dir_all(staged.join("other")).unwrap();
        let live = dir.path().join("victim_data");
        std::fs::create_dir_all(&live).unwrap();
        std::fs::write(live.join("x.enc"), "x").unwrap();

        let err = Finalizer::new(FinalizeSettings::new("victim_data")).finalize(&staged, &live).unwrap_err();
        assert!(matches!(err, HealError::DataRootNotFound { .. }));
        assert!(live.join("x.enc").exists());
    }

    #[test]
    fn suffix_match_is_on_the_file_name() {
        let f = Finalizer::new(FinalizeSettings::new("d"));
        assert!(f.is_malicious(OsStr::new("report.txt.enc")));
        assert!(!f.is_malicious(OsStr::new("report.txt")));
        assert!(!f.is_malicious(OsStr::new("encrypted.txt")));
    }

    #[test]
    fn missing_logs_dir_is_not_reported() {
        let dir = tempdir().unwrap();
        let f = Finalizer::new(FinalizeSettings::new("d"));
        let (kept, pruned) = f.prune_logs(&dir.path().join("logs"));
        assert!(kept.is_none());
        assert!(pruned.is_empty());
    }
}
