use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use heal_core::Tag;
use walkdir::WalkDir;

use crate::traits::SnapshotRepository;

/// Shared adapter contract suite. Small on purpose; runs against the in-memory
/// repository and, when the binary is present, restic.
pub fn run_repository_contract_suite(repo: &dyn SnapshotRepository, scratch: &Path) -> Result<()> {
    if !repo.is_initialized()? {
        repo.init().context("init repository")?;
    }
    if !repo.is_initialized()? {
        return Err(anyhow!("repository still uninitialized after init"));
    }

    let data = scratch.join("contract_data");
    std::fs::create_dir_all(data.join("docs"))?;
    std::fs::write(data.join("docs").join("contract.txt"), "hello")?;

    let base = repo.backup(&data, &[Tag::Baseline]).context("baseline backup")?;
    std::fs::write(data.join("docs").join("later.txt"), "later")?;
    let auto = repo.backup(&data, &[Tag::Auto]).context("auto backup")?;
    if base.id == auto.id {
        return Err(anyhow!("expected distinct snapshot ids"));
    }

    let all = repo.snapshots(None)?;
    for id in [&base.id, &auto.id] {
        if !all.iter().any(|s| &s.id == id) {
            return Err(anyhow!("snapshot {id} missing from unfiltered listing"));
        }
    }
    let baselines = repo.snapshots(Some(&Tag::Baseline))?;
    if baselines.iter().any(|s| s.id == auto.id) {
        return Err(anyhow!("tag filter returned an auto snapshot"));
    }
    if !baselines.iter().any(|s| s.id == base.id && s.has_tag(&Tag::Baseline)) {
        return Err(anyhow!("tag filter lost the baseline snapshot"));
    }

    // Restoring the baseline must not include the file written after it.
    let target = scratch.join("contract_restore");
    std::fs::create_dir_all(&target)?;
    repo.restore(&base.id, &target).context("restore baseline")?;
    let restored = find_file(&target, "contract.txt").ok_or_else(|| anyhow!("contract.txt not restored"))?;
    if std::fs::read_to_string(&restored)? != "hello" {
        return Err(anyhow!("restored content mismatch"));
    }
    if find_file(&target, "later.txt").is_some() {
        return Err(anyhow!("baseline restore contains a file written after it"));
    }

    Ok(())
}

fn find_file(root: &Path, name: &str) -> Option<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file() && e.file_name() == name)
        .map(|e| e.into_path())
}
