use anyhow::{anyhow, Context, Result};

use heal_core::RepoError;
use heal_repo::SnapshotRepository;
use tracing::{info, warn};

use crate::Config;

/// Preflight checks before running unattended. Errors carry the fix.
pub fn doctor(cfg: &Config, repo: &dyn SnapshotRepository) -> Result<()> {
    cfg.validate()?;

    let env = &cfg.repository.password_env;
    match std::env::var_os(env) {
        Some(v) if !v.is_empty() => {}
        _ => return Err(anyhow!("{env} is not set; export the repository passphrase before running")),
    }

    match repo.is_initialized() {
        Ok(true) => info!(repo = repo.kind(), location = %cfg.repository_location(), "repository reachable"),
        Ok(false) => {
            return Err(anyhow!(
                "no repository at {}; run `heal init` first",
                cfg.repository_location()
            ))
        }
        Err(RepoError::Unavailable(msg)) if msg.contains("not runnable") => {
            return Err(anyhow!("{} not found on PATH; install restic first ({msg})", cfg.repository.binary))
        }
        Err(e) => return Err(e).context("open repository"),
    }

    let data = cfg.data_dir();
    if !data.is_dir() {
        return Err(anyhow!("data directory {} does not exist", data.display()));
    }
    for rel in cfg.critical_files().iter() {
        if !data.join(rel).is_file() {
            warn!(path = %rel.display(), "critical file missing from live data; recovery will reject snapshots without it");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use heal_repo::InMemoryRepository;
    use std::path::Path;
    use tempfile::tempdir;

    #[test]
    fn missing_secret_is_reported_first() {
        let mut cfg = Config::default_for_base(Path::new("/srv"));
        cfg.repository.password_env = "HEAL_DOCTOR_UNSET_SECRET".into();
        let err = doctor(&cfg, &InMemoryRepository::new()).unwrap_err();
        assert!(err.to_string().contains("HEAL_DOCTOR_UNSET_SECRET"));
    }

    #[test]
    fn healthy_layout_passes() {
        let dir = tempdir().unwrap();
        let mut cfg = Config::default_for_base(dir.path());
        cfg.repository.password_env = "HEAL_DOCTOR_TEST_SECRET".into();
        std::env::set_var("HEAL_DOCTOR_TEST_SECRET", "s3cret");
        std::fs::create_dir_all(cfg.data_dir()).unwrap();
        doctor(&cfg, &InMemoryRepository::new()).unwrap();
    }
}
