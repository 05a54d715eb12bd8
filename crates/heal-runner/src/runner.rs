use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use heal_core::{FinalizeReport, RecoveryOutcome, Snapshot, Tag};
use heal_recovery::{confirm_digests, FinalizeSettings, Finalizer, RecoveryOrchestrator, RecoverySettings};
use heal_repo::{CaptureService, SnapshotCatalog, SnapshotRepository};
use heal_repo_restic::ResticRepository;
use tracing::info;

use crate::lifecycle::Lifecycle;
use crate::scheduler::{spawn_scheduler, BaselineScheduler};
use crate::watch::{spawn_watcher, EventFilter};
use crate::{doctor::doctor, Config};

pub struct Runner {
    pub cfg: Config,
    pub repo: Arc<dyn SnapshotRepository>,
}

impl Runner {
    /// Loads `config_path`, or `<base_dir>/heal.toml`, writing defaults if absent.
    pub fn open(base_dir: &Path, config_path: Option<&Path>) -> Result<Self> {
        let cfg_path = config_path.map(Path::to_path_buf).unwrap_or_else(|| Config::config_path(base_dir));
        let cfg = if cfg_path.exists() {
            Config::load_from(&cfg_path)?
        } else {
            let cfg = Config::default_for_base(base_dir);
            cfg.save_to(&cfg_path)?;
            cfg
        };
        let repo = Arc::new(restic_for(&cfg));
        Ok(Self { cfg, repo })
    }

    pub fn with_repository(cfg: Config, repo: Arc<dyn SnapshotRepository>) -> Self {
        Self { cfg, repo }
    }

    /// Writes the default config and directory layout. Existing files are kept.
    pub fn init_layout(base_dir: &Path, config_path: Option<&Path>) -> Result<PathBuf> {
        let cfg_path = config_path.map(Path::to_path_buf).unwrap_or_else(|| Config::config_path(base_dir));
        let cfg = if cfg_path.exists() {
            Config::load_from(&cfg_path)?
        } else {
            let cfg = Config::default_for_base(base_dir);
            cfg.save_to(&cfg_path)?;
            cfg
        };
        let data = cfg.data_dir();
        for dir in [
            data.join("docs"),
            data.join(&cfg.finalize.logs_subdir),
            cfg.restore_dir(),
            cfg.staging_dir(),
        ] {
            std::fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        }
        Ok(cfg_path)
    }

    /// Initializes the repository if needed. Returns whether it was created.
    pub fn init_repository(&self) -> Result<bool> {
        if self.repo.is_initialized().context("probe repository")? {
            return Ok(false);
        }
        self.repo.init().context("initialize repository")?;
        info!(location = %self.cfg.repository_location(), "repository initialized");
        Ok(true)
    }

    pub fn doctor(&self) -> Result<()> {
        doctor(&self.cfg, self.repo.as_ref())
    }

    pub fn catalog(&self) -> SnapshotCatalog {
        SnapshotCatalog::new(self.repo.clone())
    }

    pub fn capture_service(&self) -> CaptureService {
        CaptureService::new(self.repo.clone())
    }

    pub fn snapshots(&self, tag: Option<&Tag>) -> Result<Vec<Snapshot>> {
        Ok(self.catalog().list(tag)?)
    }

    pub fn capture(&self, tag: Tag) -> Result<Snapshot> {
        Ok(self.capture_service().capture(&self.cfg.data_dir(), tag)?)
    }

    /// Records the incident point as an `attack` snapshot of the live data.
    pub fn mark_incident(&self) -> Result<Snapshot> {
        self.capture(Tag::Attack)
    }

    pub fn orchestrator(&self) -> Result<RecoveryOrchestrator> {
        let mut settings =
            RecoverySettings::new(self.cfg.data_root_name()?, self.cfg.staging_dir(), self.cfg.restore_dir())
                .with_critical_files(self.cfg.critical_files());
        settings.max_depth = self.cfg.recovery.max_depth;
        Ok(RecoveryOrchestrator::new(self.repo.clone(), settings))
    }

    pub fn finalizer(&self) -> Result<Finalizer> {
        let f = &self.cfg.finalize;
        let mut settings = FinalizeSettings::new(self.cfg.data_root_name()?);
        settings.malicious_suffixes = f.malicious_suffixes.clone();
        settings.logs_subdir = PathBuf::from(&f.logs_subdir);
        settings.log_extension = f.log_extension.clone();
        settings.max_depth = self.cfg.recovery.max_depth;
        Ok(Finalizer::new(settings))
    }

    pub fn recover(&self) -> Result<RecoveryOutcome> {
        Ok(self.orchestrator()?.recover()?)
    }

    pub fn finalize(&self) -> Result<FinalizeReport> {
        Ok(self.finalizer()?.finalize(&self.cfg.restore_dir(), &self.cfg.data_dir())?)
    }

    /// Recover, finalize the promoted root into the live data directory, then
    /// check the live critical files against the digests taken at verification.
    pub fn heal(&self) -> Result<(RecoveryOutcome, FinalizeReport)> {
        let outcome = self.recover()?;
        let live = self.cfg.data_dir();
        let report = self
            .finalizer()?
            .finalize_root(outcome.promoted_root.clone(), &self.cfg.restore_dir(), &live)
            .context("finalize promoted snapshot")?;
        confirm_digests(&live, &outcome.verified).map_err(|failure| {
            anyhow!("live data does not match snapshot {}: {failure}", outcome.promoted.short())
        })?;
        info!(snapshot = outcome.promoted.short(), checked = outcome.verified.len(), "live data confirmed");
        Ok((outcome, report))
    }

    /// Starts the baseline scheduler and, if enabled, the change watcher.
    /// Must be called from within a tokio runtime.
    pub fn start_background(&self) -> Result<Lifecycle> {
        let mut lifecycle = Lifecycle::new();
        let data = self.cfg.data_dir();

        let scheduler = Arc::new(BaselineScheduler::new(
            self.catalog(),
            self.capture_service(),
            data.clone(),
            self.cfg.schedule.policy,
        ));
        spawn_scheduler(scheduler, self.cfg.schedule_interval(), &mut lifecycle);

        if self.cfg.watch.enabled {
            let filter = EventFilter::new(data.clone(), self.ignored_paths());
            if let Err(e) =
                spawn_watcher(self.capture_service(), data, filter, self.cfg.watch.queue_capacity, &mut lifecycle)
            {
                lifecycle.stop();
                return Err(e);
            }
        }
        Ok(lifecycle)
    }

    /// Trees whose churn must not trigger captures of the data directory.
    fn ignored_paths(&self) -> Vec<PathBuf> {
        vec![
            self.cfg.staging_dir(),
            self.cfg.restore_dir(),
            PathBuf::from(self.cfg.repository_location()),
        ]
    }
}

pub fn restic_for(cfg: &Config) -> ResticRepository {
    ResticRepository::new(cfg.repository_location())
        .with_binary(cfg.repository.binary.clone())
        .with_password_env(cfg.repository.password_env.clone())
        .with_timeout(cfg.command_timeout())
        .with_no_lock(cfg.repository.no_lock)
}
