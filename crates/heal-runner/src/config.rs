use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use heal_core::{BaselinePolicy, CriticalFileSet};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub finalize: FinalizeConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

/// All paths accept `~` and `$VAR`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Live data directory. Its final component names the data root.
    pub data_dir: String,
    pub restore_dir: String,
    pub staging_dir: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// restic repository location, passed with `-r`.
    pub location: String,
    #[serde(default = "default_binary")]
    pub binary: String,
    #[serde(default = "default_password_env")]
    pub password_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub no_lock: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecoveryConfig {
    pub critical_files: Vec<String>,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinalizeConfig {
    pub malicious_suffixes: Vec<String>,
    pub logs_subdir: String,
    /// `*` prunes every regular file in the logs dir.
    pub log_extension: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
    #[serde(default)]
    pub policy: BaselinePolicy,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatchConfig {
    pub enabled: bool,
    pub queue_capacity: usize,
}

fn default_binary() -> String {
    "restic".to_string()
}

fn default_password_env() -> String {
    "RESTIC_PASSWORD".to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_max_depth() -> usize {
    heal_recovery::DEFAULT_MAX_DEPTH
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self { critical_files: vec!["docs/report_Q1.txt".to_string()], max_depth: default_max_depth() }
    }
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            malicious_suffixes: vec![".enc".to_string()],
            logs_subdir: "logs".to_string(),
            log_extension: heal_recovery::ANY_EXTENSION.to_string(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { interval_secs: 30, policy: BaselinePolicy::FirstOnly }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { enabled: true, queue_capacity: 64 }
    }
}

impl Config {
    pub fn default_for_base(base_dir: &Path) -> Self {
        let under = |name: &str| base_dir.join(name).to_string_lossy().into_owned();
        Self {
            paths: PathsConfig {
                data_dir: under("victim_data"),
                restore_dir: under("restore"),
                staging_dir: under("staging"),
            },
            repository: RepositoryConfig {
                location: under("backup_repo"),
                binary: default_binary(),
                password_env: default_password_env(),
                timeout_secs: default_timeout_secs(),
                no_lock: true,
            },
            recovery: RecoveryConfig::default(),
            finalize: FinalizeConfig::default(),
            schedule: ScheduleConfig::default(),
            watch: WatchConfig::default(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Config = toml::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let s = toml::to_string_pretty(self).with_context(|| "serialize toml")?;
        std::fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn config_path(base_dir: &Path) -> PathBuf {
        base_dir.join("heal.toml")
    }

    pub fn validate(&self) -> Result<()> {
        self.data_root_name()?;
        if self.schedule.interval_secs == 0 {
            return Err(anyhow!("schedule.interval_secs must be positive"));
        }
        if self.watch.queue_capacity == 0 {
            return Err(anyhow!("watch.queue_capacity must be positive"));
        }
        if self.repository.timeout_secs == 0 {
            return Err(anyhow!("repository.timeout_secs must be positive"));
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        expand(&self.paths.data_dir)
    }

    pub fn restore_dir(&self) -> PathBuf {
        expand(&self.paths.restore_dir)
    }

    pub fn staging_dir(&self) -> PathBuf {
        expand(&self.paths.staging_dir)
    }

    pub fn repository_location(&self) -> String {
        expand(&self.repository.location).to_string_lossy().into_owned()
    }

    pub fn data_root_name(&self) -> Result<String> {
        self.data_dir()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("paths.data_dir {:?} has no final component", self.paths.data_dir))
    }

    pub fn critical_files(&self) -> CriticalFileSet {
        CriticalFileSet::new(self.recovery.critical_files.iter())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.repository.timeout_secs)
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.interval_secs)
    }
}

fn expand(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::full(p).map(|s| s.into_owned()).unwrap_or_else(|_| p.to_string()))
}
