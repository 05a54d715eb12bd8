use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

use heal_core::{RepoError, Snapshot, SnapshotId, Tag};
use heal_repo::SnapshotRepository;
use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::process::{run_with_timeout, ProcessError};

// restic exit codes (0.17+)
const EXIT_PARTIAL_BACKUP: i32 = 3;
const EXIT_NO_REPOSITORY: i32 = 10;
const EXIT_LOCK_FAILED: i32 = 11;
const EXIT_WRONG_PASSWORD: i32 = 12;

/// Repository adapter driving the `restic` command line.
///
/// The passphrase is read from the environment variable named by
/// `password_env` and handed to restic as `RESTIC_PASSWORD`.
#[derive(Clone, Debug)]
pub struct ResticRepository {
    pub binary: String,
    pub repository: String,
    pub password_env: String,
    pub timeout: Duration,
    pub no_lock: bool,
}

impl ResticRepository {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            binary: "restic".to_string(),
            repository: repository.into(),
            password_env: "RESTIC_PASSWORD".to_string(),
            timeout: Duration::from_secs(600),
            no_lock: true,
        }
    }

    pub fn with_password_env(mut self, name: impl Into<String>) -> Self {
        self.password_env = name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_no_lock(mut self, no_lock: bool) -> Self {
        self.no_lock = no_lock;
        self
    }

    /// Whether the configured binary answers `version`.
    pub fn binary_available(&self) -> bool {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("version");
        run_with_timeout(cmd, Duration::from_secs(10)).map(|o| o.status.success()).unwrap_or(false)
    }

    fn secret(&self) -> Result<OsString, RepoError> {
        match std::env::var_os(&self.password_env) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(RepoError::Authentication(format!("{} is not set", self.password_env))),
        }
    }

    /// Spawn restic with the repository and secret wired in. Exit status is not checked.
    fn exec<I, S>(&self, args: I) -> Result<Output, RepoError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let secret = self.secret()?;
        let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
        // Command's Debug output includes the environment, so log the arguments only
        debug!(binary = %self.binary, args = ?args, "running restic");
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-r").arg(&self.repository).args(&args).env("RESTIC_PASSWORD", secret);
        run_with_timeout(cmd, self.timeout).map_err(|e| match e {
            ProcessError::TimedOut(d) => RepoError::Timeout(d),
            ProcessError::Spawn(err) => RepoError::Unavailable(format!("{} not runnable: {err}", self.binary)),
            ProcessError::Wait(err) => RepoError::Command(err.to_string()),
        })
    }

    fn run<I, S>(&self, args: I) -> Result<String, RepoError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let out = self.exec(args)?;
        if !out.status.success() {
            return Err(classify_failure(out.status.code(), &String::from_utf8_lossy(&out.stderr)));
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

impl SnapshotRepository for ResticRepository {
    fn kind(&self) -> &'static str {
        "restic"
    }

    fn is_initialized(&self) -> Result<bool, RepoError> {
        let out = self.exec(["cat", "config", "--no-lock"])?;
        let stderr = String::from_utf8_lossy(&out.stderr);
        match out.status.code() {
            Some(0) => Ok(true),
            Some(EXIT_NO_REPOSITORY) => Ok(false),
            // restic before 0.17 exits 1 here
            Some(1) if is_missing_repository(&stderr) => Ok(false),
            code => Err(classify_failure(code, &stderr)),
        }
    }

    fn init(&self) -> Result<(), RepoError> {
        self.run(["init"]).map(|_| ())
    }

    fn backup(&self, source: &Path, tags: &[Tag]) -> Result<Snapshot, RepoError> {
        let mut args: Vec<&OsStr> = vec![OsStr::new("backup"), source.as_os_str(), OsStr::new("--json")];
        for tag in tags {
            args.push(OsStr::new("--tag"));
            args.push(OsStr::new(tag.as_str()));
        }
        let out = self.exec(&args)?;
        let stdout = String::from_utf8_lossy(&out.stdout);
        match out.status.code() {
            Some(0) => {}
            Some(EXIT_PARTIAL_BACKUP) => {
                warn!(source = %source.display(), "restic could not read some files; snapshot is partial");
            }
            code => return Err(classify_failure(code, &String::from_utf8_lossy(&out.stderr))),
        }
        let summary = parse_backup_summary(&stdout)?;
        Ok(Snapshot {
            id: summary.snapshot_id,
            time: summary.started.unwrap_or_else(OffsetDateTime::now_utc),
            tags: tags.to_vec(),
            paths: vec![source.to_path_buf()],
        })
    }

    fn snapshots(&self, tag: Option<&Tag>) -> Result<Vec<Snapshot>, RepoError> {
        let mut args = vec!["snapshots", "--json"];
        if self.no_lock {
            args.push("--no-lock");
        }
        if let Some(tag) = tag {
            args.push("--tag");
            args.push(tag.as_str());
        }
        let stdout = self.run(&args)?;
        parse_snapshots(&stdout)
    }

    fn restore(&self, id: &SnapshotId, target: &Path) -> Result<(), RepoError> {
        let args = [OsStr::new("restore"), OsStr::new(id.as_str()), OsStr::new("--target"), target.as_os_str()];
        self.run(args).map(|_| ())
    }
}

#[derive(Deserialize)]
struct ResticSnapshot {
    id: String,
    time: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    paths: Vec<PathBuf>,
}

/// Parses `restic snapshots --json`.
pub fn parse_snapshots(json: &str) -> Result<Vec<Snapshot>, RepoError> {
    let trimmed = json.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    let raw: Vec<ResticSnapshot> =
        serde_json::from_str(trimmed).map_err(|e| RepoError::Command(format!("parse snapshots json: {e}")))?;
    raw.into_iter()
        .map(|r| {
            let time = OffsetDateTime::parse(&r.time, &Rfc3339)
                .map_err(|e| RepoError::Command(format!("snapshot {} has bad time {:?}: {e}", r.id, r.time)))?;
            Ok(Snapshot {
                id: SnapshotId::from_str(r.id),
                time,
                tags: r.tags.unwrap_or_default().into_iter().map(Tag::from).collect(),
                paths: r.paths,
            })
        })
        .collect()
}

#[derive(Debug)]
pub struct BackupSummary {
    pub snapshot_id: SnapshotId,
    pub started: Option<OffsetDateTime>,
}

#[derive(Deserialize)]
struct SummaryLine {
    message_type: String,
    #[serde(default)]
    snapshot_id: Option<String>,
    #[serde(default)]
    backup_start: Option<String>,
}

/// Finds the summary message in `restic backup --json` output.
pub fn parse_backup_summary(stdout: &str) -> Result<BackupSummary, RepoError> {
    for line in stdout.lines().rev() {
        let Ok(msg) = serde_json::from_str::<SummaryLine>(line.trim()) else {
            continue;
        };
        if msg.message_type != "summary" {
            continue;
        }
        let id = msg
            .snapshot_id
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RepoError::Command("backup summary carries no snapshot_id".into()))?;
        let started = msg.backup_start.and_then(|s| OffsetDateTime::parse(&s, &Rfc3339).ok());
        return Ok(BackupSummary { snapshot_id: SnapshotId::from_str(id), started });
    }
    Err(RepoError::Command("no summary in restic backup output".into()))
}

/// Maps a failed restic invocation onto the adapter error kinds.
pub fn classify_failure(code: Option<i32>, stderr: &str) -> RepoError {
    let msg = stderr.trim().to_string();
    let lower = msg.to_lowercase();
    if code == Some(EXIT_WRONG_PASSWORD)
        || lower.contains("wrong password")
        || lower.contains("no key found")
        || lower.contains("empty password")
    {
        return RepoError::Authentication(msg);
    }
    if code == Some(EXIT_LOCK_FAILED) || lower.contains("unable to create lock") || lower.contains("already locked") {
        return RepoError::Locked(msg);
    }
    if code == Some(EXIT_NO_REPOSITORY) || is_missing_repository(&msg) {
        return RepoError::Unavailable(msg);
    }
    match code {
        Some(c) => RepoError::Command(format!("restic exited with {c}: {msg}")),
        None => RepoError::Command(format!("restic terminated by signal: {msg}")),
    }
}

fn is_missing_repository(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("repository does not exist") || lower.contains("is there a repository at the following location")
}
