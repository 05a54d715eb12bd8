use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{Snapshot, SnapshotId};

/// Relative paths whose readability gates trust in a snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CriticalFileSet(pub Vec<PathBuf>);

impl CriticalFileSet {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self(paths.into_iter().map(Into::into).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.0.iter().map(PathBuf::as_path)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum VerificationFailureKind {
    Missing,
    NotAFile,
    Unreadable(String),
    Empty,
    /// Content differs from the digest recorded when the snapshot verified.
    DigestMismatch { expected: String, actual: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationFailure {
    pub path: PathBuf,
    pub kind: VerificationFailureKind,
}

impl fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.path.display();
        match &self.kind {
            VerificationFailureKind::Missing => write!(f, "{p} missing"),
            VerificationFailureKind::NotAFile => write!(f, "{p} is not a regular file"),
            VerificationFailureKind::Unreadable(e) => write!(f, "{p} unreadable: {e}"),
            VerificationFailureKind::Empty => write!(f, "{p} is empty"),
            VerificationFailureKind::DigestMismatch { expected, actual } => {
                write!(f, "{p} has sha256 {actual}, expected {expected}")
            }
        }
    }
}

/// Why a candidate was discarded. None of these abort the recovery call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    RestoreFailed(String),
    DataRootNotFound,
    Verification(VerificationFailure),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::RestoreFailed(e) => write!(f, "restore failed: {e}"),
            RejectReason::DataRootNotFound => f.write_str("data root not found in restored tree"),
            RejectReason::Verification(v) => write!(f, "verification failed: {v}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Promoted,
    Rejected(RejectReason),
}

/// One candidate tried during `recover`. The staging path no longer exists
/// once the call returns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateAttempt {
    pub snapshot: SnapshotId,
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    pub staging_path: PathBuf,
    pub outcome: AttemptOutcome,
}

impl CandidateAttempt {
    pub fn new(snapshot: &Snapshot, staging_path: PathBuf, outcome: AttemptOutcome) -> Self {
        Self { snapshot: snapshot.id.clone(), time: snapshot.time, staging_path, outcome }
    }

    pub fn is_promoted(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Promoted)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedFile {
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    pub promoted: SnapshotId,
    /// Location of the promoted data root inside the restore target.
    pub promoted_root: PathBuf,
    pub attempts: Vec<CandidateAttempt>,
    pub verified: Vec<VerifiedFile>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum FileOutcome {
    Deleted,
    Failed(String),
}

/// Result of one entry in a best-effort batch delete.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub outcome: FileOutcome,
}

impl FileReport {
    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), outcome: FileOutcome::Deleted }
    }

    pub fn failed(path: impl Into<PathBuf>, err: impl fmt::Display) -> Self {
        Self { path: path.into(), outcome: FileOutcome::Failed(err.to_string()) }
    }

    pub fn is_deleted(&self) -> bool {
        self.outcome == FileOutcome::Deleted
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FinalizeReport {
    pub data_root: PathBuf,
    pub purged: Vec<FileReport>,
    pub kept_log: Option<PathBuf>,
    pub pruned_logs: Vec<FileReport>,
    pub cleared: Vec<FileReport>,
}

impl FinalizeReport {
    /// Entries from every advisory step that could not be deleted.
    pub fn failures(&self) -> impl Iterator<Item = &FileReport> {
        self.purged
            .iter()
            .chain(self.pruned_logs.iter())
            .chain(self.cleared.iter())
            .filter(|r| !r.is_deleted())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Created(Snapshot),
    Skipped { existing: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_reasons_render_for_forensics() {
        let r = RejectReason::Verification(VerificationFailure {
            path: "docs/report_Q1.txt".into(),
            kind: VerificationFailureKind::Empty,
        });
        assert_eq!(r.to_string(), "verification failed: docs/report_Q1.txt is empty");
        assert_eq!(RejectReason::DataRootNotFound.to_string(), "data root not found in restored tree");
    }

    #[test]
    fn finalize_report_collects_failures_across_steps() {
        let report = FinalizeReport {
            purged: vec![FileReport::deleted("a.enc"), FileReport::failed("b.enc", "denied")],
            pruned_logs: vec![FileReport::failed("old.txt", "busy")],
            ..Default::default()
        };
        let failed: Vec<_> = report.failures().map(|r| r.path.clone()).collect();
        assert_eq!(failed, vec![PathBuf::from("b.enc"), PathBuf::from("old.txt")]);
    }
}
