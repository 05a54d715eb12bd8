use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::{AttemptOutcome, CandidateAttempt, Tag};

/// Failure of a single repository command, as reported by an adapter.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("repository rejected credentials: {0}")]
    Authentication(String),
    #[error("repository is locked: {0}")]
    Locked(String),
    #[error("repository command timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Command(String),
}

impl RepoError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, RepoError::Authentication(_))
    }
}

/// Operation-level errors. Per-candidate restore and verification failures
/// never surface here on their own; they are folded into
/// [`HealError::NoTrustworthyCandidate`] when every candidate is rejected.
#[derive(Debug, Error)]
pub enum HealError {
    #[error("repository unavailable: {0}")]
    RepositoryUnavailable(#[source] RepoError),

    #[error("capture tagged '{tag}' failed: {source}")]
    CaptureFailed {
        tag: Tag,
        #[source]
        source: RepoError,
    },

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("no snapshots tagged 'baseline' in repository")]
    NoCandidates,

    #[error("no trustworthy baseline among {} candidate(s):\n{}", .attempts.len(), render_attempts(.attempts))]
    NoTrustworthyCandidate { attempts: Vec<CandidateAttempt> },

    #[error("data root '{name}' not found under {}", .under.display())]
    DataRootNotFound { name: String, under: PathBuf },

    #[error("promoting verified snapshot into {} failed: {source}", .path.display())]
    PromotionFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("finalize failed while replacing {}: {source}", .path.display())]
    FinalizeFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("staging error at {}: {source}", .path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HealError {
    /// Maps a listing failure, keeping credential problems distinct.
    pub fn from_query(err: RepoError) -> Self {
        match err {
            RepoError::Authentication(msg) => HealError::AuthenticationFailed(msg),
            other => HealError::RepositoryUnavailable(other),
        }
    }

    /// Maps a backup failure, keeping credential problems distinct.
    pub fn from_capture(tag: Tag, err: RepoError) -> Self {
        match err {
            RepoError::Authentication(msg) => HealError::AuthenticationFailed(msg),
            source => HealError::CaptureFailed { tag, source },
        }
    }

    pub fn staging(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HealError::Staging { path: path.into(), source }
    }
}

fn render_attempts(attempts: &[CandidateAttempt]) -> String {
    attempts
        .iter()
        .map(|a| match &a.outcome {
            AttemptOutcome::Promoted => format!("  {} promoted", a.snapshot),
            AttemptOutcome::Rejected(r) => format!("  {} rejected: {}", a.snapshot, r),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RejectReason, SnapshotId};
    use time::macros::datetime;

    #[test]
    fn exhaustion_message_lists_every_candidate() {
        let attempts = vec![
            CandidateAttempt {
                snapshot: SnapshotId::from_str("bbbb"),
                time: datetime!(2024-01-02 0:00 UTC),
                staging_path: "/tmp/s/bbbb".into(),
                outcome: AttemptOutcome::Rejected(RejectReason::RestoreFailed("pack missing".into())),
            },
            CandidateAttempt {
                snapshot: SnapshotId::from_str("aaaa"),
                time: datetime!(2024-01-01 0:00 UTC),
                staging_path: "/tmp/s/aaaa".into(),
                outcome: AttemptOutcome::Rejected(RejectReason::DataRootNotFound),
            },
        ];
        let msg = HealError::NoTrustworthyCandidate { attempts }.to_string();
        assert!(msg.contains("among 2 candidate(s)"));
        assert!(msg.contains("bbbb rejected: restore failed: pack missing"));
        assert!(msg.contains("aaaa rejected: data root not found"));
    }

    #[test]
    fn credential_errors_are_not_reported_as_unavailability() {
        let e = HealError::from_query(RepoError::Authentication("wrong password".into()));
        assert!(matches!(e, HealError::AuthenticationFailed(_)));
        let e = HealError::from_capture(Tag::Auto, RepoError::Locked("held by pid 7".into()));
        assert!(matches!(e, HealError::CaptureFailed { tag: Tag::Auto, .. }));
    }
}
