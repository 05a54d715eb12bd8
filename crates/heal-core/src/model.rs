use std::fmt;

use serde::{Deserialize, Serialize};

/// Snapshot labels. The repository stores them as plain strings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Tag {
    /// Trusted recovery point.
    Baseline,
    /// High-frequency capture triggered by a file change.
    Auto,
    /// Incident marker, informational only.
    Attack,
    Other(String),
}

impl Tag {
    pub fn as_str(&self) -> &str {
        match self {
            Tag::Baseline => "baseline",
            Tag::Auto => "auto",
            Tag::Attack => "attack",
            Tag::Other(s) => s.as_str(),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "baseline" => Tag::Baseline,
            "auto" => Tag::Auto,
            "attack" => Tag::Attack,
            other => Tag::Other(other.to_string()),
        }
    }
}

impl From<String> for Tag {
    fn from(s: String) -> Self {
        Tag::parse(&s)
    }
}

impl From<Tag> for String {
    fn from(t: Tag) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the baseline scheduler does when a baseline already exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BaselinePolicy {
    /// Create a baseline only while the repository has none.
    #[default]
    FirstOnly,
    /// Capture a fresh baseline of current state on every tick.
    EveryTick,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Checking,
    Creating,
}
