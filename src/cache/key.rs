//! Cache keys: the `(subject, data kind)` pair every entry is stored under.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifies the device (or other owner) a cached item describes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    /// Subject id from any string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Shape of a cached payload. Each kind carries its own TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataKind {
    /// Online state, uptime, signal.
    Status,
    /// Input channel list and their configuration.
    Inputs,
    /// Power/energy telemetry snapshot.
    Energy,
    /// Scene definitions.
    Scenes,
    /// Action templates.
    Templates,
    /// Alert rules and recent alerts.
    Alerts,
    /// Static component configuration.
    Config,
    /// Firmware version and available updates.
    Firmware,
}

impl DataKind {
    /// Every kind, in stable order.
    pub const ALL: [Self; 8] = [
        Self::Status,
        Self::Inputs,
        Self::Energy,
        Self::Scenes,
        Self::Templates,
        Self::Alerts,
        Self::Config,
        Self::Firmware,
    ];

    /// Stable name used in config files, persisted keys, and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Inputs => "inputs",
            Self::Energy => "energy",
            Self::Scenes => "scenes",
            Self::Templates => "templates",
            Self::Alerts => "alerts",
            Self::Config => "config",
            Self::Firmware => "firmware",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown data kind {s:?}"))
    }
}

/// Key for one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    /// Device the data belongs to.
    pub subject: SubjectId,
    /// What kind of data it is.
    pub kind: DataKind,
}

impl CacheKey {
    /// Key for `kind` data of `subject`.
    #[must_use]
    pub fn new(subject: impl Into<SubjectId>, kind: DataKind) -> Self {
        Self {
            subject: subject.into(),
            kind,
        }
    }

    /// Filesystem- and SQL-safe token, e.g. `dev1.inputs`.
    #[must_use]
    pub fn storage_token(&self) -> String {
        let subject: String = self
            .subject
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{subject}.{}", self.kind.as_str())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.subject, self.kind)
    }
}

impl From<String> for SubjectId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
