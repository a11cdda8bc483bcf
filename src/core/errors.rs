//! DPC-prefixed error types with structured error codes.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, DpcError>;

/// Failure reported by a [`Fetcher`](crate::refresh::fetcher::Fetcher) call.
///
/// Travels inside completion messages, so it is `Clone` and carries only
/// owned strings. It never becomes a [`DpcError`]: fetch failures are panel
/// state, not process errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The call's deadline passed before a result was produced.
    #[error("deadline exceeded after {after_ms}ms")]
    DeadlineExceeded {
        /// Budget the call was given.
        after_ms: u64,
    },

    /// The device did not answer.
    #[error("device unreachable: {details}")]
    Unreachable {
        /// Transport-level explanation.
        details: String,
    },

    /// The request could not be carried to the device.
    #[error("transport failure: {details}")]
    Transport {
        /// What broke.
        details: String,
    },

    /// The device answered and refused.
    #[error("device rejected request: {details}")]
    Rejected {
        /// The device's reason.
        details: String,
    },

    /// The fetcher does not implement the operation.
    #[error("operation not supported: {operation}")]
    Unsupported {
        /// Operation name, e.g. `mutate`.
        operation: &'static str,
    },
}

impl FetchError {
    /// Short label used in diagnostics and snapshot badges.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::DeadlineExceeded { .. } => "timeout",
            Self::Unreachable { .. } => "unreachable",
            Self::Transport { .. } => "transport",
            Self::Rejected { .. } => "rejected",
            Self::Unsupported { .. } => "unsupported",
        }
    }
}

/// Top-level error type for the panel cache.
#[derive(Debug, Error)]
pub enum DpcError {
    /// A config value failed validation.
    #[error("[DPC-1001] invalid configuration: {details}")]
    InvalidConfig {
        /// Which value and why.
        details: String,
    },

    /// An explicitly requested config file does not exist.
    #[error("[DPC-1002] missing configuration file: {path}")]
    MissingConfig {
        /// The path that was asked for.
        path: PathBuf,
    },

    /// A config file or override could not be parsed.
    #[error("[DPC-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        /// Parser or source that failed.
        context: &'static str,
        /// Parser message.
        details: String,
    },

    /// Encoding or decoding a persisted value failed.
    #[error("[DPC-2101] serialization failure in {context}: {details}")]
    Serialization {
        /// Codec that failed.
        context: &'static str,
        /// Codec message.
        details: String,
    },

    /// The SQLite backing store failed.
    #[error("[DPC-2102] SQL failure in {context}: {details}")]
    Sql {
        /// Library or statement that failed.
        context: &'static str,
        /// Driver message.
        details: String,
    },

    /// A focus ring was built over no fields.
    #[error("[DPC-3001] focus ring requires at least one field")]
    EmptyFocusRing,

    /// A filesystem operation failed.
    #[error("[DPC-3002] IO failure at {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A thread could not be spawned or the terminal could not be driven.
    #[error("[DPC-3900] runtime failure: {details}")]
    Runtime {
        /// What failed.
        details: String,
    },
}

impl DpcError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "DPC-1001",
            Self::MissingConfig { .. } => "DPC-1002",
            Self::ConfigParse { .. } => "DPC-1003",
            Self::Serialization { .. } => "DPC-2101",
            Self::Sql { .. } => "DPC-2102",
            Self::EmptyFocusRing => "DPC-3001",
            Self::Io { .. } => "DPC-3002",
            Self::Runtime { .. } => "DPC-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Sql { .. } | Self::Runtime { .. })
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for DpcError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for DpcError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for DpcError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
