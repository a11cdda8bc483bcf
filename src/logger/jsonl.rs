//! JSONL diagnostics writer: append-only line-delimited JSON.
//!
//! Each line is a self-contained JSON object, assembled in memory and written
//! with a single `write_all` so a tailing reader never sees a partial line.
//!
//! Fallback chain:
//! 1. Primary file path
//! 2. Optional fallback path
//! 3. stderr with `[DPC-JSONL]` prefix
//! 4. Silent discard (the dashboard never stops for logging failures)

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions, rename};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::core::config::LoggingConfig;
use crate::core::errors::{DpcError, Result};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Diagnostic event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    LoopStarted,
    LoopStopped,
    LoadFailed,
    RefreshFailed,
    TicketExpired,
    LateCompletionDiscarded,
    Invalidated,
    MutationFailed,
    AggregateUnreachable,
    LoggerBackpressure,
}

/// One JSONL line. Everything except `ts`, `event`, `severity` is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    /// Device the event concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Data kind the event concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Ticket generation for refresh bookkeeping events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    /// Short error label (`timeout`, `unreachable`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// FNV-1a hash of the effective config.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
    /// Freeform details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            subject: None,
            kind: None,
            generation: None,
            error_kind: None,
            error_message: None,
            config_hash: None,
            details: None,
        }
    }
}

/// Where lines currently go. Each failure moves one step down the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Primary,
    Fallback,
    Stderr,
    Discard,
}

impl Target {
    const fn next(self) -> Self {
        match self {
            Self::Primary => Self::Fallback,
            Self::Fallback => Self::Stderr,
            Self::Stderr | Self::Discard => Self::Discard,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
            Self::Stderr => "stderr",
            Self::Discard => "discard",
        }
    }
}

/// Configuration for the JSONL writer.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    /// Maximum file size before rotation (bytes).
    pub max_size_bytes: u64,
    /// Number of rotated files to keep.
    pub max_rotated_files: u32,
    /// Seconds between forced fsync calls.
    pub fsync_interval_secs: u64,
}

impl JsonlConfig {
    #[must_use]
    pub fn from_logging(logging: &LoggingConfig) -> Self {
        Self {
            path: logging.jsonl_path.clone(),
            fallback_path: Some(std::env::temp_dir().join("dpc-diagnostics.jsonl")),
            max_size_bytes: logging.max_size_bytes,
            max_rotated_files: logging.max_rotated_files,
            fsync_interval_secs: 10,
        }
    }
}

/// Append-only JSONL writer with rotation and multi-level fallback.
pub struct JsonlWriter {
    config: JsonlConfig,
    target: Target,
    file: Option<LogFile>,
    last_sync: SystemTime,
}

impl JsonlWriter {
    /// Open the log, settling on the first target in the chain that works.
    pub fn open(config: JsonlConfig) -> Self {
        let mut writer = Self {
            config,
            target: Target::Primary,
            file: None,
            last_sync: SystemTime::now(),
        };
        writer.settle();
        writer
    }

    /// Write a single log entry as one atomic JSONL line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(json) => self.emit(&format!("{json}\n")),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[DPC-JSONL] serialize error: {e}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.out.flush();
        }
    }

    pub fn fsync(&mut self) {
        if let Some(file) = self.file.as_mut() {
            file.sync();
        }
        self.last_sync = SystemTime::now();
    }

    /// Current link of the fallback chain.
    pub fn state(&self) -> &str {
        self.target.label()
    }

    // ──────────────────────── internals ────────────────────────

    fn emit(&mut self, line: &str) {
        loop {
            match self.target {
                Target::Stderr => {
                    let _ = write!(io::stderr(), "[DPC-JSONL] {line}");
                    return;
                }
                Target::Discard => return,
                Target::Primary | Target::Fallback => {}
            }

            let len = line.len() as u64;
            if self
                .file
                .as_ref()
                .is_some_and(|f| f.len + len > self.config.max_size_bytes)
            {
                self.rotate();
            }
            let written = self.file.as_mut().is_some_and(|f| f.append_line(line).is_ok());
            if written {
                self.maybe_sync();
                return;
            }
            self.fail();
        }
    }

    /// Walk down the chain from the current target until one opens.
    fn settle(&mut self) {
        loop {
            let path = match self.target {
                Target::Primary => Some(self.config.path.clone()),
                Target::Fallback => self.config.fallback_path.clone(),
                Target::Stderr | Target::Discard => return,
            };
            if let Some(path) = path
                && let Ok(file) = LogFile::append(path)
            {
                if self.target == Target::Fallback {
                    let _ = writeln!(
                        io::stderr(),
                        "[DPC-JSONL] primary log unavailable, using fallback: {}",
                        file.path.display()
                    );
                }
                self.file = Some(file);
                return;
            }
            self.target = self.target.next();
            if self.target == Target::Stderr {
                let _ = writeln!(io::stderr(), "[DPC-JSONL] no writable log file, using stderr");
            }
        }
    }

    fn fail(&mut self) {
        self.file = None;
        self.target = self.target.next();
        self.settle();
    }

    fn maybe_sync(&mut self) {
        let elapsed = SystemTime::now()
            .duration_since(self.last_sync)
            .unwrap_or(Duration::ZERO);
        if elapsed.as_secs() >= self.config.fsync_interval_secs {
            self.fsync();
        }
    }

    /// `log` -> `log.1`, shifting older generations up and dropping the last.
    fn rotate(&mut self) {
        let Some(mut file) = self.file.take() else {
            return;
        };
        let _ = file.out.flush();
        let base = file.path.clone();
        drop(file);

        for i in (1..self.config.max_rotated_files).rev() {
            let _ = rename(rotated_name(&base, i), rotated_name(&base, i + 1));
        }
        let _ = rename(&base, rotated_name(&base, 1));

        match LogFile::append(base) {
            Ok(file) => self.file = Some(file),
            Err(_) => self.fail(),
        }
    }
}

// ──────────────────────── helpers ────────────────────────

struct LogFile {
    path: PathBuf,
    out: BufWriter<File>,
    len: u64,
}

impl LogFile {
    /// Open or create `path` for appending, creating parent directories.
    fn append(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| DpcError::io(parent, source))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| DpcError::io(&path, source))?;
        let len = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path,
            out: BufWriter::with_capacity(16 * 1024, file),
            len,
        })
    }

    fn append_line(&mut self, line: &str) -> io::Result<()> {
        self.out.write_all(line.as_bytes())?;
        self.len += line.len() as u64;
        Ok(())
    }

    fn sync(&mut self) {
        let _ = self.out.flush();
        let _ = self.out.get_ref().sync_data();
    }
}

/// `foo.jsonl` -> `foo.jsonl.3`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ──────────────────────── tests ────────────────────────
