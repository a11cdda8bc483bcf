//! Diagnostics logging: a dedicated logger thread owns the [`JsonlWriter`].
//!
//! The event loop and workers send [`DiagnosticEvent`]s through a bounded
//! crossbeam channel. `send()` uses `try_send()`, so logging back-pressure can
//! never stall the event loop; overflow is counted and reported later.

#![allow(missing_docs)]

pub mod jsonl;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::cache::key::{CacheKey, SubjectId};
use crate::core::config::LoggingConfig;
use crate::core::errors::{DpcError, FetchError, Result};
use jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

// ──────────────────── public event type ────────────────────

/// Events recorded in the diagnostics log.
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticEvent {
    LoopStarted {
        config_hash: String,
        panels: usize,
    },
    LoopStopped {
        reason: String,
        ticks: u64,
    },
    /// Miss-then-fail: a panel with nothing to show could not load.
    LoadFailed {
        key: CacheKey,
        error: FetchError,
    },
    /// Stale-refresh failure: the stale payload stays on screen.
    RefreshFailed {
        key: CacheKey,
        error: FetchError,
    },
    TicketExpired {
        key: CacheKey,
        generation: u64,
    },
    LateCompletionDiscarded {
        key: CacheKey,
        generation: u64,
    },
    Invalidated {
        key: CacheKey,
    },
    MutationFailed {
        subject: SubjectId,
        error: FetchError,
    },
    AggregateUnreachable {
        key: CacheKey,
        error: FetchError,
    },
    /// Sentinel requesting graceful shutdown of the logger thread.
    Shutdown,
}

// ──────────────────── public handle ────────────────────

/// Cheaply-cloneable handle for sending diagnostics. A disabled handle
/// accepts and drops everything.
#[derive(Clone, Default)]
pub struct DiagnosticsLogger {
    tx: Option<Sender<DiagnosticEvent>>,
    dropped_events: Arc<AtomicU64>,
}

impl std::fmt::Debug for DiagnosticsLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticsLogger")
            .field("enabled", &self.tx.is_some())
            .field("dropped_events", &self.dropped_events())
            .finish()
    }
}

impl DiagnosticsLogger {
    /// Handle that discards every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Handle writing into an existing channel. Used by tests that inspect
    /// emitted events directly.
    #[must_use]
    pub fn from_sender(tx: Sender<DiagnosticEvent>) -> Self {
        Self {
            tx: Some(tx),
            dropped_events: Arc::default(),
        }
    }

    /// Send an event without blocking. A full channel drops the event and
    /// bumps the dropped-events counter.
    pub fn send(&self, event: DiagnosticEvent) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        if let Err(TrySendError::Full(_)) = tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Ask the logger thread to flush and exit.
    pub fn shutdown(&self) {
        if let Some(tx) = self.tx.as_ref() {
            let _ = tx.send(DiagnosticEvent::Shutdown);
        }
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the `dpc-logger` thread. With logging disabled in config, returns a
/// disabled handle and no thread.
pub fn spawn_logger(
    config: &LoggingConfig,
) -> Result<(DiagnosticsLogger, Option<thread::JoinHandle<()>>)> {
    if !config.enabled {
        return Ok((DiagnosticsLogger::disabled(), None));
    }
    spawn_with(JsonlConfig::from_logging(config), config.channel_capacity)
}

/// Spawn the logger thread over an explicit writer config.
pub fn spawn_with(
    jsonl_config: JsonlConfig,
    channel_capacity: usize,
) -> Result<(DiagnosticsLogger, Option<thread::JoinHandle<()>>)> {
    let (tx, rx) = bounded::<DiagnosticEvent>(channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = DiagnosticsLogger {
        tx: Some(tx),
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("dpc-logger".to_string())
        .spawn(move || logger_thread_main(&rx, jsonl_config, &dropped_clone))
        .map_err(|e| DpcError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, Some(join)))
}

// ──────────────────── logger thread ────────────────────

fn logger_thread_main(
    rx: &Receiver<DiagnosticEvent>,
    jsonl_config: JsonlConfig,
    dropped: &AtomicU64,
) {
    let mut jsonl = JsonlWriter::open(jsonl_config);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::LoggerBackpressure, Severity::Warning);
            warn.details = Some(format!("{d} diagnostic events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, DiagnosticEvent::Shutdown) {
            break;
        }
        jsonl.write_entry(&event_to_log_entry(&event));
    }

    jsonl.flush();
    jsonl.fsync();
}

fn keyed(event: EventType, severity: Severity, key: &CacheKey) -> LogEntry {
    let mut entry = LogEntry::new(event, severity);
    entry.subject = Some(key.subject.to_string());
    entry.kind = Some(key.kind.as_str().to_string());
    entry
}

fn with_error(mut entry: LogEntry, error: &FetchError) -> LogEntry {
    entry.error_kind = Some(error.label().to_string());
    entry.error_message = Some(error.to_string());
    entry
}

/// Map an event to its JSONL representation.
pub fn event_to_log_entry(event: &DiagnosticEvent) -> LogEntry {
    match event {
        DiagnosticEvent::LoopStarted {
            config_hash,
            panels,
        } => {
            let mut entry = LogEntry::new(EventType::LoopStarted, Severity::Info);
            entry.config_hash = Some(config_hash.clone());
            entry.details = Some(format!("version={} panels={panels}", env!("CARGO_PKG_VERSION")));
            entry
        }
        DiagnosticEvent::LoopStopped { reason, ticks } => {
            let mut entry = LogEntry::new(EventType::LoopStopped, Severity::Info);
            entry.details = Some(format!("reason={reason} ticks={ticks}"));
            entry
        }
        DiagnosticEvent::LoadFailed { key, error } => {
            with_error(keyed(EventType::LoadFailed, Severity::Error, key), error)
        }
        DiagnosticEvent::RefreshFailed { key, error } => {
            with_error(keyed(EventType::RefreshFailed, Severity::Warning, key), error)
        }
        DiagnosticEvent::TicketExpired { key, generation } => {
            let mut entry = keyed(EventType::TicketExpired, Severity::Warning, key);
            entry.generation = Some(*generation);
            entry
        }
        DiagnosticEvent::LateCompletionDiscarded { key, generation } => {
            let mut entry = keyed(EventType::LateCompletionDiscarded, Severity::Info, key);
            entry.generation = Some(*generation);
            entry
        }
        DiagnosticEvent::Invalidated { key } => keyed(EventType::Invalidated, Severity::Info, key),
        DiagnosticEvent::MutationFailed { subject, error } => {
            let mut entry = LogEntry::new(EventType::MutationFailed, Severity::Error);
            entry.subject = Some(subject.to_string());
            with_error(entry, error)
        }
        DiagnosticEvent::AggregateUnreachable { key, error } => with_error(
            keyed(EventType::AggregateUnreachable, Severity::Warning, key),
            error,
        ),
        DiagnosticEvent::Shutdown => {
            let mut entry = LogEntry::new(EventType::LoopStopped, Severity::Info);
            entry.details = Some("logger shutdown".to_string());
            entry
        }
    }
}

// ──────────────────── tests ────────────────────
