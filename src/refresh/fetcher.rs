//! The injected device-access seam: [`Fetcher`] and its call context.
//!
//! Fetchers run on worker threads, never on the event loop. They must honor
//! the deadline in [`FetchContext`] and must not retry internally; a retry is
//! always a fresh request decided by the caller.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::entry::Payload;
use crate::cache::key::{CacheKey, DataKind, SubjectId};
use crate::core::errors::FetchError;

/// Outcome of a single fetch.
pub type FetchResult = std::result::Result<Payload, FetchError>;

/// Per-call context carrying the absolute deadline.
#[derive(Debug, Clone, Copy)]
pub struct FetchContext {
    deadline: Instant,
    budget: Duration,
}

impl FetchContext {
    /// Context whose deadline is `budget` from now.
    #[must_use]
    pub fn new(budget: Duration) -> Self {
        Self {
            deadline: Instant::now() + budget,
            budget,
        }
    }

    /// Context ending at the wall-clock `deadline` fixed when the work was
    /// requested. Time spent queued counts against `budget`; a deadline
    /// already in the past yields an expired context.
    #[must_use]
    pub fn until(deadline: DateTime<Utc>, budget: Duration) -> Self {
        let left = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        Self {
            deadline: Instant::now() + left,
            budget,
        }
    }

    /// Shorten the deadline so at most `limit` remains from now.
    #[must_use]
    pub fn capped(self, limit: Duration) -> Self {
        Self {
            deadline: self.deadline.min(Instant::now() + limit),
            budget: self.budget.min(limit),
        }
    }

    /// Monotonic instant the call must finish by.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Total budget the work was given, for error reporting.
    #[must_use]
    pub const fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left before the deadline, zero once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// True once the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// The failure a fetcher returns when it runs out of budget.
    #[must_use]
    pub fn deadline_exceeded(&self) -> FetchError {
        FetchError::DeadlineExceeded {
            after_ms: u64::try_from(self.budget.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// A user-initiated change to a device, produced by a form save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    /// Device the change targets.
    pub subject: SubjectId,
    /// The data kind whose cached view the change invalidates.
    pub kind: DataKind,
    /// Field name to new value, as typed by the user.
    pub changes: BTreeMap<String, String>,
}

impl Mutation {
    /// Empty change set for `subject`/`kind`.
    #[must_use]
    pub fn new(subject: SubjectId, kind: DataKind) -> Self {
        Self {
            subject,
            kind,
            changes: BTreeMap::new(),
        }
    }

    /// Add one field assignment.
    #[must_use]
    pub fn with_change(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.changes.insert(field.into(), value.into());
        self
    }

    /// Cache key whose entry is invalidated once the mutation lands.
    #[must_use]
    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.subject.clone(), self.kind)
    }
}

/// Device data source. Implementations must be shareable across worker threads.
pub trait Fetcher: Send + Sync {
    /// Fetch the current payload for `(subject, kind)` within `ctx`'s deadline.
    fn fetch(&self, ctx: &FetchContext, subject: &SubjectId, kind: DataKind) -> FetchResult;

    /// Apply a mutation to the device. Read-only fetchers keep the default.
    fn mutate(&self, ctx: &FetchContext, mutation: &Mutation) -> Result<(), FetchError> {
        let _ = (ctx, mutation);
        Err(FetchError::Unsupported {
            operation: "mutate",
        })
    }
}
