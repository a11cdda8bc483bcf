//! Single-flight refresh coordination over the [`CacheStore`].
//!
//! The coordinator decides, per key, whether a read is a fresh hit, a stale
//! hit that needs a background refresh, or a miss that needs a blocking load.
//! It tracks at most one outstanding [`RefreshTicket`] per key; a second
//! request while a ticket is outstanding dispatches nothing and is satisfied
//! by the first ticket's completion.
//!
//! Like the store, the coordinator is owned by the event-loop thread. It never
//! talks to a [`Fetcher`](super::fetcher::Fetcher) directly: it hands out
//! [`FetchRequest`]s for the runtime to dispatch and consumes the
//! [`FetchCompletion`]s that come back.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::fetcher::{FetchContext, FetchResult};
use crate::cache::entry::Payload;
use crate::cache::key::CacheKey;
use crate::cache::staleness::StalenessPolicy;
use crate::cache::store::CacheStore;
use crate::core::config::FetchConfig;
use crate::core::errors::FetchError;

// ──────────────────── tickets ────────────────────

/// Why a ticket was opened. A load has nothing to show until it completes;
/// a refresh runs behind a displayed (stale) payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketMode {
    /// Nothing is displayed yet.
    Load,
    /// A stale payload stays on screen meanwhile.
    Refresh,
}

/// How the fetch for a ticket is dispatched. Determines the watchdog budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Route {
    /// One fetch on the worker pool.
    #[default]
    Single,
    /// One leg of a bounded-concurrency aggregate fetch.
    FanOut,
}

/// Bookkeeping for one outstanding fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTicket {
    /// Key being fetched.
    pub key: CacheKey,
    /// When the ticket was opened.
    pub started_at: DateTime<Utc>,
    /// Wall-clock deadline shared with the fetch this ticket dispatched.
    pub deadline_at: DateTime<Utc>,
    /// Matches the completion to this ticket; bumps on every open.
    pub generation: u64,
    /// Load or refresh.
    pub mode: TicketMode,
    /// Dispatch route the budget was chosen from.
    pub route: Route,
}

/// Work order for the runtime: fetch `key` and report back with `generation`.
///
/// The deadline is fixed when the ticket opens, so a request that waits in a
/// queue spends its budget there. The fetch and the watchdog agree on when
/// it is over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Key to fetch.
    pub key: CacheKey,
    /// Generation of the ticket that issued this request.
    pub generation: u64,
    /// Mode of the issuing ticket.
    pub mode: TicketMode,
    /// Wall-clock instant after which the fetch is pointless.
    pub deadline_at: DateTime<Utc>,
    /// Full budget the deadline was derived from.
    pub budget: Duration,
}

impl FetchRequest {
    /// Call context for this request, ending at its ticket's deadline.
    #[must_use]
    pub fn context(&self) -> FetchContext {
        FetchContext::until(self.deadline_at, self.budget)
    }
}

/// Result of a dispatched [`FetchRequest`], delivered back to the event loop.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchCompletion {
    /// Key that was fetched.
    pub key: CacheKey,
    /// Generation copied from the request.
    pub generation: u64,
    /// Mode of the ticket it answers.
    pub mode: TicketMode,
    /// Payload or failure reported by the fetcher.
    pub result: FetchResult,
}

impl FetchCompletion {
    /// Wrap `result` with the identity of `request`.
    #[must_use]
    pub fn for_request(request: &FetchRequest, result: FetchResult) -> Self {
        Self {
            key: request.key.clone(),
            generation: request.generation,
            mode: request.mode,
            result,
        }
    }
}

// ──────────────────── events ────────────────────

/// Cache-level events consumed by panel controllers.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// An entry exists. `needs_refresh` means it is stale and a background
    /// refresh is (or already was) in flight.
    CacheHit {
        /// Key that was read.
        key: CacheKey,
        /// Cached payload, possibly stale.
        payload: Payload,
        /// When the payload was fetched.
        cached_at: DateTime<Utc>,
        /// Stale, with a refresh in flight.
        needs_refresh: bool,
    },
    /// No entry exists; a blocking load is (or already was) in flight.
    CacheMiss {
        /// Key that was read.
        key: CacheKey,
    },
    /// A load ticket finished.
    LoadComplete {
        /// Key that was loaded.
        key: CacheKey,
        /// Fetched payload and its timestamp, or the failure.
        result: std::result::Result<(Payload, DateTime<Utc>), FetchError>,
    },
    /// A refresh ticket finished.
    RefreshComplete {
        /// Key that was refreshed.
        key: CacheKey,
        /// Fetched payload and its timestamp, or the failure.
        result: std::result::Result<(Payload, DateTime<Utc>), FetchError>,
    },
}

impl CacheEvent {
    /// Key the event is about.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        match self {
            Self::CacheHit { key, .. }
            | Self::CacheMiss { key }
            | Self::LoadComplete { key, .. }
            | Self::RefreshComplete { key, .. } => key,
        }
    }

    fn completion(
        mode: TicketMode,
        key: CacheKey,
        result: std::result::Result<(Payload, DateTime<Utc>), FetchError>,
    ) -> Self {
        match mode {
            TicketMode::Load => Self::LoadComplete { key, result },
            TicketMode::Refresh => Self::RefreshComplete { key, result },
        }
    }
}

/// What [`RefreshCoordinator::request_load`] decided.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadDecision {
    /// Emitted immediately, before any fetch resolves.
    pub event: CacheEvent,
    /// `Some` only when a new ticket was opened.
    pub dispatch: Option<FetchRequest>,
}

/// What happened to a completion handed to [`RefreshCoordinator::complete`].
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// The completion closed the outstanding ticket; controllers should apply it.
    Applied(CacheEvent),
    /// No matching ticket (expired, or superseded). A successful payload was
    /// still written to the store; controllers must not react.
    Discarded {
        /// Key the completion was for.
        key: CacheKey,
        /// Generation the completion carried.
        generation: u64,
    },
}

/// A ticket closed by the watchdog, with the failure event it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiredTicket {
    /// The ticket that timed out.
    pub ticket: RefreshTicket,
    /// Failure event to deliver in place of a completion.
    pub event: CacheEvent,
}

// ──────────────────── coordinator ────────────────────

/// Per-key single-flight state machine: `NoTicket <-> TicketOutstanding`.
#[derive(Debug)]
pub struct RefreshCoordinator {
    policy: StalenessPolicy,
    tickets: HashMap<CacheKey, RefreshTicket>,
    next_generation: u64,
    deadline: Duration,
    fanout_deadline: Duration,
    grace: Duration,
}

impl RefreshCoordinator {
    /// Empty coordinator using the deadlines from `fetch`.
    #[must_use]
    pub fn new(policy: StalenessPolicy, fetch: &FetchConfig) -> Self {
        Self {
            policy,
            tickets: HashMap::new(),
            next_generation: 1,
            deadline: fetch.deadline(),
            fanout_deadline: fetch.fanout_deadline(),
            grace: fetch.ticket_grace(),
        }
    }

    /// Staleness rules used to classify hits.
    #[must_use]
    pub const fn policy(&self) -> &StalenessPolicy {
        &self.policy
    }

    /// Per-fetch deadline handed to fetchers.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Outstanding ticket for `key`, if any.
    #[must_use]
    pub fn ticket(&self, key: &CacheKey) -> Option<&RefreshTicket> {
        self.tickets.get(key)
    }

    /// Whether a fetch for `key` is in flight.
    #[must_use]
    pub fn is_outstanding(&self, key: &CacheKey) -> bool {
        self.tickets.contains_key(key)
    }

    /// Number of outstanding tickets.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.tickets.len()
    }

    /// Read `key` through the cache, opening a ticket if a fetch is needed.
    pub fn request_load(
        &mut self,
        store: &CacheStore,
        key: &CacheKey,
        now: DateTime<Utc>,
    ) -> LoadDecision {
        self.request_load_via(store, key, Route::Single, now)
    }

    /// [`request_load`](Self::request_load) with an explicit dispatch route.
    pub fn request_load_via(
        &mut self,
        store: &CacheStore,
        key: &CacheKey,
        route: Route,
        now: DateTime<Utc>,
    ) -> LoadDecision {
        match store.get(key) {
            None => LoadDecision {
                event: CacheEvent::CacheMiss { key: key.clone() },
                dispatch: self.open_ticket(key, TicketMode::Load, route, now),
            },
            Some(entry) => {
                let needs_refresh = self.policy.is_stale(entry, now);
                let dispatch = if needs_refresh {
                    self.open_ticket(key, TicketMode::Refresh, route, now)
                } else {
                    None
                };
                LoadDecision {
                    event: CacheEvent::CacheHit {
                        key: key.clone(),
                        payload: entry.payload.clone(),
                        cached_at: entry.cached_at,
                        needs_refresh,
                    },
                    dispatch,
                }
            }
        }
    }

    /// Explicit refresh regardless of staleness. Single-flight still applies.
    pub fn request_refresh(
        &mut self,
        store: &CacheStore,
        key: &CacheKey,
        route: Route,
        now: DateTime<Utc>,
    ) -> Option<FetchRequest> {
        let mode = if store.get(key).is_some() {
            TicketMode::Refresh
        } else {
            TicketMode::Load
        };
        self.open_ticket(key, mode, route, now)
    }

    /// Drop the cached entry. Outstanding tickets are left alone; their
    /// result still lands in the store when it arrives.
    pub fn invalidate(&mut self, store: &mut CacheStore, key: &CacheKey) -> bool {
        store.invalidate(key)
    }

    /// Close the ticket matching `completion` and write a successful payload.
    pub fn complete(
        &mut self,
        store: &mut CacheStore,
        completion: FetchCompletion,
        now: DateTime<Utc>,
    ) -> CompletionOutcome {
        let FetchCompletion {
            key,
            generation,
            mode: _,
            result,
        } = completion;

        let written = result.map(|payload| {
            let entry = store.put(key.clone(), payload, now);
            (entry.payload, entry.cached_at)
        });

        let current = self
            .tickets
            .get(&key)
            .is_some_and(|ticket| ticket.generation == generation);
        if !current {
            return CompletionOutcome::Discarded { key, generation };
        }

        match self.tickets.remove(&key) {
            Some(ticket) => {
                CompletionOutcome::Applied(CacheEvent::completion(ticket.mode, key, written))
            }
            None => CompletionOutcome::Discarded { key, generation },
        }
    }

    /// Expire tickets whose completion is overdue by more than the grace period.
    ///
    /// Fetchers are required to honor their deadline, so an overdue ticket
    /// means a lost completion. Expiring it lets a later request retry.
    pub fn expire_overdue(&mut self, now: DateTime<Utc>) -> Vec<ExpiredTicket> {
        let overdue: Vec<CacheKey> = self
            .tickets
            .values()
            .filter(|ticket| self.is_overdue(ticket, now))
            .map(|ticket| ticket.key.clone())
            .collect();

        let mut expired = Vec::with_capacity(overdue.len());
        for key in overdue {
            if let Some(ticket) = self.tickets.remove(&key) {
                let budget = self.budget_for(ticket.route);
                let error = FetchError::DeadlineExceeded {
                    after_ms: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
                };
                let event = CacheEvent::completion(ticket.mode, key, Err(error));
                expired.push(ExpiredTicket { ticket, event });
            }
        }
        expired.sort_by(|a, b| a.ticket.generation.cmp(&b.ticket.generation));
        expired
    }

    fn is_overdue(&self, ticket: &RefreshTicket, now: DateTime<Utc>) -> bool {
        (now - ticket.deadline_at)
            .to_std()
            .is_ok_and(|late| late > self.grace)
    }

    const fn budget_for(&self, route: Route) -> Duration {
        match route {
            Route::Single => self.deadline,
            Route::FanOut => self.fanout_deadline,
        }
    }

    fn open_ticket(
        &mut self,
        key: &CacheKey,
        mode: TicketMode,
        route: Route,
        now: DateTime<Utc>,
    ) -> Option<FetchRequest> {
        if self.tickets.contains_key(key) {
            return None;
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        let budget = self.budget_for(route);
        let deadline_at = chrono::Duration::from_std(budget)
            .ok()
            .and_then(|budget| now.checked_add_signed(budget))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.tickets.insert(
            key.clone(),
            RefreshTicket {
                key: key.clone(),
                started_at: now,
                deadline_at,
                generation,
                mode,
                route,
            },
        );
        Some(FetchRequest {
            key: key.clone(),
            generation,
            mode,
            deadline_at,
            budget,
        })
    }
}
