//! Per-panel state machine over the cache keys a panel owns.
//!
//! A panel never holds the store or the coordinator. Every operation that
//! needs them takes a `&mut CacheContext` from the event loop, which is the
//! only owner. Panel phase is derived from per-key slots:
//!
//! | slots                                   | phase        |
//! |-----------------------------------------|--------------|
//! | some payload shown, fetch outstanding   | `Refreshing` |
//! | some payload shown, nothing outstanding | `Ready`      |
//! | nothing shown, fetch outstanding        | `Loading`    |
//! | nothing shown, a load failed            | `Errored`    |
//! | otherwise                               | `Idle`       |

#![allow(missing_docs)]

use std::fmt;

use chrono::{DateTime, Utc};

use crate::cache::entry::Payload;
use crate::cache::key::{CacheKey, DataKind, SubjectId};
use crate::cache::staleness::StalenessPolicy;
use crate::cache::store::CacheStore;
use crate::core::config::Config;
use crate::core::errors::FetchError;
use crate::refresh::coordinator::{CacheEvent, FetchRequest, RefreshCoordinator, Route};
use crate::refresh::fetcher::Mutation;
use crate::tui::form::FormHandle;
use crate::tui::scroller::ViewportScroller;

// ──────────────────── shared context ────────────────────

/// The event loop's cache state, lent to panels one call at a time.
#[derive(Debug)]
pub struct CacheContext {
    pub store: CacheStore,
    pub coordinator: RefreshCoordinator,
}

impl CacheContext {
    #[must_use]
    pub fn new(store: CacheStore, coordinator: RefreshCoordinator) -> Self {
        Self { store, coordinator }
    }

    /// Context with TTLs and deadlines from `config` over `store`.
    #[must_use]
    pub fn from_config(config: &Config, store: CacheStore) -> Self {
        let policy = StalenessPolicy::from_config(&config.cache);
        Self::new(store, RefreshCoordinator::new(policy, &config.fetch))
    }
}

// ──────────────────── identity and phase ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PanelId(pub u32);

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PanelPhase {
    #[default]
    Idle,
    /// Nothing to show yet; a blocking indicator is drawn.
    Loading,
    Ready,
    /// Data is shown while a background refresh is outstanding.
    Refreshing,
    Errored,
}

impl PanelPhase {
    /// Whether the panel has data on screen.
    #[must_use]
    pub const fn shows_data(self) -> bool {
        matches!(self, Self::Ready | Self::Refreshing)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Refreshing => "refreshing",
            Self::Errored => "error",
        }
    }
}

/// What a panel displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelSource {
    /// One data kind of one device.
    Device { subject: SubjectId, kind: DataKind },
    /// One data kind across many devices, one row per device. Loaded through
    /// the bounded fan-out.
    Fleet {
        subjects: Vec<SubjectId>,
        kind: DataKind,
    },
}

impl PanelSource {
    #[must_use]
    pub fn keys(&self) -> Vec<CacheKey> {
        match self {
            Self::Device { subject, kind } => vec![CacheKey::new(subject.clone(), *kind)],
            Self::Fleet { subjects, kind } => subjects
                .iter()
                .map(|subject| CacheKey::new(subject.clone(), *kind))
                .collect(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> DataKind {
        match self {
            Self::Device { kind, .. } | Self::Fleet { kind, .. } => *kind,
        }
    }

    #[must_use]
    pub const fn is_fleet(&self) -> bool {
        matches!(self, Self::Fleet { .. })
    }

    #[must_use]
    pub const fn route(&self) -> Route {
        match self {
            Self::Device { .. } => Route::Single,
            Self::Fleet { .. } => Route::FanOut,
        }
    }
}

/// Side effect of applying a cache event, for the model to log or announce.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelEffect {
    Updated,
    /// Nothing was showing and the load failed.
    LoadFailed { key: CacheKey, error: FetchError },
    /// A stale payload is showing and its refresh failed. The payload stays.
    RefreshFailed { key: CacheKey, error: FetchError },
    /// One row of a fleet panel could not be fetched.
    Unreachable { key: CacheKey, error: FetchError },
}

/// Fetches and invalidations produced by a post-mutation reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reload {
    pub invalidated: Vec<CacheKey>,
    pub requests: Vec<FetchRequest>,
}

// ──────────────────── slots ────────────────────

#[derive(Debug, Clone)]
struct KeySlot {
    key: CacheKey,
    payload: Option<Payload>,
    cached_at: Option<DateTime<Utc>>,
    pending: bool,
    load_error: Option<FetchError>,
    refresh_error: Option<FetchError>,
}

impl KeySlot {
    const fn new(key: CacheKey) -> Self {
        Self {
            key,
            payload: None,
            cached_at: None,
            pending: false,
            load_error: None,
            refresh_error: None,
        }
    }

    fn show(&mut self, payload: Payload, cached_at: DateTime<Utc>) {
        self.payload = Some(payload);
        self.cached_at = Some(cached_at);
        self.load_error = None;
    }

    fn clear(&mut self) {
        self.payload = None;
        self.cached_at = None;
        self.refresh_error = None;
    }
}

// ──────────────────── controller ────────────────────

pub struct PanelController {
    id: PanelId,
    title: String,
    source: PanelSource,
    slots: Vec<KeySlot>,
    scroller: ViewportScroller,
    form: Option<Box<dyn FormHandle>>,
    mutation_pending: bool,
}

impl fmt::Debug for PanelController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanelController")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("phase", &self.phase())
            .field("keys", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl PanelController {
    #[must_use]
    pub fn new(id: PanelId, title: impl Into<String>, source: PanelSource, visible_rows: usize) -> Self {
        let slots = source.keys().into_iter().map(KeySlot::new).collect();
        Self {
            id,
            title: title.into(),
            source,
            slots,
            scroller: ViewportScroller::new(visible_rows),
            form: None,
            mutation_pending: false,
        }
    }

    #[must_use]
    pub fn with_form(mut self, form: Box<dyn FormHandle>) -> Self {
        self.form = Some(form);
        self
    }

    #[must_use]
    pub const fn id(&self) -> PanelId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub const fn source(&self) -> &PanelSource {
        &self.source
    }

    #[must_use]
    pub fn keys(&self) -> Vec<CacheKey> {
        self.slots.iter().map(|s| s.key.clone()).collect()
    }

    #[must_use]
    pub fn owns(&self, key: &CacheKey) -> bool {
        self.slots.iter().any(|s| &s.key == key)
    }

    #[must_use]
    pub const fn scroller(&self) -> &ViewportScroller {
        &self.scroller
    }

    pub fn scroller_mut(&mut self) -> &mut ViewportScroller {
        &mut self.scroller
    }

    #[must_use]
    pub fn form(&self) -> Option<&dyn FormHandle> {
        self.form.as_deref()
    }

    pub fn form_mut(&mut self) -> Option<&mut (dyn FormHandle + 'static)> {
        self.form.as_deref_mut()
    }

    #[must_use]
    pub const fn mutation_pending(&self) -> bool {
        self.mutation_pending
    }

    #[must_use]
    pub fn phase(&self) -> PanelPhase {
        let shown = self.slots.iter().any(|s| s.payload.is_some());
        let pending = self.slots.iter().any(|s| s.pending);
        match (shown, pending) {
            (true, true) => PanelPhase::Refreshing,
            (true, false) => PanelPhase::Ready,
            (false, true) => PanelPhase::Loading,
            (false, false) if self.slots.iter().any(|s| s.load_error.is_some()) => {
                PanelPhase::Errored
            }
            (false, false) => PanelPhase::Idle,
        }
    }

    /// The blocking error shown while `Errored`.
    #[must_use]
    pub fn load_error(&self) -> Option<&FetchError> {
        if self.phase() != PanelPhase::Errored {
            return None;
        }
        self.slots.iter().find_map(|s| s.load_error.as_ref())
    }

    /// Most recent failed background refresh behind displayed data.
    #[must_use]
    pub fn refresh_error(&self) -> Option<&FetchError> {
        self.slots.iter().find_map(|s| s.refresh_error.as_ref())
    }

    /// The payload a device panel displays.
    #[must_use]
    pub fn payload(&self) -> Option<&Payload> {
        match self.source {
            PanelSource::Device { .. } => self.slots.first().and_then(|s| s.payload.as_ref()),
            PanelSource::Fleet { .. } => None,
        }
    }

    /// Rows the scroller moves over.
    #[must_use]
    pub fn item_count(&self) -> usize {
        match self.source {
            PanelSource::Device { .. } => self.payload().map_or(0, Payload::item_count),
            PanelSource::Fleet { .. } => {
                let settled = self
                    .slots
                    .iter()
                    .any(|s| s.payload.is_some() || s.load_error.is_some());
                if settled { self.slots.len() } else { 0 }
            }
        }
    }

    /// Rows inside the scroller window, rendered as text.
    #[must_use]
    pub fn visible_rows(&self) -> Vec<String> {
        let (start, end) = self.scroller.visible_range();
        match self.source {
            PanelSource::Device { .. } => self
                .payload()
                .map(|p| p.rows(start, end))
                .unwrap_or_default(),
            PanelSource::Fleet { .. } => self
                .slots
                .get(start..end)
                .unwrap_or_default()
                .iter()
                .map(fleet_row)
                .collect(),
        }
    }

    // ── transitions ──

    /// Enter the panel: read every key through the cache.
    pub fn enter(&mut self, ctx: &mut CacheContext, now: DateTime<Utc>) -> Vec<FetchRequest> {
        self.load_slots(ctx, now, |_, _| true)
    }

    /// Periodic revalidation. Fresh keys are no-ops, stale keys refresh in
    /// the background. A key whose load failed waits for an explicit
    /// refresh, unless the store has meanwhile gained an entry for it.
    pub fn revalidate(&mut self, ctx: &mut CacheContext, now: DateTime<Utc>) -> Vec<FetchRequest> {
        self.load_slots(ctx, now, |slot, store| {
            slot.payload.is_some() || slot.load_error.is_none() || store.get(&slot.key).is_some()
        })
    }

    /// Show a cached entry that arrived outside any ticket this panel waits
    /// on, in slots that have nothing to show and nothing pending. Returns
    /// whether anything changed.
    pub fn adopt(&mut self, key: &CacheKey, payload: &Payload, cached_at: DateTime<Utc>) -> bool {
        let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| &s.key == key && s.payload.is_none() && !s.pending)
        else {
            return false;
        };
        slot.show(payload.clone(), cached_at);
        self.after_data_change();
        true
    }

    /// User-requested refresh of every key, keeping displayed data.
    pub fn force_refresh(&mut self, ctx: &mut CacheContext, now: DateTime<Utc>) -> Vec<FetchRequest> {
        let route = self.source.route();
        let mut requests = Vec::new();
        for slot in &mut self.slots {
            if let Some(request) =
                ctx.coordinator
                    .request_refresh(&ctx.store, &slot.key, route, now)
            {
                requests.push(request);
            }
            slot.pending = ctx.coordinator.is_outstanding(&slot.key);
            if slot.pending {
                slot.load_error = None;
            }
        }
        requests
    }

    /// Point a device panel at another subject. Results still in flight for
    /// the old subject are ignored when they arrive.
    pub fn select_subject(
        &mut self,
        subject: SubjectId,
        ctx: &mut CacheContext,
        now: DateTime<Utc>,
    ) -> Vec<FetchRequest> {
        let PanelSource::Device { kind, .. } = self.source else {
            return Vec::new();
        };
        self.source = PanelSource::Device {
            subject: subject.clone(),
            kind,
        };
        self.slots = self.source.keys().into_iter().map(KeySlot::new).collect();
        self.scroller.reset();
        if let Some(form) = self.form.as_mut() {
            form.set_subject(subject);
        }
        self.mutation_pending = false;
        self.enter(ctx, now)
    }

    /// Apply a coordinator event. `None` if the panel does not own the key.
    pub fn apply(&mut self, event: &CacheEvent) -> Option<PanelEffect> {
        let is_fleet = self.source.is_fleet();
        let slot = self.slots.iter_mut().find(|s| &s.key == event.key())?;
        let effect = match event {
            CacheEvent::CacheHit {
                payload,
                cached_at,
                ..
            } => {
                slot.show(payload.clone(), *cached_at);
                PanelEffect::Updated
            }
            CacheEvent::CacheMiss { .. } => {
                slot.clear();
                PanelEffect::Updated
            }
            CacheEvent::LoadComplete { key, result } | CacheEvent::RefreshComplete { key, result } => {
                slot.pending = false;
                match result {
                    Ok((payload, cached_at)) => {
                        slot.show(payload.clone(), *cached_at);
                        slot.refresh_error = None;
                        PanelEffect::Updated
                    }
                    Err(error) if slot.payload.is_some() => {
                        slot.refresh_error = Some(error.clone());
                        PanelEffect::RefreshFailed {
                            key: key.clone(),
                            error: error.clone(),
                        }
                    }
                    Err(error) => {
                        slot.load_error = Some(error.clone());
                        if is_fleet {
                            PanelEffect::Unreachable {
                                key: key.clone(),
                                error: error.clone(),
                            }
                        } else {
                            PanelEffect::LoadFailed {
                                key: key.clone(),
                                error: error.clone(),
                            }
                        }
                    }
                }
            }
        };
        self.after_data_change();
        Some(effect)
    }

    /// Mark a save as in flight.
    pub fn begin_mutation(&mut self) {
        self.mutation_pending = true;
    }

    /// The device accepted a mutation: invalidate, drop to `Loading`, reload.
    pub fn on_mutation_applied(
        &mut self,
        mutation: &Mutation,
        ctx: &mut CacheContext,
        now: DateTime<Utc>,
    ) -> Reload {
        self.mutation_pending = false;
        let mut invalidated = self.keys();
        let mutated = mutation.key();
        if !invalidated.contains(&mutated) {
            invalidated.push(mutated);
        }
        for key in &invalidated {
            ctx.coordinator.invalidate(&mut ctx.store, key);
        }
        for slot in &mut self.slots {
            slot.clear();
            slot.load_error = None;
        }
        if let Some(form) = self.form.as_mut() {
            form.revert();
        }
        let requests = self.enter(ctx, now);
        Reload {
            invalidated,
            requests,
        }
    }

    pub fn on_mutation_failed(&mut self) {
        self.mutation_pending = false;
    }

    /// Drop this panel's entries from the cache, except keys another panel
    /// still displays. Returns how many entries were removed.
    pub fn teardown<S>(&self, ctx: &mut CacheContext, still_displayed: S) -> usize
    where
        S: Fn(&CacheKey) -> bool,
    {
        self.slots
            .iter()
            .filter(|slot| !still_displayed(&slot.key))
            .filter(|slot| ctx.coordinator.invalidate(&mut ctx.store, &slot.key))
            .count()
    }

    fn load_slots<P>(&mut self, ctx: &mut CacheContext, now: DateTime<Utc>, eligible: P) -> Vec<FetchRequest>
    where
        P: Fn(&KeySlot, &CacheStore) -> bool,
    {
        let route = self.source.route();
        let mut requests = Vec::new();
        for slot in &mut self.slots {
            if !eligible(slot, &ctx.store) {
                continue;
            }
            let decision = ctx
                .coordinator
                .request_load_via(&ctx.store, &slot.key, route, now);
            match decision.event {
                CacheEvent::CacheHit {
                    payload, cached_at, ..
                } => slot.show(payload, cached_at),
                CacheEvent::CacheMiss { .. } => slot.clear(),
                CacheEvent::LoadComplete { .. } | CacheEvent::RefreshComplete { .. } => {}
            }
            slot.pending = ctx.coordinator.is_outstanding(&slot.key);
            if slot.pending {
                slot.load_error = None;
            }
            requests.extend(decision.dispatch);
        }
        self.after_data_change();
        requests
    }

    fn after_data_change(&mut self) {
        self.scroller.set_item_count(self.item_count());
        let payload = self.payload().cloned();
        if let (Some(form), Some(payload)) = (self.form.as_mut(), payload)
            && !form.is_dirty()
            && form.kind() == self.source.kind()
        {
            form.load_from(&payload);
        }
    }
}

fn fleet_row(slot: &KeySlot) -> String {
    let subject = &slot.key.subject;
    match (&slot.payload, &slot.load_error) {
        (Some(payload), _) => format!("{subject}: {}", payload.rows(0, 3).join(", ")),
        (None, Some(error)) => format!("{subject}: unreachable ({})", error.label()),
        (None, None) => format!("{subject}: ..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::FetchConfig;
    use crate::refresh::coordinator::{CompletionOutcome, FetchCompletion};
    use chrono::TimeZone;
    use serde_json::json;
    use std::time::Duration;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn ctx() -> CacheContext {
        CacheContext::new(
            CacheStore::new(),
            RefreshCoordinator::new(
                StalenessPolicy::new(Duration::from_secs(30)),
                &FetchConfig::default(),
            ),
        )
    }

    fn device(kind: DataKind) -> PanelController {
        PanelController::new(
            PanelId(1),
            "Inputs",
            PanelSource::Device {
                subject: SubjectId::new("dev1"),
                kind,
            },
            5,
        )
    }

    fn deliver(
        panel: &mut PanelController,
        ctx: &mut CacheContext,
        request: &FetchRequest,
        result: crate::refresh::fetcher::FetchResult,
        now: DateTime<Utc>,
    ) -> Option<PanelEffect> {
        let completion = FetchCompletion::for_request(request, result);
        match ctx.coordinator.complete(&mut ctx.store, completion, now) {
            CompletionOutcome::Applied(event) => panel.apply(&event),
            CompletionOutcome::Discarded { .. } => None,
        }
    }

    #[test]
    fn miss_goes_loading_then_ready() {
        let mut ctx = ctx();
        let mut panel = device(DataKind::Inputs);
        let requests = panel.enter(&mut ctx, t(0));
        assert_eq!(requests.len(), 1);
        assert_eq!(panel.phase(), PanelPhase::Loading);

        let effect = deliver(
            &mut panel,
            &mut ctx,
            &requests[0],
            Ok(Payload::new(json!(["a", "b", "c"]))),
            t(1),
        );
        assert_eq!(effect, Some(PanelEffect::Updated));
        assert_eq!(panel.phase(), PanelPhase::Ready);
        assert_eq!(panel.scroller().item_count(), 3);
        assert_eq!(panel.visible_rows(), vec!["a", "b", "c"]);
    }

    #[test]
    fn miss_then_fail_is_errored_and_not_auto_retried() {
        let mut ctx = ctx();
        let mut panel = device(DataKind::Inputs);
        let requests = panel.enter(&mut ctx, t(0));
        let err = FetchError::Unreachable {
            details: "down".into(),
        };
        let effect = deliver(&mut panel, &mut ctx, &requests[0], Err(err.clone()), t(1));
        assert!(matches!(effect, Some(PanelEffect::LoadFailed { .. })));
        assert_eq!(panel.phase(), PanelPhase::Errored);
        assert_eq!(panel.load_error(), Some(&err));
        assert!(panel.revalidate(&mut ctx, t(2)).is_empty());
        assert_eq!(panel.phase(), PanelPhase::Errored);

        let retry = panel.force_refresh(&mut ctx, t(3));
        assert_eq!(retry.len(), 1);
        assert_eq!(panel.phase(), PanelPhase::Loading);
    }

    #[test]
    fn errored_slot_recovers_once_store_has_the_entry() {
        let mut ctx = ctx();
        let mut panel = device(DataKind::Inputs);
        let requests = panel.enter(&mut ctx, t(0));
        for expired in ctx.coordinator.expire_overdue(t(60)) {
            panel.apply(&expired.event);
        }
        assert_eq!(panel.phase(), PanelPhase::Errored);

        let late = deliver(
            &mut panel,
            &mut ctx,
            &requests[0],
            Ok(Payload::new(json!(["late"]))),
            t(61),
        );
        assert_eq!(late, None);
        assert_eq!(panel.phase(), PanelPhase::Errored);

        assert!(panel.revalidate(&mut ctx, t(62)).is_empty());
        assert_eq!(panel.phase(), PanelPhase::Ready);
        assert_eq!(panel.visible_rows(), vec!["late"]);
    }

    #[test]
    fn adopt_fills_only_idle_empty_slots() {
        let mut ctx = ctx();
        let key = CacheKey::new("dev1", DataKind::Inputs);
        let payload = Payload::new(json!(["x", "y"]));

        let mut waiting = device(DataKind::Inputs);
        waiting.enter(&mut ctx, t(0));
        assert!(!waiting.adopt(&key, &payload, t(1)));
        assert_eq!(waiting.phase(), PanelPhase::Loading);

        let mut errored = device(DataKind::Inputs);
        errored.apply(&CacheEvent::LoadComplete {
            key: key.clone(),
            result: Err(FetchError::DeadlineExceeded { after_ms: 5 }),
        });
        assert_eq!(errored.phase(), PanelPhase::Errored);
        assert!(errored.adopt(&key, &payload, t(1)));
        assert_eq!(errored.phase(), PanelPhase::Ready);
        assert_eq!(errored.scroller().item_count(), 2);
        assert!(!errored.adopt(&key, &payload, t(2)));
    }

    #[test]
    fn stale_hit_shows_data_while_refreshing() {
        let mut ctx = ctx();
        let key = CacheKey::new("dev1", DataKind::Inputs);
        ctx.store.put(key, Payload::new(json!(["old"])), t(0));
        let mut panel = device(DataKind::Inputs);
        let requests = panel.enter(&mut ctx, t(60));
        assert_eq!(requests.len(), 1);
        assert_eq!(panel.phase(), PanelPhase::Refreshing);
        assert!(panel.phase().shows_data());
        assert_eq!(panel.visible_rows(), vec!["old"]);
    }

    #[test]
    fn refresh_failure_keeps_stale_payload() {
        let mut ctx = ctx();
        let key = CacheKey::new("dev1", DataKind::Inputs);
        ctx.store.put(key, Payload::new(json!(["old"])), t(0));
        let mut panel = device(DataKind::Inputs);
        let requests = panel.enter(&mut ctx, t(60));
        let effect = deliver(
            &mut panel,
            &mut ctx,
            &requests[0],
            Err(FetchError::DeadlineExceeded { after_ms: 5000 }),
            t(61),
        );
        assert!(matches!(effect, Some(PanelEffect::RefreshFailed { .. })));
        assert_eq!(panel.phase(), PanelPhase::Ready);
        assert_eq!(panel.payload(), Some(&Payload::new(json!(["old"]))));
        assert_eq!(panel.refresh_error().map(FetchError::label), Some("timeout"));
    }

    #[test]
    fn refresh_keeps_cursor_when_list_still_long_enough() {
        let mut ctx = ctx();
        let key = CacheKey::new("dev1", DataKind::Scenes);
        let rows: Vec<String> = (0..20).map(|i| format!("s{i}")).collect();
        ctx.store.put(key, Payload::new(json!(rows)), t(0));
        let mut panel = device(DataKind::Scenes);
        let requests = panel.enter(&mut ctx, t(60));
        for _ in 0..7 {
            panel.scroller_mut().cursor_down();
        }
        let rows: Vec<String> = (0..25).map(|i| format!("n{i}")).collect();
        deliver(&mut panel, &mut ctx, &requests[0], Ok(Payload::new(json!(rows))), t(61));
        assert_eq!(panel.scroller().cursor(), 7);
        assert_eq!(panel.scroller().item_count(), 25);
    }

    #[test]
    fn changing_subject_ignores_old_results() {
        let mut ctx = ctx();
        let mut panel = device(DataKind::Inputs);
        let old = panel.enter(&mut ctx, t(0));
        let new = panel.select_subject(SubjectId::new("dev2"), &mut ctx, t(1));
        assert_eq!(new.len(), 1);
        let effect = deliver(&mut panel, &mut ctx, &old[0], Ok(Payload::new(json!([1]))), t(2));
        assert!(effect.is_none());
        assert_eq!(panel.phase(), PanelPhase::Loading);
        assert!(ctx.store.get(&CacheKey::new("dev1", DataKind::Inputs)).is_some());
    }

    #[test]
    fn mutation_invalidates_and_reloads() {
        let mut ctx = ctx();
        let key = CacheKey::new("dev1", DataKind::Config);
        ctx.store.put(key.clone(), Payload::new(json!({"name": "a"})), t(0));
        let mut panel = device(DataKind::Config);
        assert!(panel.enter(&mut ctx, t(1)).is_empty());
        assert_eq!(panel.phase(), PanelPhase::Ready);

        panel.begin_mutation();
        let mutation = Mutation::new(SubjectId::new("dev1"), DataKind::Config).with_change("name", "b");
        let reload = panel.on_mutation_applied(&mutation, &mut ctx, t(2));
        assert_eq!(reload.invalidated, vec![key.clone()]);
        assert_eq!(reload.requests.len(), 1);
        assert_eq!(panel.phase(), PanelPhase::Loading);
        assert!(!panel.mutation_pending());
        assert!(ctx.store.get(&key).is_none());
    }

    #[test]
    fn fleet_partial_failure_stays_ready_with_unreachable_row() {
        let mut ctx = ctx();
        let mut panel = PanelController::new(
            PanelId(2),
            "Energy",
            PanelSource::Fleet {
                subjects: vec![SubjectId::new("a"), SubjectId::new("b")],
                kind: DataKind::Energy,
            },
            5,
        );
        let requests = panel.enter(&mut ctx, t(0));
        assert_eq!(requests.len(), 2);
        assert_eq!(panel.phase(), PanelPhase::Loading);
        deliver(&mut panel, &mut ctx, &requests[0], Ok(Payload::new(json!({"power_w": 5}))), t(1));
        let effect = deliver(
            &mut panel,
            &mut ctx,
            &requests[1],
            Err(FetchError::DeadlineExceeded { after_ms: 100 }),
            t(1),
        );
        assert!(matches!(effect, Some(PanelEffect::Unreachable { .. })));
        assert_eq!(panel.phase(), PanelPhase::Ready);
        assert_eq!(
            panel.visible_rows(),
            vec!["a: power_w: 5".to_string(), "b: unreachable (timeout)".to_string()]
        );
    }

    #[test]
    fn fleet_all_failed_is_errored() {
        let mut ctx = ctx();
        let mut panel = PanelController::new(
            PanelId(3),
            "Status",
            PanelSource::Fleet {
                subjects: vec![SubjectId::new("a")],
                kind: DataKind::Status,
            },
            5,
        );
        let requests = panel.enter(&mut ctx, t(0));
        deliver(
            &mut panel,
            &mut ctx,
            &requests[0],
            Err(FetchError::Unreachable { details: "x".into() }),
            t(1),
        );
        assert_eq!(panel.phase(), PanelPhase::Errored);
    }

    #[test]
    fn teardown_drops_owned_entries() {
        let mut ctx = ctx();
        ctx.store.put(CacheKey::new("dev1", DataKind::Inputs), Payload::new(json!([])), t(0));
        ctx.store.put(CacheKey::new("dev1", DataKind::Energy), Payload::new(json!({})), t(0));
        let panel = device(DataKind::Inputs);
        let key = CacheKey::new("dev1", DataKind::Inputs);
        assert_eq!(panel.teardown(&mut ctx, |k| *k == key), 0);
        assert_eq!(panel.teardown(&mut ctx, |_| false), 1);
        assert_eq!(ctx.store.len(), 1);
    }
}
