//! Property-based tests for dashboard invariants.
//!
//! Arbitrary operation sequences are driven through the scroller, the focus
//! ring, and the full `update()` reducer with a harness that plays the role of
//! the runtime: it records every fetch the reducer asks for and completes them
//! in arbitrary order, success or failure, possibly after their ticket expired.

use chrono::{DateTime, Duration, TimeZone, Utc};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use proptest::prelude::*;
use serde_json::json;

use super::focus::{FocusRing, Modal};
use super::model::{DashboardCmd, DashboardModel, DashboardMsg, MAX_NOTIFICATIONS, PanelSpec};
use super::panel::{CacheContext, PanelPhase, PanelSource};
use super::scroller::ViewportScroller;
use super::update::update;
use crate::cache::entry::Payload;
use crate::cache::key::{CacheKey, DataKind, SubjectId};
use crate::cache::store::CacheStore;
use crate::core::config::Config;
use crate::core::errors::FetchError;
use crate::refresh::coordinator::{FetchCompletion, FetchRequest};
use crate::refresh::fetcher::Mutation;
use crate::refresh::pool::MutationCompletion;

// ──────────────────── scroller ────────────────────

#[derive(Debug, Clone)]
enum ScrollOp {
    Down,
    Up,
    PageDown,
    PageUp,
    Start,
    End,
    SetItems(usize),
    SetRows(usize),
}

fn arb_scroll_op() -> impl Strategy<Value = ScrollOp> {
    prop_oneof![
        Just(ScrollOp::Down),
        Just(ScrollOp::Up),
        Just(ScrollOp::PageDown),
        Just(ScrollOp::PageUp),
        Just(ScrollOp::Start),
        Just(ScrollOp::End),
        (0usize..200).prop_map(ScrollOp::SetItems),
        (0usize..40).prop_map(ScrollOp::SetRows),
    ]
}

fn apply_scroll(scroller: &mut ViewportScroller, op: &ScrollOp) {
    match op {
        ScrollOp::Down => scroller.cursor_down(),
        ScrollOp::Up => scroller.cursor_up(),
        ScrollOp::PageDown => scroller.page_down(),
        ScrollOp::PageUp => scroller.page_up(),
        ScrollOp::Start => scroller.cursor_to_start(),
        ScrollOp::End => scroller.cursor_to_end(),
        ScrollOp::SetItems(n) => scroller.set_item_count(*n),
        ScrollOp::SetRows(n) => scroller.set_visible_rows(*n),
    }
}

fn assert_scroller_invariants(s: &ViewportScroller) {
    assert!(s.visible_rows() >= 1);
    if s.item_count() == 0 {
        assert_eq!(s.cursor(), 0);
        assert_eq!(s.offset(), 0);
    } else {
        assert!(s.cursor() < s.item_count(), "cursor {} >= items {}", s.cursor(), s.item_count());
        assert!(s.offset() <= s.cursor());
        assert!(s.cursor() < s.offset() + s.visible_rows());
    }
    assert!(s.offset() + s.visible_rows() <= s.item_count().max(s.visible_rows()));
}

// ──────────────────── reducer harness ────────────────────

#[derive(Debug, Clone)]
enum Step {
    Key(KeyCode),
    Tick,
    Advance(i64),
    Complete { pick: usize, ok: bool, rows: usize },
    FinishMutation { ok: bool },
    Open { subject: u8, kind: usize, editable: bool },
    OpenFleet { kind: usize },
    Close { pick: usize },
    Resize { rows: u16 },
    Invalidate { subject: u8, kind: usize },
}

fn arb_key_code() -> impl Strategy<Value = KeyCode> {
    prop_oneof![
        Just(KeyCode::Char('j')),
        Just(KeyCode::Char('k')),
        Just(KeyCode::Char('e')),
        Just(KeyCode::Char('r')),
        Just(KeyCode::Char('x')),
        Just(KeyCode::Char('y')),
        Just(KeyCode::Char('n')),
        Just(KeyCode::Char('?')),
        Just(KeyCode::Char('G')),
        Just(KeyCode::Char('g')),
        Just(KeyCode::Tab),
        Just(KeyCode::BackTab),
        Just(KeyCode::Enter),
        Just(KeyCode::Esc),
        Just(KeyCode::Backspace),
        Just(KeyCode::PageDown),
        Just(KeyCode::PageUp),
        Just(KeyCode::Up),
        Just(KeyCode::Down),
    ]
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => arb_key_code().prop_map(Step::Key),
        2 => Just(Step::Tick),
        2 => (1i64..40).prop_map(Step::Advance),
        4 => (0usize..16, any::<bool>(), 0usize..60)
            .prop_map(|(pick, ok, rows)| Step::Complete { pick, ok, rows }),
        1 => any::<bool>().prop_map(|ok| Step::FinishMutation { ok }),
        2 => (1u8..4, 0usize..DataKind::ALL.len(), any::<bool>())
            .prop_map(|(subject, kind, editable)| Step::Open { subject, kind, editable }),
        1 => (0usize..DataKind::ALL.len()).prop_map(|kind| Step::OpenFleet { kind }),
        1 => (0usize..8).prop_map(|pick| Step::Close { pick }),
        1 => (0u16..60).prop_map(|rows| Step::Resize { rows }),
        1 => (1u8..4, 0usize..DataKind::ALL.len())
            .prop_map(|(subject, kind)| Step::Invalidate { subject, kind }),
    ]
}

struct Harness {
    model: DashboardModel,
    ctx: CacheContext,
    now: DateTime<Utc>,
    pending: Vec<FetchRequest>,
    mutations: Vec<(u32, Mutation)>,
}

impl Harness {
    fn new() -> Self {
        let config = Config::default();
        Self {
            model: DashboardModel::new(&config.ui, true, (100, 40)),
            ctx: CacheContext::from_config(&config, CacheStore::new()),
            now: Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap(),
            pending: Vec::new(),
            mutations: Vec::new(),
        }
    }

    fn send(&mut self, msg: DashboardMsg) {
        let cmd = update(&mut self.model, &mut self.ctx, msg, self.now);
        for cmd in cmd.flatten() {
            match cmd {
                DashboardCmd::Fetch(request) => self.pending.push(request),
                DashboardCmd::FanOut { requests, .. } => self.pending.extend(requests),
                DashboardCmd::Mutate { panel, mutation } => self.mutations.push((panel.0, mutation)),
                _ => {}
            }
        }
    }

    fn step(&mut self, step: Step) {
        match step {
            Step::Key(code) => self.send(DashboardMsg::Key(KeyEvent::new(code, KeyModifiers::NONE))),
            Step::Tick => self.send(DashboardMsg::Tick),
            Step::Advance(secs) => self.now += Duration::seconds(secs),
            Step::Complete { pick, ok, rows } => {
                if self.pending.is_empty() {
                    return;
                }
                let request = self.pending.remove(pick % self.pending.len());
                let result = if ok {
                    let items: Vec<String> = (0..rows).map(|i| format!("row {i}")).collect();
                    Ok(Payload::new(json!(items)))
                } else {
                    Err(FetchError::Unreachable {
                        details: "link down".into(),
                    })
                };
                self.send(DashboardMsg::FetchComplete(FetchCompletion::for_request(&request, result)));
            }
            Step::FinishMutation { ok } => {
                let Some((origin, mutation)) = self.mutations.pop() else {
                    return;
                };
                let result = if ok {
                    Ok(())
                } else {
                    Err(FetchError::Rejected {
                        details: "refused".into(),
                    })
                };
                self.send(DashboardMsg::MutationComplete(MutationCompletion {
                    origin,
                    mutation,
                    result,
                }));
            }
            Step::Open {
                subject,
                kind,
                editable,
            } => {
                let kind = DataKind::ALL[kind];
                let mut spec = PanelSpec::new(
                    kind.as_str(),
                    PanelSource::Device {
                        subject: SubjectId::new(format!("dev{subject}")),
                        kind,
                    },
                );
                if editable {
                    spec = spec.editable();
                }
                self.send(DashboardMsg::OpenPanel(spec));
            }
            Step::OpenFleet { kind } => {
                let kind = DataKind::ALL[kind];
                self.send(DashboardMsg::OpenPanel(PanelSpec::new(
                    "fleet",
                    PanelSource::Fleet {
                        subjects: (1..=3).map(|i| SubjectId::new(format!("dev{i}"))).collect(),
                        kind,
                    },
                )));
            }
            Step::Close { pick } => {
                if self.model.panels.is_empty() {
                    return;
                }
                let id = self.model.panels[pick % self.model.panels.len()].id();
                self.send(DashboardMsg::ClosePanel(id));
            }
            Step::Resize { rows } => self.send(DashboardMsg::Resize { cols: 100, rows }),
            Step::Invalidate { subject, kind } => self.send(DashboardMsg::Invalidate(CacheKey::new(
                format!("dev{subject}"),
                DataKind::ALL[kind],
            ))),
        }
    }

    fn assert_invariants(&self) {
        let model = &self.model;

        // Every outstanding ticket was dispatched exactly once and not yet answered.
        for panel in &model.panels {
            for key in panel.keys() {
                if let Some(ticket) = self.ctx.coordinator.ticket(&key) {
                    let dispatched = self
                        .pending
                        .iter()
                        .filter(|r| r.key == key && r.generation == ticket.generation)
                        .count();
                    assert_eq!(dispatched, 1, "ticket for {key} dispatched {dispatched} times");
                }
            }
        }

        for panel in &model.panels {
            assert_scroller_invariants(panel.scroller());
            assert_eq!(panel.scroller().item_count(), panel.item_count());
            if matches!(panel.phase(), PanelPhase::Loading | PanelPhase::Refreshing) {
                assert!(
                    panel.keys().iter().any(|k| self.ctx.coordinator.is_outstanding(k)),
                    "{} is {:?} with nothing in flight",
                    panel.id(),
                    panel.phase()
                );
            }
            if panel.phase() == PanelPhase::Errored {
                assert!(panel.load_error().is_some());
                assert!(panel.visible_rows().is_empty() || panel.source().is_fleet());
            }
        }

        assert!(model.notifications.len() <= MAX_NOTIFICATIONS);

        match model.focused_panel_id() {
            Some(id) => assert!(model.panel(id).is_some()),
            None => assert!(model.panels.is_empty()),
        }

        if let Some(Modal::EditForm { panel } | Modal::ConfirmDiscard { panel }) = model.active_modal() {
            let owner = model.panel(panel);
            assert!(owner.is_some_and(|p| p.form().is_some()), "modal for missing editor {panel}");
        }
    }
}

// ──────────────────── properties ────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn scroller_invariants_hold(
        rows in 0usize..30,
        ops in prop::collection::vec(arb_scroll_op(), 0..80),
    ) {
        let mut scroller = ViewportScroller::new(rows);
        assert_scroller_invariants(&scroller);
        for op in &ops {
            apply_scroll(&mut scroller, op);
            assert_scroller_invariants(&scroller);
        }
    }

    #[test]
    fn page_down_then_page_up_is_identity_inside_the_list(
        items in 1usize..200,
        rows in 1usize..30,
        start in 0usize..200,
    ) {
        let mut scroller = ViewportScroller::new(rows);
        scroller.set_item_count(items);
        for _ in 0..start.min(items - 1) {
            scroller.cursor_down();
        }
        let before = scroller.cursor();
        prop_assume!(before + rows < items && before >= rows);
        scroller.page_down();
        scroller.page_up();
        prop_assert_eq!(scroller.cursor(), before);
    }

    #[test]
    fn focus_ring_wraps(len in 1usize..12, steps in 0usize..100) {
        let mut ring = FocusRing::new((0..len).collect()).unwrap();
        for _ in 0..steps {
            ring.next();
        }
        prop_assert_eq!(ring.focused(), steps % len);
        for _ in 0..steps {
            ring.prev();
        }
        prop_assert_eq!(ring.focused(), 0);
    }

    #[test]
    fn focus_transition_is_atomic(len in 2usize..12, steps in 1usize..40) {
        let mut ring = FocusRing::new((0..len).collect()).unwrap();
        for _ in 0..steps {
            let before = ring.focused();
            let transition = ring.next().unwrap();
            prop_assert_eq!(transition.blurred, before);
            prop_assert_eq!(transition.focused, ring.focused());
            prop_assert_ne!(transition.blurred, transition.focused);
        }
    }

    #[test]
    fn reducer_preserves_invariants(steps in prop::collection::vec(arb_step(), 1..120)) {
        let mut harness = Harness::new();
        for step in steps {
            harness.step(step);
            harness.assert_invariants();
        }
    }

    #[test]
    fn draining_every_fetch_settles_all_panels(
        opens in prop::collection::vec((1u8..4, 0usize..DataKind::ALL.len()), 1..8),
        fail in any::<bool>(),
    ) {
        let mut harness = Harness::new();
        for (subject, kind) in opens {
            harness.step(Step::Open { subject, kind, editable: false });
        }
        while !harness.pending.is_empty() {
            harness.step(Step::Complete { pick: 0, ok: !fail, rows: 3 });
        }
        prop_assert_eq!(harness.ctx.coordinator.outstanding(), 0);
        let settled = if fail { PanelPhase::Errored } else { PanelPhase::Ready };
        for panel in &harness.model.panels {
            prop_assert_eq!(panel.phase(), settled);
        }
    }
}
