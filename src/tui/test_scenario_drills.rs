//! Scenario-driven drills across the cache, the coordinator and the dashboard.
//!
//! Each drill plays a realistic multi-step operator workflow against the
//! reducer with a [`SimulatedFetcher`] standing in for the devices. The
//! [`Drill`] runner executes commands synchronously on the test thread, or
//! holds fetches back so a drill can observe the in-flight state and decide
//! when (and whether) the answer arrives. Rendered frames are captured at
//! assertion points so a failing drill shows what the operator would see.

#![allow(clippy::too_many_lines)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde_json::json;

use super::focus::Modal;
use super::model::{DashboardCmd, DashboardModel, DashboardMsg, NotificationLevel, PanelSpec};
use super::panel::{CacheContext, PanelId, PanelPhase, PanelSource};
use super::snapshot::{DashboardSnapshot, render_text};
use super::update::update;
use crate::cache::entry::Payload;
use crate::cache::key::{CacheKey, DataKind, SubjectId};
use crate::cache::store::CacheStore;
use crate::core::config::Config;
use crate::logger::DiagnosticEvent;
use crate::refresh::coordinator::{FetchCompletion, FetchRequest};
use crate::refresh::fetcher::{FetchContext, Fetcher};
use crate::refresh::pool::MutationCompletion;
use crate::refresh::simulated::SimulatedFetcher;

// ──────────────────── runner ────────────────────

struct Drill {
    model: DashboardModel,
    ctx: CacheContext,
    fetcher: Arc<SimulatedFetcher>,
    now: DateTime<Utc>,
    hold: bool,
    held: Vec<FetchRequest>,
    logs: Vec<DiagnosticEvent>,
    frames: Vec<String>,
}

impl Drill {
    fn new(fetcher: SimulatedFetcher) -> Self {
        let config = Config::default();
        Self {
            model: DashboardModel::new(&config.ui, false, (100, 40)),
            ctx: CacheContext::from_config(&config, CacheStore::new()),
            fetcher: Arc::new(fetcher.with_latency(Duration::ZERO)),
            now: Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap(),
            hold: false,
            held: Vec::new(),
            logs: Vec::new(),
            frames: Vec::new(),
        }
    }

    fn online() -> Self {
        Self::new(SimulatedFetcher::new(42))
    }

    fn at(&self, secs: i64) -> DateTime<Utc> {
        self.now + chrono::Duration::seconds(secs)
    }

    fn advance(&mut self, secs: i64) {
        self.now = self.at(secs);
    }

    fn send(&mut self, msg: DashboardMsg) {
        let mut queue = vec![update(&mut self.model, &mut self.ctx, msg, self.now)];
        while let Some(cmd) = queue.pop() {
            for cmd in cmd.flatten() {
                if let Some(reply) = self.execute(cmd) {
                    queue.push(update(&mut self.model, &mut self.ctx, reply, self.now));
                }
            }
        }
    }

    fn execute(&mut self, cmd: DashboardCmd) -> Option<DashboardMsg> {
        match cmd {
            DashboardCmd::Fetch(request) if self.hold => {
                self.held.push(request);
                None
            }
            DashboardCmd::Fetch(request) => {
                Some(DashboardMsg::FetchComplete(self.fetch(&request)))
            }
            DashboardCmd::FanOut { panel, requests } => {
                let completions = requests.iter().map(|r| self.fetch(r)).collect();
                Some(DashboardMsg::AggregateComplete { panel, completions })
            }
            DashboardCmd::Mutate { panel, mutation } => {
                let ctx = FetchContext::new(self.ctx.coordinator.deadline());
                let result = self.fetcher.mutate(&ctx, &mutation);
                Some(DashboardMsg::MutationComplete(MutationCompletion {
                    origin: panel.0,
                    mutation,
                    result,
                }))
            }
            DashboardCmd::Log(event) => {
                self.logs.push(event);
                None
            }
            DashboardCmd::None | DashboardCmd::Quit | DashboardCmd::Batch(_) => None,
        }
    }

    fn fetch(&self, request: &FetchRequest) -> FetchCompletion {
        let ctx = FetchContext::new(self.ctx.coordinator.deadline());
        let result = self
            .fetcher
            .fetch(&ctx, &request.key.subject, request.key.kind);
        FetchCompletion::for_request(request, result)
    }

    /// Deliver every held fetch, oldest first.
    fn release(&mut self) {
        self.hold = false;
        for request in std::mem::take(&mut self.held) {
            let completion = self.fetch(&request);
            self.send(DashboardMsg::FetchComplete(completion));
        }
    }

    fn key(&mut self, code: KeyCode) {
        self.send(DashboardMsg::Key(KeyEvent::new(code, KeyModifiers::NONE)));
    }

    fn type_text(&mut self, text: &str) {
        for c in text.chars() {
            self.key(KeyCode::Char(c));
        }
    }

    fn open(&mut self, subject: &str, kind: DataKind) -> PanelId {
        self.open_spec(PanelSpec::new(
            kind.as_str(),
            PanelSource::Device {
                subject: SubjectId::new(subject),
                kind,
            },
        ))
    }

    fn open_spec(&mut self, spec: PanelSpec) -> PanelId {
        self.send(DashboardMsg::OpenPanel(spec));
        self.model.panels.last().map(|p| p.id()).unwrap()
    }

    fn seed(&mut self, subject: &str, kind: DataKind, payload: serde_json::Value, age_secs: i64) {
        let cached_at = self.at(-age_secs);
        self.ctx
            .store
            .put(CacheKey::new(subject, kind), Payload::new(payload), cached_at);
    }

    fn snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot::capture(&self.model)
    }

    fn phase(&self, id: PanelId) -> PanelPhase {
        self.model.panel(id).map(|p| p.phase()).unwrap()
    }

    fn capture(&mut self) -> String {
        let frame = render_text(&self.snapshot());
        self.frames.push(frame.clone());
        frame
    }

    fn count_logs(&self, pred: impl Fn(&DiagnosticEvent) -> bool) -> usize {
        self.logs.iter().filter(|e| pred(e)).count()
    }
}

// ──────────────────── drills ────────────────────

#[test]
fn drill_cold_start_miss_then_load() {
    let mut drill = Drill::online();
    drill.hold = true;
    let id = drill.open("dev1", DataKind::Inputs);

    let frame = drill.capture();
    assert_eq!(drill.phase(id), PanelPhase::Loading);
    assert!(frame.contains("(loading) |"), "{frame}");
    assert_eq!(drill.held.len(), 1);

    drill.release();
    let frame = drill.capture();
    assert_eq!(drill.phase(id), PanelPhase::Ready);
    assert_eq!(drill.snapshot().panel(id).unwrap().item_count, 4);
    assert!(frame.contains("Input 0"), "{frame}");

    let entry = drill.ctx.store.get(&CacheKey::new("dev1", DataKind::Inputs)).unwrap();
    assert_eq!(entry.cached_at, drill.now);
    assert_eq!(drill.fetcher.fetch_count(), 1);
}

#[test]
fn drill_fresh_hit_costs_no_fetch() {
    let mut drill = Drill::online();
    drill.seed("dev1", DataKind::Status, json!({"online": true}), 0);
    let id = drill.open("dev1", DataKind::Status);
    assert_eq!(drill.phase(id), PanelPhase::Ready);
    assert_eq!(drill.fetcher.fetch_count(), 0);
    assert!(drill.held.is_empty());
}

#[test]
fn drill_stale_data_shown_while_refresh_fails() {
    let mut drill = Drill::new(SimulatedFetcher::new(3).with_unreachable("dev1"));
    drill.seed("dev1", DataKind::Energy, json!({"power_w": 812}), 20);
    drill.hold = true;
    let id = drill.open("dev1", DataKind::Energy);

    // Cached rows are visible immediately, with the refresh spinner.
    let before = drill.snapshot().panel(id).unwrap().rows.clone();
    assert_eq!(drill.phase(id), PanelPhase::Refreshing);
    assert!(!before.is_empty());
    assert!(drill.capture().contains("(refreshing)"));

    drill.release();
    let frame = drill.capture();
    let panel = drill.snapshot().panel(id).cloned().unwrap();
    assert_eq!(panel.phase, PanelPhase::Ready);
    assert_eq!(panel.rows, before);
    assert_eq!(panel.refresh_error.as_deref(), Some("unreachable"));
    assert!(frame.contains("showing cached data"), "{frame}");
    assert_eq!(drill.model.notifications.len(), 1);
    assert_eq!(drill.model.notifications[0].level, NotificationLevel::Warning);
}

#[test]
fn drill_two_panels_one_fetch() {
    let mut drill = Drill::online();
    drill.hold = true;
    let a = drill.open("dev1", DataKind::Energy);
    let b = drill.open("dev1", DataKind::Energy);
    assert_eq!(drill.held.len(), 1);
    assert_eq!(drill.phase(a), PanelPhase::Loading);
    assert_eq!(drill.phase(b), PanelPhase::Loading);

    drill.release();
    assert_eq!(drill.fetcher.fetch_count(), 1);
    assert_eq!(drill.phase(a), PanelPhase::Ready);
    assert_eq!(drill.phase(b), PanelPhase::Ready);
    let snap = drill.snapshot();
    assert_eq!(snap.panel(a).unwrap().rows, snap.panel(b).unwrap().rows);
}

#[test]
fn drill_lost_answer_expires_then_manual_retry() {
    let mut drill = Drill::online();
    drill.hold = true;
    let id = drill.open("dev1", DataKind::Status);

    // Past the fetch deadline plus grace: the watchdog gives up on the ticket.
    drill.advance(10);
    drill.send(DashboardMsg::Tick);
    assert_eq!(drill.phase(id), PanelPhase::Errored);
    let frame = drill.capture();
    assert!(frame.contains("deadline exceeded"), "{frame}");
    assert_eq!(drill.count_logs(|e| matches!(e, DiagnosticEvent::TicketExpired { .. })), 1);

    // The original answer finally shows up and is not applied to the panel.
    drill.release();
    assert_eq!(drill.phase(id), PanelPhase::Errored);
    assert_eq!(
        drill.count_logs(|e| matches!(e, DiagnosticEvent::LateCompletionDiscarded { .. })),
        1
    );

    // Revalidation leaves errored panels alone; `r` retries.
    for _ in 0..drill.model.revalidate_every_ticks {
        drill.send(DashboardMsg::Tick);
    }
    assert_eq!(drill.phase(id), PanelPhase::Errored);
    drill.key(KeyCode::Char('r'));
    assert_eq!(drill.phase(id), PanelPhase::Ready);
}

#[test]
fn drill_edit_save_invalidates_and_reloads() {
    let mut drill = Drill::online();
    let id = drill.open_spec(
        PanelSpec::new(
            "Switch",
            PanelSource::Device {
                subject: SubjectId::new("dev1"),
                kind: DataKind::Config,
            },
        )
        .editable(),
    );
    assert_eq!(drill.phase(id), PanelPhase::Ready);

    drill.key(KeyCode::Char('e'));
    assert_eq!(drill.model.active_modal(), Some(Modal::EditForm { panel: id }));
    drill.type_text(" (hall)");
    let frame = drill.capture();
    assert!(frame.contains("Name: dev1 switch (hall) *"), "{frame}");

    drill.key(KeyCode::Enter);
    assert!(drill.model.modals.is_empty());
    assert_eq!(drill.fetcher.mutation_count(), 1);
    assert_eq!(drill.fetcher.fetch_count(), 2);
    assert!(drill.logs.contains(&DiagnosticEvent::Invalidated {
        key: CacheKey::new("dev1", DataKind::Config),
    }));

    let panel = drill.model.panel(id).unwrap();
    assert_eq!(panel.phase(), PanelPhase::Ready);
    assert_eq!(
        panel.payload().and_then(|p| p.value().get("name")).and_then(|v| v.as_str()),
        Some("dev1 switch (hall)")
    );
    let form = panel.form().unwrap();
    assert!(!form.is_dirty());
    assert!(drill
        .model
        .notifications
        .iter()
        .any(|n| n.level == NotificationLevel::Info));
}

#[test]
fn drill_rejected_save_keeps_edits_and_raises_error() {
    let mut drill = Drill::new(SimulatedFetcher::new(9));
    let id = drill.open_spec(
        PanelSpec::new(
            "Switch",
            PanelSource::Device {
                subject: SubjectId::new("dev2"),
                kind: DataKind::Config,
            },
        )
        .editable(),
    );
    drill.key(KeyCode::Char('e'));
    drill.type_text("!");
    // The simulated device goes offline between edit and save.
    drill.fetcher = Arc::new(
        SimulatedFetcher::new(9)
            .with_latency(Duration::ZERO)
            .with_unreachable("dev2"),
    );
    drill.key(KeyCode::Enter);

    assert_eq!(drill.count_logs(|e| matches!(e, DiagnosticEvent::MutationFailed { .. })), 1);
    let panel = drill.model.panel(id).unwrap();
    assert_eq!(panel.phase(), PanelPhase::Ready);
    assert!(!panel.mutation_pending());
    assert!(panel.form().unwrap().is_dirty());
    assert_eq!(drill.model.notifications.last().unwrap().level, NotificationLevel::Error);
}

#[test]
fn drill_dirty_cancel_confirm_flow() {
    let mut drill = Drill::online();
    let id = drill.open_spec(
        PanelSpec::new(
            "Switch",
            PanelSource::Device {
                subject: SubjectId::new("dev1"),
                kind: DataKind::Config,
            },
        )
        .editable(),
    );
    drill.key(KeyCode::Char('e'));
    drill.type_text("zz");
    drill.key(KeyCode::Esc);
    assert_eq!(drill.model.active_modal(), Some(Modal::ConfirmDiscard { panel: id }));
    assert!(drill.capture().contains("Discard unsaved changes? [y/n]"));

    // Keep editing.
    drill.key(KeyCode::Char('n'));
    assert_eq!(drill.model.active_modal(), Some(Modal::EditForm { panel: id }));
    assert!(drill.model.panel(id).unwrap().form().unwrap().is_dirty());

    drill.key(KeyCode::Esc);
    drill.key(KeyCode::Char('y'));
    assert!(drill.model.modals.is_empty());
    assert!(!drill.model.panel(id).unwrap().form().unwrap().is_dirty());
    assert_eq!(drill.fetcher.mutation_count(), 0);
}

#[test]
fn drill_fleet_view_with_one_offline_device() {
    let mut drill = Drill::new(SimulatedFetcher::new(5).with_unreachable("dev3"));
    let id = drill.open_spec(PanelSpec::new(
        "Fleet status",
        PanelSource::Fleet {
            subjects: (1..=4).map(|i| SubjectId::new(format!("dev{i}"))).collect(),
            kind: DataKind::Status,
        },
    ));

    assert_eq!(drill.fetcher.fetch_count(), 4);
    assert_eq!(drill.phase(id), PanelPhase::Ready);
    let rows = drill.snapshot().panel(id).unwrap().rows.clone();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[2], "dev3: unreachable (unreachable)");
    assert!(rows[0].starts_with("dev1: "));
    assert_eq!(
        drill.count_logs(|e| matches!(e, DiagnosticEvent::AggregateUnreachable { .. })),
        1
    );
    assert!(drill.model.notifications.is_empty());
}

#[test]
fn drill_scroll_fifty_scenes_by_page() {
    let mut drill = Drill::online();
    let id = drill.open("dev1", DataKind::Scenes);
    drill.send(DashboardMsg::Resize { cols: 80, rows: 16 });
    assert_eq!(drill.model.panel(id).unwrap().scroller().visible_rows(), 10);

    for _ in 0..6 {
        drill.key(KeyCode::PageDown);
    }
    let panel = drill.snapshot().panel(id).cloned().unwrap();
    assert_eq!((panel.item_count, panel.offset), (50, 40));
    assert_eq!(panel.cursor_row, Some(9));
    assert_eq!(panel.rows.first().map(String::as_str), Some("scene 40"));
    assert_eq!(panel.rows.last().map(String::as_str), Some("scene 49"));

    drill.key(KeyCode::Char('g'));
    let panel = drill.snapshot().panel(id).cloned().unwrap();
    assert_eq!((panel.offset, panel.cursor_row), (0, Some(0)));
}

#[test]
fn drill_panel_focus_wraps_both_ways() {
    let mut drill = Drill::online();
    let ids: Vec<PanelId> = DataKind::ALL[..5]
        .iter()
        .map(|kind| drill.open("dev1", *kind))
        .collect();
    assert_eq!(drill.model.focused_panel_id(), Some(ids[4]));

    drill.key(KeyCode::Tab);
    assert_eq!(drill.model.focused_panel_id(), Some(ids[0]));
    drill.key(KeyCode::BackTab);
    assert_eq!(drill.model.focused_panel_id(), Some(ids[4]));

    let focused: Vec<bool> = drill.snapshot().panels.iter().map(|p| p.focused).collect();
    assert_eq!(focused, vec![false, false, false, false, true]);
}

#[test]
fn drill_runs_are_deterministic() {
    fn run() -> Vec<String> {
        let mut drill = Drill::new(SimulatedFetcher::new(11).with_unreachable("dev2"));
        drill.open("dev1", DataKind::Inputs);
        drill.open_spec(PanelSpec::new(
            "Fleet energy",
            PanelSource::Fleet {
                subjects: (1..=3).map(|i| SubjectId::new(format!("dev{i}"))).collect(),
                kind: DataKind::Energy,
            },
        ));
        drill.capture();
        drill.key(KeyCode::Tab);
        drill.key(KeyCode::Char('j'));
        drill.capture();
        drill.advance(30);
        drill.send(DashboardMsg::Tick);
        drill.capture();
        drill.frames
    }
    assert_eq!(run(), run());
}
