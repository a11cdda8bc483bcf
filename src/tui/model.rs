//! Elm-style state model for the device dashboard.
//!
//! All display state lives in [`DashboardModel`]. Input and completion events
//! arrive as [`DashboardMsg`] values; side-effects are represented as
//! [`DashboardCmd`] values returned from the update function.
//!
//! **Design invariant:** the model is deterministic and testable. No I/O
//! happens here; the cache itself is lent to update by the event loop.

use crossterm::event::KeyEvent;

use crate::cache::key::{CacheKey, SubjectId};
use crate::core::config::UiConfig;
use crate::logger::DiagnosticEvent;
use crate::refresh::coordinator::{FetchCompletion, FetchRequest};
use crate::refresh::fetcher::Mutation;
use crate::refresh::pool::MutationCompletion;
use crate::tui::focus::{FocusRing, Modal, ModalStack};
use crate::tui::form::switch_config_form;
use crate::tui::panel::{PanelController, PanelId, PanelSource};

/// Maximum notifications shown at once; the oldest is evicted first.
pub const MAX_NOTIFICATIONS: usize = 3;

/// Spinner frames drawn while a panel is loading.
pub const SPINNER_FRAMES: [char; 4] = ['|', '/', '-', '\\'];

/// Terminal rows used by the header and the notification strip.
const CHROME_ROWS: u16 = 4;

/// Rows each panel spends on its title and border.
const PANEL_CHROME_ROWS: usize = 2;

// ──────────────────── notifications ────────────────────

/// A toast shown under the panels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Monotonic ID.
    pub id: u64,
    pub level: NotificationLevel,
    pub message: String,
    /// Tick after which the toast disappears. `None` until dismissed.
    pub expires_at_tick: Option<u64>,
}

/// Notification severity. Errors stay until dismissed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

// ──────────────────── panels ────────────────────

/// What to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelSpec {
    pub title: String,
    pub source: PanelSource,
    /// Attach the settings editor (device config panels only).
    pub editable: bool,
}

impl PanelSpec {
    #[must_use]
    pub fn new(title: impl Into<String>, source: PanelSource) -> Self {
        Self {
            title: title.into(),
            source,
            editable: false,
        }
    }

    #[must_use]
    pub const fn editable(mut self) -> Self {
        self.editable = true;
        self
    }
}

// ──────────────────── model ────────────────────

/// Complete dashboard state.
#[derive(Debug)]
pub struct DashboardModel {
    /// Open panels in the order they were opened.
    pub panels: Vec<PanelController>,
    /// Tab ring over open panels. `None` while no panel is open.
    pub panel_focus: Option<FocusRing<PanelId>>,
    pub modals: ModalStack,
    /// Terminal dimensions (columns, rows).
    pub terminal_size: (u16, u16),
    /// Monotonic tick counter.
    pub tick: u64,
    /// Revalidate every open panel once per this many ticks.
    pub revalidate_every_ticks: u64,
    /// Lifetime of info and warning toasts, in ticks.
    pub notification_ttl_ticks: u64,
    /// Rows shown per panel before the first resize.
    pub default_visible_rows: usize,
    /// Drop a panel's entries from the cache when it closes.
    pub evict_on_close: bool,
    pub quit: bool,
    /// Active toasts, oldest first, at most [`MAX_NOTIFICATIONS`].
    pub notifications: Vec<Notification>,
    pub next_notification_id: u64,
    next_panel_id: u32,
}

impl DashboardModel {
    #[must_use]
    pub fn new(ui: &UiConfig, evict_on_close: bool, terminal_size: (u16, u16)) -> Self {
        Self {
            panels: Vec::new(),
            panel_focus: None,
            modals: ModalStack::new(),
            terminal_size,
            tick: 0,
            revalidate_every_ticks: ui.revalidate_every_ticks.max(1),
            notification_ttl_ticks: ui.notification_ttl_ticks,
            default_visible_rows: ui.visible_rows.max(1),
            evict_on_close,
            quit: false,
            notifications: Vec::new(),
            next_notification_id: 1,
            next_panel_id: 1,
        }
    }

    /// Current spinner glyph.
    #[must_use]
    pub fn spinner(&self) -> char {
        let frame = usize::try_from(self.tick % SPINNER_FRAMES.len() as u64).unwrap_or(0);
        SPINNER_FRAMES[frame]
    }

    #[must_use]
    pub fn panel(&self, id: PanelId) -> Option<&PanelController> {
        self.panels.iter().find(|p| p.id() == id)
    }

    pub fn panel_mut(&mut self, id: PanelId) -> Option<&mut PanelController> {
        self.panels.iter_mut().find(|p| p.id() == id)
    }

    #[must_use]
    pub fn focused_panel_id(&self) -> Option<PanelId> {
        self.panel_focus.as_ref().map(FocusRing::focused)
    }

    #[must_use]
    pub fn focused_panel(&self) -> Option<&PanelController> {
        self.focused_panel_id().and_then(|id| self.panel(id))
    }

    pub fn focused_panel_mut(&mut self) -> Option<&mut PanelController> {
        let id = self.focused_panel_id()?;
        self.panel_mut(id)
    }

    /// Whether any open panel displays `key`.
    #[must_use]
    pub fn is_displayed(&self, key: &CacheKey) -> bool {
        self.panels.iter().any(|p| p.owns(key))
    }

    /// Create a panel from `spec`, focus it, and return its id. The panel is
    /// `Idle` until entered.
    pub fn add_panel(&mut self, spec: PanelSpec) -> PanelId {
        let id = PanelId(self.next_panel_id);
        self.next_panel_id += 1;

        let mut panel = PanelController::new(id, spec.title, spec.source.clone(), self.panel_rows(self.panels.len() + 1));
        if spec.editable
            && let PanelSource::Device { subject, .. } = &spec.source
        {
            match switch_config_form(subject.clone()) {
                Ok(form) => panel = panel.with_form(form),
                Err(e) => {
                    self.push_notification(NotificationLevel::Error, format!("editor unavailable: {e}"));
                }
            }
        }
        self.panels.push(panel);
        self.sync_focus();
        if let Some(ring) = self.panel_focus.as_mut() {
            ring.focus_field(id);
        }
        self.relayout();
        id
    }

    /// Close a panel. Modals it owned are dropped with it.
    pub fn remove_panel(&mut self, id: PanelId) -> Option<PanelController> {
        let idx = self.panels.iter().position(|p| p.id() == id)?;
        let panel = self.panels.remove(idx);
        self.modals.remove_panel(id);
        self.sync_focus();
        self.relayout();
        Some(panel)
    }

    pub fn push_notification(&mut self, level: NotificationLevel, message: String) -> u64 {
        let id = self.next_notification_id;
        self.next_notification_id += 1;
        let expires_at_tick = match level {
            NotificationLevel::Error => None,
            NotificationLevel::Info | NotificationLevel::Warning => {
                Some(self.tick + self.notification_ttl_ticks)
            }
        };
        self.notifications.push(Notification {
            id,
            level,
            message,
            expires_at_tick,
        });
        while self.notifications.len() > MAX_NOTIFICATIONS {
            self.notifications.remove(0);
        }
        id
    }

    /// Dismiss the oldest notification. Returns whether one existed.
    pub fn dismiss_notification(&mut self) -> bool {
        if self.notifications.is_empty() {
            return false;
        }
        self.notifications.remove(0);
        true
    }

    /// Drop toasts whose lifetime ended.
    pub fn expire_notifications(&mut self) {
        let tick = self.tick;
        self.notifications
            .retain(|n| n.expires_at_tick.is_none_or(|at| at > tick));
    }

    /// Top modal, if any.
    #[must_use]
    pub fn active_modal(&self) -> Option<Modal> {
        self.modals.top()
    }

    /// Recompute scroller windows after the terminal or panel set changed.
    pub fn relayout(&mut self) {
        let rows = self.panel_rows(self.panels.len());
        for panel in &mut self.panels {
            panel.scroller_mut().set_visible_rows(rows);
        }
    }

    /// Subjects of every open device panel, deduplicated, in panel order.
    #[must_use]
    pub fn subjects(&self) -> Vec<SubjectId> {
        let mut out: Vec<SubjectId> = Vec::new();
        for panel in &self.panels {
            if let PanelSource::Device { subject, .. } = panel.source()
                && !out.contains(subject)
            {
                out.push(subject.clone());
            }
        }
        out
    }

    fn panel_rows(&self, panel_count: usize) -> usize {
        if self.terminal_size.1 == 0 {
            return self.default_visible_rows;
        }
        let usable = usize::from(self.terminal_size.1.saturating_sub(CHROME_ROWS));
        (usable / panel_count.max(1))
            .saturating_sub(PANEL_CHROME_ROWS)
            .max(1)
    }

    fn sync_focus(&mut self) {
        let ids: Vec<PanelId> = self.panels.iter().map(PanelController::id).collect();
        match self.panel_focus.as_mut() {
            Some(ring) => {
                if ring.set_fields(ids.clone()).is_err() {
                    self.panel_focus = None;
                }
            }
            None => self.panel_focus = FocusRing::new(ids).ok(),
        }
    }
}

// ──────────────────── messages ────────────────────

/// Every input the update function handles.
#[derive(Debug, Clone)]
pub enum DashboardMsg {
    /// Periodic timer tick: watchdog, revalidation, toast expiry.
    Tick,
    /// Terminal key press event.
    Key(KeyEvent),
    /// Terminal was resized.
    Resize { cols: u16, rows: u16 },
    OpenPanel(PanelSpec),
    ClosePanel(PanelId),
    /// Point a device panel at another subject.
    SelectSubject { panel: PanelId, subject: SubjectId },
    FocusPanel(PanelId),
    /// A single fetch finished on the worker pool.
    FetchComplete(FetchCompletion),
    /// Every leg of a fleet fan-out finished or timed out.
    AggregateComplete {
        panel: PanelId,
        completions: Vec<FetchCompletion>,
    },
    /// A save finished on the worker pool.
    MutationComplete(MutationCompletion),
    /// Externally triggered invalidation of one key.
    Invalidate(CacheKey),
    /// Refresh the focused panel regardless of staleness.
    ForceRefresh,
    Quit,
}

// ──────────────────── commands ────────────────────

/// Side-effects requested by update, executed by the event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardCmd {
    None,
    Quit,
    Batch(Vec<Self>),
    /// Run one fetch on the worker pool.
    Fetch(FetchRequest),
    /// Run a bounded fan-out for a fleet panel.
    FanOut {
        panel: PanelId,
        requests: Vec<FetchRequest>,
    },
    /// Send a mutation on behalf of a panel.
    Mutate { panel: PanelId, mutation: Mutation },
    Log(DiagnosticEvent),
}

impl DashboardCmd {
    /// Collapse `cmds` into one command, dropping `None`s.
    #[must_use]
    pub fn batch(cmds: Vec<Self>) -> Self {
        let mut cmds: Vec<Self> = cmds.into_iter().filter(|c| *c != Self::None).collect();
        match cmds.len() {
            0 => Self::None,
            1 => cmds.pop().unwrap_or(Self::None),
            _ => Self::Batch(cmds),
        }
    }

    /// Flatten nested batches into a list of leaf commands.
    #[must_use]
    pub fn flatten(self) -> Vec<Self> {
        match self {
            Self::None => Vec::new(),
            Self::Batch(cmds) => cmds.into_iter().flat_map(Self::flatten).collect(),
            other => vec![other],
        }
    }
}

// ──────────────────── tests ────────────────────
