//! Immutable view of the dashboard handed to a renderer after each step.

#![allow(missing_docs)]

use std::fmt::Write as _;

use crate::core::errors::Result;
use crate::tui::focus::Modal;
use crate::tui::form::FieldView;
use crate::tui::input::{HelpBinding, help_bindings};
use crate::tui::model::{DashboardModel, Notification, NotificationLevel};
use crate::tui::panel::{PanelController, PanelId, PanelPhase};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelSnapshot {
    pub id: PanelId,
    pub title: String,
    pub phase: PanelPhase,
    pub focused: bool,
    /// Rows inside the scroll window.
    pub rows: Vec<String>,
    /// Cursor position relative to `rows`.
    pub cursor_row: Option<usize>,
    pub offset: usize,
    pub item_count: usize,
    /// Blocking load error shown instead of rows.
    pub error: Option<String>,
    /// Failed background refresh behind the displayed rows.
    pub refresh_error: Option<String>,
    /// Spinner glyph while loading or refreshing.
    pub spinner: Option<char>,
}

impl PanelSnapshot {
    fn capture(panel: &PanelController, focused: bool, spinner: char) -> Self {
        let phase = panel.phase();
        let scroller = panel.scroller();
        let rows = if phase.shows_data() {
            panel.visible_rows()
        } else {
            Vec::new()
        };
        let cursor_row = (!rows.is_empty()).then(|| scroller.cursor() - scroller.offset());
        Self {
            id: panel.id(),
            title: panel.title().to_string(),
            phase,
            focused,
            rows,
            cursor_row,
            offset: scroller.offset(),
            item_count: scroller.item_count(),
            error: panel.load_error().map(ToString::to_string),
            refresh_error: panel.refresh_error().map(|e| e.label().to_string()),
            spinner: matches!(phase, PanelPhase::Loading | PanelPhase::Refreshing)
                .then_some(spinner),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSnapshot {
    pub panel: PanelId,
    pub fields: Vec<FieldView>,
    pub confirm_discard: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardSnapshot {
    pub tick: u64,
    pub terminal_size: (u16, u16),
    pub panels: Vec<PanelSnapshot>,
    pub modal: Option<Modal>,
    pub form: Option<FormSnapshot>,
    pub help: Vec<HelpBinding>,
    pub notifications: Vec<Notification>,
}

impl DashboardSnapshot {
    #[must_use]
    pub fn capture(model: &DashboardModel) -> Self {
        let focused = model.focused_panel_id();
        let spinner = model.spinner();
        let panels = model
            .panels
            .iter()
            .map(|p| PanelSnapshot::capture(p, Some(p.id()) == focused, spinner))
            .collect();

        let modal = model.active_modal();
        let form = match modal {
            Some(Modal::EditForm { panel } | Modal::ConfirmDiscard { panel }) => model
                .panel(panel)
                .and_then(PanelController::form)
                .map(|form| FormSnapshot {
                    panel,
                    fields: form.fields(),
                    confirm_discard: matches!(modal, Some(Modal::ConfirmDiscard { .. })),
                }),
            Some(Modal::Help) | None => None,
        };
        let help = if modal == Some(Modal::Help) {
            help_bindings().to_vec()
        } else {
            Vec::new()
        };

        Self {
            tick: model.tick,
            terminal_size: model.terminal_size,
            panels,
            modal,
            form,
            help,
            notifications: model.notifications.clone(),
        }
    }

    #[must_use]
    pub fn panel(&self, id: PanelId) -> Option<&PanelSnapshot> {
        self.panels.iter().find(|p| p.id == id)
    }
}

/// Receives a snapshot after every event-loop step.
pub trait RenderSink {
    /// # Errors
    /// Implementations report output failures; the event loop stops on error.
    fn render(&mut self, snapshot: &DashboardSnapshot) -> Result<()>;
}

impl<F> RenderSink for F
where
    F: FnMut(&DashboardSnapshot) -> Result<()>,
{
    fn render(&mut self, snapshot: &DashboardSnapshot) -> Result<()> {
        self(snapshot)
    }
}

/// Plain-text rendering used by headless runs and the terminal sink.
#[must_use]
pub fn render_text(snapshot: &DashboardSnapshot) -> String {
    let mut out = String::new();
    for panel in &snapshot.panels {
        let marker = if panel.focused { '>' } else { ' ' };
        let spinner = panel.spinner.map(|c| format!(" {c}")).unwrap_or_default();
        let _ = write!(out, "{marker} [{}] {} ({})", panel.id, panel.title, panel.phase.label());
        let _ = writeln!(out, "{spinner}");
        if let Some(error) = &panel.error {
            let _ = writeln!(out, "    ! {error}");
        }
        if let Some(label) = &panel.refresh_error {
            let _ = writeln!(out, "    ~ refresh failed ({label}), showing cached data");
        }
        for (idx, row) in panel.rows.iter().enumerate() {
            let cursor = if panel.focused && panel.cursor_row == Some(idx) {
                '*'
            } else {
                ' '
            };
            let _ = writeln!(out, "   {cursor} {row}");
        }
    }

    if let Some(form) = &snapshot.form {
        let _ = writeln!(out, "-- edit {} --", form.panel);
        for field in &form.fields {
            let focus = if field.focused { '>' } else { ' ' };
            let dirty = if field.dirty { " *" } else { "" };
            let _ = writeln!(out, " {focus} {}: {}{dirty}", field.label, field.value);
        }
        if form.confirm_discard {
            let _ = writeln!(out, "Discard unsaved changes? [y/n]");
        }
    }

    if !snapshot.help.is_empty() {
        let _ = writeln!(out, "-- keys --");
        for binding in &snapshot.help {
            let _ = writeln!(out, " {:<16} {}", binding.keys, binding.description);
        }
    }

    for note in &snapshot.notifications {
        let level = match note.level {
            NotificationLevel::Info => "info",
            NotificationLevel::Warning => "warn",
            NotificationLevel::Error => "error",
        };
        let _ = writeln!(out, "[{level}] {}", note.message);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::Payload;
    use crate::cache::key::{CacheKey, DataKind, SubjectId};
    use crate::cache::store::CacheStore;
    use crate::core::config::Config;
    use crate::tui::model::PanelSpec;
    use crate::tui::panel::{CacheContext, PanelSource};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn model_with_panel(payload: Option<Payload>) -> (DashboardModel, CacheContext) {
        let config = Config::default();
        let mut model = DashboardModel::new(&config.ui, false, (80, 24));
        let mut ctx = CacheContext::from_config(&config, CacheStore::new());
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        if let Some(payload) = payload {
            ctx.store.put(CacheKey::new("dev1", DataKind::Inputs), payload, now);
        }
        let id = model.add_panel(PanelSpec::new(
            "Inputs",
            PanelSource::Device {
                subject: SubjectId::new("dev1"),
                kind: DataKind::Inputs,
            },
        ));
        let _ = model.panel_mut(id).unwrap().enter(&mut ctx, now);
        (model, ctx)
    }

    #[test]
    fn loading_panel_has_spinner_and_no_rows() {
        let (model, _ctx) = model_with_panel(None);
        let snap = DashboardSnapshot::capture(&model);
        let panel = &snap.panels[0];
        assert_eq!(panel.phase, PanelPhase::Loading);
        assert_eq!(panel.spinner, Some('|'));
        assert!(panel.rows.is_empty());
        assert!(panel.focused);
    }

    #[test]
    fn ready_panel_renders_rows_with_cursor() {
        let (model, _ctx) = model_with_panel(Some(Payload::new(json!(["in0", "in1"]))));
        let snap = DashboardSnapshot::capture(&model);
        assert_eq!(snap.panels[0].rows, vec!["in0", "in1"]);
        assert_eq!(snap.panels[0].cursor_row, Some(0));
        let text = render_text(&snap);
        assert!(text.contains("> [#1] Inputs (ready)"));
        assert!(text.contains("* in0"));
    }

    #[test]
    fn help_modal_lists_bindings() {
        let (mut model, _ctx) = model_with_panel(None);
        model.modals.push(Modal::Help);
        let snap = DashboardSnapshot::capture(&model);
        assert!(!snap.help.is_empty());
        assert!(render_text(&snap).contains("-- keys --"));
    }

    #[test]
    fn closures_are_render_sinks() {
        let (model, _ctx) = model_with_panel(None);
        let mut frames = 0;
        let mut sink = |_: &DashboardSnapshot| -> Result<()> {
            frames += 1;
            Ok(())
        };
        sink.render(&DashboardSnapshot::capture(&model)).unwrap();
        assert_eq!(frames, 1);
    }
}
