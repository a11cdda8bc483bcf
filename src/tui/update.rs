//! Pure update function for the Elm-style dashboard.
//!
//! `update()` takes the current model, the cache context lent by the event
//! loop, a message, and the wall-clock time. It mutates the model and the
//! cache bookkeeping, and returns a command describing the I/O the runtime
//! should perform.
//!
//! **Design invariant:** this module performs zero I/O. Fetches, mutations
//! and log writes are all described as [`DashboardCmd`] values.

#![allow(clippy::too_many_lines)]

use chrono::{DateTime, Utc};
use crossterm::event::KeyEvent;

use super::focus::Modal;
use super::form::{FormAction, FormKey};
use super::input::{InputAction, InputContext, ScrollAction};
use super::model::{DashboardCmd, DashboardModel, DashboardMsg, NotificationLevel};
use super::panel::{CacheContext, PanelController, PanelEffect, PanelId};
use crate::cache::key::CacheKey;
use crate::logger::DiagnosticEvent;
use crate::refresh::coordinator::{CacheEvent, CompletionOutcome, FetchCompletion, FetchRequest};
use crate::refresh::pool::MutationCompletion;

/// Apply a message to the model and return the next command for the runtime.
pub fn update(
    model: &mut DashboardModel,
    ctx: &mut CacheContext,
    msg: DashboardMsg,
    now: DateTime<Utc>,
) -> DashboardCmd {
    match msg {
        DashboardMsg::Tick => handle_tick(model, ctx, now),

        DashboardMsg::Key(key) => handle_key(model, ctx, &key, now),

        DashboardMsg::Resize { cols, rows } => {
            model.terminal_size = (cols, rows);
            model.relayout();
            DashboardCmd::None
        }

        DashboardMsg::OpenPanel(spec) => {
            let id = model.add_panel(spec);
            with_panel(model, id, |panel| {
                let requests = panel.enter(ctx, now);
                dispatch(panel, requests)
            })
        }

        DashboardMsg::ClosePanel(id) => {
            if let Some(panel) = model.remove_panel(id)
                && model.evict_on_close
            {
                panel.teardown(ctx, |key| model.is_displayed(key));
            }
            DashboardCmd::None
        }

        DashboardMsg::SelectSubject { panel, subject } => with_panel(model, panel, |p| {
            let requests = p.select_subject(subject, ctx, now);
            dispatch(p, requests)
        }),

        DashboardMsg::FocusPanel(id) => {
            if let Some(ring) = model.panel_focus.as_mut() {
                ring.focus_field(id);
            }
            DashboardCmd::None
        }

        DashboardMsg::FetchComplete(completion) => {
            DashboardCmd::batch(handle_completion(model, ctx, completion, now))
        }

        DashboardMsg::AggregateComplete { completions, .. } => {
            let mut cmds = Vec::new();
            for completion in completions {
                cmds.extend(handle_completion(model, ctx, completion, now));
            }
            DashboardCmd::batch(cmds)
        }

        DashboardMsg::MutationComplete(completion) => {
            handle_mutation_complete(model, ctx, completion, now)
        }

        DashboardMsg::Invalidate(key) => {
            ctx.coordinator.invalidate(&mut ctx.store, &key);
            let mut cmds = vec![DashboardCmd::Log(DiagnosticEvent::Invalidated {
                key: key.clone(),
            })];
            cmds.extend(reload_displaying(model, ctx, &[key], None, now));
            DashboardCmd::batch(cmds)
        }

        DashboardMsg::ForceRefresh => force_refresh_focused(model, ctx, now),

        DashboardMsg::Quit => {
            model.quit = true;
            DashboardCmd::Quit
        }
    }
}

// ──────────────────── tick ────────────────────

fn handle_tick(model: &mut DashboardModel, ctx: &mut CacheContext, now: DateTime<Utc>) -> DashboardCmd {
    model.tick = model.tick.wrapping_add(1);
    let mut cmds = Vec::new();

    for expired in ctx.coordinator.expire_overdue(now) {
        cmds.push(DashboardCmd::Log(DiagnosticEvent::TicketExpired {
            key: expired.ticket.key.clone(),
            generation: expired.ticket.generation,
        }));
        cmds.extend(route_event(model, &expired.event));
    }

    if model.tick % model.revalidate_every_ticks == 0 {
        for panel in &mut model.panels {
            let requests = panel.revalidate(ctx, now);
            cmds.push(dispatch(panel, requests));
        }
    }

    model.expire_notifications();
    DashboardCmd::batch(cmds)
}

// ──────────────────── completions ────────────────────

fn handle_completion(
    model: &mut DashboardModel,
    ctx: &mut CacheContext,
    completion: FetchCompletion,
    now: DateTime<Utc>,
) -> Vec<DashboardCmd> {
    match ctx.coordinator.complete(&mut ctx.store, completion, now) {
        CompletionOutcome::Applied(event) => route_event(model, &event),
        CompletionOutcome::Discarded { key, generation } => {
            if let Some(entry) = ctx.store.get(&key) {
                for panel in &mut model.panels {
                    panel.adopt(&key, &entry.payload, entry.cached_at);
                }
            }
            vec![DashboardCmd::Log(DiagnosticEvent::LateCompletionDiscarded {
                key,
                generation,
            })]
        }
    }
}

/// Hand `event` to every panel that owns its key. Failures are reported
/// once, however many panels display the key.
fn route_event(model: &mut DashboardModel, event: &CacheEvent) -> Vec<DashboardCmd> {
    let mut failure: Option<PanelEffect> = None;
    for panel in &mut model.panels {
        if let Some(effect) = panel.apply(event)
            && effect != PanelEffect::Updated
            && failure.is_none()
        {
            failure = Some(effect);
        }
    }

    match failure {
        None | Some(PanelEffect::Updated) => Vec::new(),
        Some(PanelEffect::LoadFailed { key, error }) => {
            vec![DashboardCmd::Log(DiagnosticEvent::LoadFailed { key, error })]
        }
        Some(PanelEffect::RefreshFailed { key, error }) => {
            model.push_notification(
                NotificationLevel::Warning,
                format!("{key}: refresh failed ({error}); showing cached data"),
            );
            vec![DashboardCmd::Log(DiagnosticEvent::RefreshFailed { key, error })]
        }
        Some(PanelEffect::Unreachable { key, error }) => {
            vec![DashboardCmd::Log(DiagnosticEvent::AggregateUnreachable { key, error })]
        }
    }
}

fn handle_mutation_complete(
    model: &mut DashboardModel,
    ctx: &mut CacheContext,
    completion: MutationCompletion,
    now: DateTime<Utc>,
) -> DashboardCmd {
    let MutationCompletion {
        origin,
        mutation,
        result,
    } = completion;
    let id = PanelId(origin);

    if let Err(error) = result {
        if let Some(panel) = model.panel_mut(id) {
            panel.on_mutation_failed();
        }
        model.push_notification(
            NotificationLevel::Error,
            format!("save to {} failed: {error}", mutation.subject),
        );
        return DashboardCmd::Log(DiagnosticEvent::MutationFailed {
            subject: mutation.subject,
            error,
        });
    }

    let mut cmds = Vec::new();
    let invalidated = match model.panel_mut(id) {
        Some(panel) => {
            let reload = panel.on_mutation_applied(&mutation, ctx, now);
            cmds.push(dispatch(panel, reload.requests));
            reload.invalidated
        }
        None => {
            let key = mutation.key();
            ctx.coordinator.invalidate(&mut ctx.store, &key);
            vec![key]
        }
    };
    for key in &invalidated {
        cmds.push(DashboardCmd::Log(DiagnosticEvent::Invalidated { key: key.clone() }));
    }
    cmds.extend(reload_displaying(model, ctx, &invalidated, Some(id), now));
    model.push_notification(
        NotificationLevel::Info,
        format!("saved {} for {}", mutation.kind.as_str(), mutation.subject),
    );
    DashboardCmd::batch(cmds)
}

/// Re-read `keys` in every panel that shows them, except `skip`.
fn reload_displaying(
    model: &mut DashboardModel,
    ctx: &mut CacheContext,
    keys: &[CacheKey],
    skip: Option<PanelId>,
    now: DateTime<Utc>,
) -> Vec<DashboardCmd> {
    model
        .panels
        .iter_mut()
        .filter(|p| Some(p.id()) != skip && keys.iter().any(|k| p.owns(k)))
        .map(|panel| {
            let requests = panel.revalidate(ctx, now);
            dispatch(panel, requests)
        })
        .collect()
}

// ──────────────────── input ────────────────────

fn handle_key(
    model: &mut DashboardModel,
    ctx: &mut CacheContext,
    key: &KeyEvent,
    now: DateTime<Utc>,
) -> DashboardCmd {
    let context = InputContext {
        modal: model.active_modal(),
    };
    let resolution = super::input::resolve_key_event(key, context);
    let Some(action) = resolution.action else {
        return DashboardCmd::None;
    };

    match action {
        InputAction::Quit => {
            model.quit = true;
            DashboardCmd::Quit
        }
        InputAction::FocusNextPanel => {
            if let Some(ring) = model.panel_focus.as_mut() {
                ring.next();
            }
            DashboardCmd::None
        }
        InputAction::FocusPrevPanel => {
            if let Some(ring) = model.panel_focus.as_mut() {
                ring.prev();
            }
            DashboardCmd::None
        }
        InputAction::Scroll(scroll) => {
            if let Some(panel) = model.focused_panel_mut() {
                let scroller = panel.scroller_mut();
                match scroll {
                    ScrollAction::Down => scroller.cursor_down(),
                    ScrollAction::Up => scroller.cursor_up(),
                    ScrollAction::PageDown => scroller.page_down(),
                    ScrollAction::PageUp => scroller.page_up(),
                    ScrollAction::Start => scroller.cursor_to_start(),
                    ScrollAction::End => scroller.cursor_to_end(),
                }
            }
            DashboardCmd::None
        }
        InputAction::ForceRefresh => force_refresh_focused(model, ctx, now),
        InputAction::OpenEditor => {
            let editable = model.focused_panel().filter(|p| {
                p.form().is_some() && p.phase().shows_data() && !p.mutation_pending()
            });
            if let Some(panel) = editable {
                let id = panel.id();
                model.modals.push(Modal::EditForm { panel: id });
            }
            DashboardCmd::None
        }
        InputAction::ToggleHelp => {
            if model.active_modal() == Some(Modal::Help) {
                model.modals.pop();
            } else {
                model.modals.push(Modal::Help);
            }
            DashboardCmd::None
        }
        InputAction::CloseHelp | InputAction::CancelDiscard => {
            model.modals.pop();
            DashboardCmd::None
        }
        InputAction::DismissNotification => {
            model.dismiss_notification();
            DashboardCmd::None
        }
        InputAction::ConfirmDiscard => {
            if let Some(Modal::ConfirmDiscard { panel }) = model.modals.pop() {
                if model.active_modal() == Some(Modal::EditForm { panel }) {
                    model.modals.pop();
                }
                if let Some(form) = model.panel_mut(panel).and_then(PanelController::form_mut) {
                    form.revert();
                }
            }
            DashboardCmd::None
        }
        InputAction::Form(form_key) => handle_form_key(model, form_key),
    }
}

fn handle_form_key(model: &mut DashboardModel, form_key: FormKey) -> DashboardCmd {
    let Some(Modal::EditForm { panel: id }) = model.active_modal() else {
        return DashboardCmd::None;
    };
    let Some(action) = model
        .panel_mut(id)
        .and_then(PanelController::form_mut)
        .map(|form| form.handle_key(form_key))
    else {
        model.modals.pop();
        return DashboardCmd::None;
    };

    match action {
        FormAction::Save(mutation) => {
            model.modals.pop();
            if let Some(panel) = model.panel_mut(id) {
                panel.begin_mutation();
            }
            DashboardCmd::Mutate { panel: id, mutation }
        }
        FormAction::NothingToSave | FormAction::Cancel { dirty: false } => {
            model.modals.pop();
            DashboardCmd::None
        }
        FormAction::Cancel { dirty: true } => {
            model.modals.push(Modal::ConfirmDiscard { panel: id });
            DashboardCmd::None
        }
        FormAction::None | FormAction::Edited | FormAction::FocusMoved { .. } => {
            DashboardCmd::None
        }
    }
}

// ──────────────────── helpers ────────────────────

fn force_refresh_focused(
    model: &mut DashboardModel,
    ctx: &mut CacheContext,
    now: DateTime<Utc>,
) -> DashboardCmd {
    let Some(panel) = model.focused_panel_mut() else {
        return DashboardCmd::None;
    };
    let requests = panel.force_refresh(ctx, now);
    dispatch(panel, requests)
}

fn with_panel<F>(model: &mut DashboardModel, id: PanelId, f: F) -> DashboardCmd
where
    F: FnOnce(&mut PanelController) -> DashboardCmd,
{
    model.panel_mut(id).map_or(DashboardCmd::None, f)
}

/// Commands that run `requests` for `panel`: one fan-out for fleet panels,
/// one pool fetch per request otherwise.
fn dispatch(panel: &PanelController, requests: Vec<FetchRequest>) -> DashboardCmd {
    if requests.is_empty() {
        return DashboardCmd::None;
    }
    if panel.source().is_fleet() {
        return DashboardCmd::FanOut {
            panel: panel.id(),
            requests,
        };
    }
    DashboardCmd::batch(requests.into_iter().map(DashboardCmd::Fetch).collect())
}
