//! Generic focus-cycling edit form.
//!
//! One [`FormController`] serves every editable device widget: the widget
//! supplies a [`FieldSet`] (its fields in tab order) and a save function that
//! turns the edited values into a [`Mutation`]. Panels hold forms as
//! `Box<dyn FormHandle>` so they do not need to know the field type.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::cache::entry::Payload;
use crate::cache::key::{DataKind, SubjectId};
use crate::core::errors::Result;
use crate::refresh::fetcher::Mutation;
use crate::tui::focus::{FocusRing, FocusTransition};

/// Maximum characters accepted in one field.
const MAX_FIELD_LEN: usize = 64;

/// An enumerable, ordered set of editable fields.
pub trait FieldSet: Copy + Eq + fmt::Debug + Send + 'static {
    /// Every field, in focus order.
    fn all() -> &'static [Self];
    /// Human-readable label.
    fn label(self) -> &'static str;
    /// Key of this field in the device payload and in mutations.
    fn key(self) -> &'static str;
}

/// Builds the mutation for a save from the changed fields.
pub type SaveFn = fn(&SubjectId, DataKind, BTreeMap<String, String>) -> Mutation;

/// Save function that sends exactly the changed fields.
#[must_use]
pub fn changed_fields_mutation(
    subject: &SubjectId,
    kind: DataKind,
    changes: BTreeMap<String, String>,
) -> Mutation {
    Mutation {
        subject: subject.clone(),
        kind,
        changes,
    }
}

/// Editing keystrokes, already decoded from the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormKey {
    Next,
    Prev,
    Char(char),
    Backspace,
    ClearField,
    Save,
    Cancel,
}

/// What a keystroke did to the form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormAction {
    None,
    /// Focus moved; labels of the blurred and focused fields.
    FocusMoved {
        blurred: &'static str,
        focused: &'static str,
    },
    Edited,
    Save(Mutation),
    NothingToSave,
    /// The user asked to leave; `dirty` means unsaved edits exist.
    Cancel { dirty: bool },
}

/// Read-only view of one field for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldView {
    pub label: &'static str,
    pub value: String,
    pub focused: bool,
    pub dirty: bool,
}

/// Object-safe face of a [`FormController`].
pub trait FormHandle: fmt::Debug + Send {
    fn kind(&self) -> DataKind;
    fn set_subject(&mut self, subject: SubjectId);
    /// Replace field values with those found in `payload`, discarding edits.
    fn load_from(&mut self, payload: &Payload);
    fn handle_key(&mut self, key: FormKey) -> FormAction;
    fn is_dirty(&self) -> bool;
    fn revert(&mut self);
    fn focused_label(&self) -> &'static str;
    fn fields(&self) -> Vec<FieldView>;
}

/// Edit form over field set `F`.
pub struct FormController<F: FieldSet> {
    subject: SubjectId,
    kind: DataKind,
    ring: FocusRing<F>,
    values: Vec<String>,
    original: Vec<String>,
    caret: usize,
    save: SaveFn,
}

impl<F: FieldSet> fmt::Debug for FormController<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormController")
            .field("subject", &self.subject)
            .field("kind", &self.kind)
            .field("focused", &self.ring.focused())
            .field("dirty", &self.is_dirty())
            .finish_non_exhaustive()
    }
}

impl<F: FieldSet> FormController<F> {
    /// # Errors
    /// [`DpcError::EmptyFocusRing`](crate::core::errors::DpcError::EmptyFocusRing)
    /// if `F::all()` is empty.
    pub fn new(subject: SubjectId, kind: DataKind, save: SaveFn) -> Result<Self> {
        let ring = FocusRing::new(F::all().to_vec())?;
        let n = F::all().len();
        Ok(Self {
            subject,
            kind,
            ring,
            values: vec![String::new(); n],
            original: vec![String::new(); n],
            caret: 0,
            save,
        })
    }

    #[must_use]
    pub fn focused(&self) -> F {
        self.ring.focused()
    }

    #[must_use]
    pub fn value(&self, field: F) -> &str {
        self.index_of(field)
            .map_or("", |idx| self.values[idx].as_str())
    }

    /// Caret position inside the focused field.
    #[must_use]
    pub const fn caret(&self) -> usize {
        self.caret
    }

    pub fn next_field(&mut self) -> Option<FocusTransition<F>> {
        let t = self.ring.next();
        self.on_transition(t);
        t
    }

    pub fn prev_field(&mut self) -> Option<FocusTransition<F>> {
        let t = self.ring.prev();
        self.on_transition(t);
        t
    }

    pub fn focus_field(&mut self, field: F) -> Option<FocusTransition<F>> {
        let t = self.ring.focus_field(field);
        self.on_transition(t);
        t
    }

    pub fn insert_char(&mut self, c: char) -> bool {
        if c.is_control() {
            return false;
        }
        let idx = self.ring.active_index();
        let value = &mut self.values[idx];
        if value.chars().count() >= MAX_FIELD_LEN {
            return false;
        }
        let byte_at = byte_offset(value, self.caret);
        value.insert(byte_at, c);
        self.caret += 1;
        true
    }

    pub fn backspace(&mut self) -> bool {
        if self.caret == 0 {
            return false;
        }
        let idx = self.ring.active_index();
        let value = &mut self.values[idx];
        let byte_at = byte_offset(value, self.caret - 1);
        value.remove(byte_at);
        self.caret -= 1;
        true
    }

    pub fn clear_field(&mut self) -> bool {
        let idx = self.ring.active_index();
        if self.values[idx].is_empty() {
            return false;
        }
        self.values[idx].clear();
        self.caret = 0;
        true
    }

    /// Fields whose value differs from what was loaded, keyed by payload key.
    #[must_use]
    pub fn changes(&self) -> BTreeMap<String, String> {
        F::all()
            .iter()
            .zip(self.values.iter().zip(&self.original))
            .filter(|(_, (value, original))| value != original)
            .map(|(field, (value, _))| (field.key().to_string(), value.clone()))
            .collect()
    }

    /// Build the mutation for the current edits. `None` when nothing changed.
    #[must_use]
    pub fn save(&self) -> Option<Mutation> {
        let changes = self.changes();
        if changes.is_empty() {
            return None;
        }
        Some((self.save)(&self.subject, self.kind, changes))
    }

    fn index_of(&self, field: F) -> Option<usize> {
        F::all().iter().position(|f| *f == field)
    }

    fn on_transition(&mut self, transition: Option<FocusTransition<F>>) {
        if transition.is_some() {
            self.caret = self.values[self.ring.active_index()].chars().count();
        }
    }
}

impl<F: FieldSet> FormHandle for FormController<F> {
    fn kind(&self) -> DataKind {
        self.kind
    }

    fn set_subject(&mut self, subject: SubjectId) {
        self.subject = subject;
        self.revert();
    }

    fn load_from(&mut self, payload: &Payload) {
        for (idx, field) in F::all().iter().enumerate() {
            let value = match payload.value().get(field.key()) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            self.values[idx] = value.clone();
            self.original[idx] = value;
        }
        self.caret = self.values[self.ring.active_index()].chars().count();
    }

    fn handle_key(&mut self, key: FormKey) -> FormAction {
        match key {
            FormKey::Next | FormKey::Prev => {
                let t = if key == FormKey::Next {
                    self.next_field()
                } else {
                    self.prev_field()
                };
                t.map_or(FormAction::None, |t| FormAction::FocusMoved {
                    blurred: t.blurred.label(),
                    focused: t.focused.label(),
                })
            }
            FormKey::Char(c) => edited(self.insert_char(c)),
            FormKey::Backspace => edited(self.backspace()),
            FormKey::ClearField => edited(self.clear_field()),
            FormKey::Save => self.save().map_or(FormAction::NothingToSave, FormAction::Save),
            FormKey::Cancel => FormAction::Cancel {
                dirty: self.is_dirty(),
            },
        }
    }

    fn is_dirty(&self) -> bool {
        self.values != self.original
    }

    fn revert(&mut self) {
        self.values.clone_from(&self.original);
        self.caret = self.values[self.ring.active_index()].chars().count();
    }

    fn focused_label(&self) -> &'static str {
        self.ring.focused().label()
    }

    fn fields(&self) -> Vec<FieldView> {
        F::all()
            .iter()
            .enumerate()
            .map(|(idx, field)| FieldView {
                label: field.label(),
                value: self.values[idx].clone(),
                focused: self.ring.is_focused(*field),
                dirty: self.values[idx] != self.original[idx],
            })
            .collect()
    }
}

const fn edited(changed: bool) -> FormAction {
    if changed {
        FormAction::Edited
    } else {
        FormAction::None
    }
}

fn byte_offset(s: &str, char_idx: usize) -> usize {
    s.char_indices().nth(char_idx).map_or(s.len(), |(b, _)| b)
}

// ──────────────────── field sets ────────────────────

/// Editable settings of a relay switch component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchConfigField {
    Name,
    InitialState,
    AutoOnDelay,
    AutoOffDelay,
    PowerLimit,
}

impl FieldSet for SwitchConfigField {
    fn all() -> &'static [Self] {
        &[
            Self::Name,
            Self::InitialState,
            Self::AutoOnDelay,
            Self::AutoOffDelay,
            Self::PowerLimit,
        ]
    }

    fn label(self) -> &'static str {
        match self {
            Self::Name => "Name",
            Self::InitialState => "Initial state",
            Self::AutoOnDelay => "Auto-on delay (s)",
            Self::AutoOffDelay => "Auto-off delay (s)",
            Self::PowerLimit => "Power limit (W)",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::InitialState => "initial_state",
            Self::AutoOnDelay => "auto_on_delay",
            Self::AutoOffDelay => "auto_off_delay",
            Self::PowerLimit => "power_limit",
        }
    }
}

/// Boxed switch-config form for `subject`.
///
/// # Errors
/// Never in practice; the switch field set is non-empty.
pub fn switch_config_form(subject: SubjectId) -> Result<Box<dyn FormHandle>> {
    let form = FormController::<SwitchConfigField>::new(
        subject,
        DataKind::Config,
        changed_fields_mutation,
    )?;
    Ok(Box::new(form))
}
