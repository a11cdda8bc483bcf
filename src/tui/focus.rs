//! Cyclic focus over a fixed field list, and the modal stack layered over
//! panels.

#![allow(missing_docs)]

use crate::core::errors::{DpcError, Result};
use crate::tui::panel::PanelId;

// ──────────────────── focus ring ────────────────────

/// Blur/focus pair emitted atomically when focus moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusTransition<F> {
    pub blurred: F,
    pub focused: F,
}

/// Ordered, non-empty set of focusable ids with exactly one active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusRing<F> {
    fields: Vec<F>,
    active: usize,
}

impl<F: Copy + Eq> FocusRing<F> {
    /// Ring over `fields`, focused on the first.
    ///
    /// # Errors
    /// [`DpcError::EmptyFocusRing`] if `fields` is empty.
    pub fn new(fields: Vec<F>) -> Result<Self> {
        if fields.is_empty() {
            return Err(DpcError::EmptyFocusRing);
        }
        Ok(Self { fields, active: 0 })
    }

    #[must_use]
    pub fn focused(&self) -> F {
        self.fields[self.active]
    }

    #[must_use]
    pub const fn active_index(&self) -> usize {
        self.active
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Always false; an empty ring cannot be constructed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn fields(&self) -> &[F] {
        &self.fields
    }

    #[must_use]
    pub fn is_focused(&self, field: F) -> bool {
        self.focused() == field
    }

    pub fn next(&mut self) -> Option<FocusTransition<F>> {
        self.move_to((self.active + 1) % self.fields.len())
    }

    pub fn prev(&mut self) -> Option<FocusTransition<F>> {
        let target = if self.active == 0 {
            self.fields.len() - 1
        } else {
            self.active - 1
        };
        self.move_to(target)
    }

    /// Jump straight to `field`. `None` if it is already focused or not in
    /// the ring.
    pub fn focus_field(&mut self, field: F) -> Option<FocusTransition<F>> {
        let idx = self.fields.iter().position(|f| *f == field)?;
        self.move_to(idx)
    }

    /// Replace the field list, keeping focus on the same field if it survives.
    ///
    /// # Errors
    /// [`DpcError::EmptyFocusRing`] if `fields` is empty; the ring is unchanged.
    pub fn set_fields(&mut self, fields: Vec<F>) -> Result<()> {
        if fields.is_empty() {
            return Err(DpcError::EmptyFocusRing);
        }
        let current = self.focused();
        self.active = fields
            .iter()
            .position(|f| *f == current)
            .unwrap_or_else(|| self.active.min(fields.len() - 1));
        self.fields = fields;
        Ok(())
    }

    fn move_to(&mut self, target: usize) -> Option<FocusTransition<F>> {
        if target == self.active {
            return None;
        }
        let blurred = self.focused();
        self.active = target;
        Some(FocusTransition {
            blurred,
            focused: self.focused(),
        })
    }
}

// ──────────────────── modal stack ────────────────────

/// Surfaces stacked over the panel grid. The top one owns input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modal {
    /// Edit form hosted by a panel.
    EditForm { panel: PanelId },
    /// "Discard unsaved changes?" over an edit form.
    ConfirmDiscard { panel: PanelId },
    /// Key binding reference.
    Help,
}

impl Modal {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::EditForm { .. } => "edit",
            Self::ConfirmDiscard { .. } => "confirm-discard",
            Self::Help => "help",
        }
    }
}

/// LIFO stack of modals. Popping never touches the state beneath.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModalStack {
    stack: Vec<Modal>,
}

impl ModalStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `modal` unless it is already on top.
    pub fn push(&mut self, modal: Modal) {
        if self.top() != Some(modal) {
            self.stack.push(modal);
        }
    }

    pub fn pop(&mut self) -> Option<Modal> {
        self.stack.pop()
    }

    #[must_use]
    pub fn top(&self) -> Option<Modal> {
        self.stack.last().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Drop every modal that belongs to `panel` (the panel closed).
    pub fn remove_panel(&mut self, panel: PanelId) {
        self.stack.retain(|m| match m {
            Modal::EditForm { panel: p } | Modal::ConfirmDiscard { panel: p } => *p != panel,
            Modal::Help => true,
        });
    }

    pub fn clear(&mut self) {
        self.stack.clear();
    }
}
