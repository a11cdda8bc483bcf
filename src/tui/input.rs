//! Key routing for the dashboard: the top modal owns input, then global keys.

#![allow(missing_docs)]

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use super::focus::Modal;
use super::form::FormKey;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputContext {
    pub modal: Option<Modal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAction {
    Down,
    Up,
    PageDown,
    PageUp,
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    Quit,
    FocusNextPanel,
    FocusPrevPanel,
    Scroll(ScrollAction),
    ForceRefresh,
    OpenEditor,
    ToggleHelp,
    CloseHelp,
    DismissNotification,
    /// Keystroke for the edit form on top of the modal stack.
    Form(FormKey),
    ConfirmDiscard,
    CancelDiscard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputResolution {
    pub action: Option<InputAction>,
    pub consumed: bool,
}

impl InputResolution {
    const fn action(action: InputAction) -> Self {
        Self {
            action: Some(action),
            consumed: true,
        }
    }

    const fn consumed_without_action() -> Self {
        Self {
            action: None,
            consumed: true,
        }
    }

    const fn passthrough() -> Self {
        Self {
            action: None,
            consumed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelpBinding {
    pub keys: &'static str,
    pub description: &'static str,
}

/// Resolve a key event. Modals swallow every key they do not bind, so
/// nothing leaks to the panels underneath.
#[must_use]
pub fn resolve_key_event(key: &KeyEvent, context: InputContext) -> InputResolution {
    if key.kind == KeyEventKind::Release {
        return InputResolution::passthrough();
    }
    if is_ctrl(key, 'c') {
        return InputResolution::action(InputAction::Quit);
    }
    match context.modal {
        Some(Modal::Help) => resolve_help_key(key),
        Some(Modal::ConfirmDiscard { .. }) => resolve_confirm_key(key),
        Some(Modal::EditForm { .. }) => resolve_form_key(key),
        None => resolve_global_key(key),
    }
}

/// Key bindings listed in the help modal.
#[must_use]
pub const fn help_bindings() -> &'static [HelpBinding] {
    &HELP_BINDINGS
}

fn is_ctrl(key: &KeyEvent, c: char) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char(c)
}

fn resolve_help_key(key: &KeyEvent) -> InputResolution {
    match key.code {
        KeyCode::Esc | KeyCode::Char('?' | 'q') => InputResolution::action(InputAction::CloseHelp),
        _ => InputResolution::consumed_without_action(),
    }
}

fn resolve_confirm_key(key: &KeyEvent) -> InputResolution {
    match key.code {
        KeyCode::Char('y' | 'Y') | KeyCode::Enter => {
            InputResolution::action(InputAction::ConfirmDiscard)
        }
        KeyCode::Char('n' | 'N') | KeyCode::Esc => {
            InputResolution::action(InputAction::CancelDiscard)
        }
        _ => InputResolution::consumed_without_action(),
    }
}

fn resolve_form_key(key: &KeyEvent) -> InputResolution {
    if is_ctrl(key, 's') {
        return InputResolution::action(InputAction::Form(FormKey::Save));
    }
    if is_ctrl(key, 'u') {
        return InputResolution::action(InputAction::Form(FormKey::ClearField));
    }
    let form_key = match key.code {
        KeyCode::Tab | KeyCode::Down => FormKey::Next,
        KeyCode::BackTab | KeyCode::Up => FormKey::Prev,
        KeyCode::Enter => FormKey::Save,
        KeyCode::Esc => FormKey::Cancel,
        KeyCode::Backspace => FormKey::Backspace,
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => FormKey::Char(c),
        _ => return InputResolution::consumed_without_action(),
    };
    InputResolution::action(InputAction::Form(form_key))
}

fn resolve_global_key(key: &KeyEvent) -> InputResolution {
    let action = match key.code {
        KeyCode::Char('q') => InputAction::Quit,
        KeyCode::Tab => InputAction::FocusNextPanel,
        KeyCode::BackTab => InputAction::FocusPrevPanel,
        KeyCode::Char('j') | KeyCode::Down => InputAction::Scroll(ScrollAction::Down),
        KeyCode::Char('k') | KeyCode::Up => InputAction::Scroll(ScrollAction::Up),
        KeyCode::PageDown => InputAction::Scroll(ScrollAction::PageDown),
        KeyCode::PageUp => InputAction::Scroll(ScrollAction::PageUp),
        KeyCode::Char('g') | KeyCode::Home => InputAction::Scroll(ScrollAction::Start),
        KeyCode::Char('G') | KeyCode::End => InputAction::Scroll(ScrollAction::End),
        KeyCode::Char('r') => InputAction::ForceRefresh,
        KeyCode::Char('e') | KeyCode::Enter => InputAction::OpenEditor,
        KeyCode::Char('?') => InputAction::ToggleHelp,
        KeyCode::Char('x') => InputAction::DismissNotification,
        _ => return InputResolution::passthrough(),
    };
    InputResolution::action(action)
}

const HELP_BINDINGS: [HelpBinding; 10] = [
    HelpBinding {
        keys: "Tab / Shift-Tab",
        description: "Focus next / previous panel",
    },
    HelpBinding {
        keys: "j k / arrows",
        description: "Move cursor",
    },
    HelpBinding {
        keys: "PgDn / PgUp",
        description: "Page down / up",
    },
    HelpBinding {
        keys: "g G / Home End",
        description: "Jump to first / last row",
    },
    HelpBinding {
        keys: "r",
        description: "Refresh focused panel",
    },
    HelpBinding {
        keys: "e / Enter",
        description: "Edit device settings",
    },
    HelpBinding {
        keys: "Enter / Ctrl-S",
        description: "Save form",
    },
    HelpBinding {
        keys: "Esc",
        description: "Close form or dialog",
    },
    HelpBinding {
        keys: "x",
        description: "Dismiss oldest notification",
    },
    HelpBinding {
        keys: "q / Ctrl-C",
        description: "Quit",
    },
];
