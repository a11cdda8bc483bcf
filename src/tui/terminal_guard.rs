//! RAII terminal lifecycle guard and the interactive render sink.
//!
//! [`TerminalGuard`] enters raw mode and the alternate screen on construction,
//! and restores the terminal on [`Drop`], even during panics or early error
//! returns. A panic hook restores the terminal *before* the panic message is
//! printed so the backtrace is readable.

use std::io::{self, Stdout, Write};
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use crossterm::event::{self, Event};
use crossterm::terminal::{
    self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::{cursor, execute, queue};

use crate::core::errors::{DpcError, Result};
use crate::tui::model::DashboardMsg;
use crate::tui::snapshot::{DashboardSnapshot, RenderSink, render_text};

/// Set while raw mode is active. Checked by the panic hook.
static RAW_MODE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Guard that owns raw mode and the alternate screen.
pub struct TerminalGuard {
    hook_installed: bool,
}

impl TerminalGuard {
    /// Enter raw mode and alternate screen, installing a panic-safe cleanup hook.
    ///
    /// # Errors
    /// Returns I/O errors if terminal setup fails. On partial failure the
    /// terminal is restored before returning.
    pub fn new() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        RAW_MODE_ACTIVE.store(true, Ordering::SeqCst);
        if let Err(e) = execute!(io::stdout(), EnterAlternateScreen, cursor::Hide) {
            restore_terminal_best_effort();
            return Err(e);
        }

        let prev = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            restore_terminal_best_effort();
            prev(info);
        }));

        Ok(Self {
            hook_installed: true,
        })
    }

    /// Terminal dimensions (columns, rows), falling back to 80x24 without a tty.
    #[must_use]
    pub fn terminal_size() -> (u16, u16) {
        terminal::size()
            .ok()
            .filter(|&(c, r)| c > 0 && r > 0)
            .unwrap_or((80, 24))
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        restore_terminal_best_effort();
        if self.hook_installed {
            let _ = panic::take_hook();
        }
    }
}

/// Safe to call multiple times; the flag prevents redundant work.
fn restore_terminal_best_effort() {
    if RAW_MODE_ACTIVE.swap(false, Ordering::SeqCst) {
        let _ = execute!(io::stdout(), cursor::Show, LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}

// ──────────────────── input thread ────────────────────

/// Forward key and resize events into the event loop until it hangs up.
///
/// # Errors
/// [`DpcError::Runtime`] if the thread cannot be spawned.
pub fn spawn_input_reader(tx: Sender<DashboardMsg>) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("dpc-input".to_string())
        .spawn(move || {
            loop {
                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {}
                    Ok(false) => {
                        if !RAW_MODE_ACTIVE.load(Ordering::SeqCst) {
                            break;
                        }
                        continue;
                    }
                    Err(_) => break,
                }
                let msg = match event::read() {
                    Ok(Event::Key(key)) => DashboardMsg::Key(key),
                    Ok(Event::Resize(cols, rows)) => DashboardMsg::Resize { cols, rows },
                    Ok(_) => continue,
                    Err(_) => break,
                };
                if tx.send(msg).is_err() {
                    break;
                }
            }
        })
        .map_err(|e| DpcError::Runtime {
            details: format!("failed to spawn input thread: {e}"),
        })
}

// ──────────────────── sink ────────────────────

/// Redraws the whole screen from [`render_text`] on every snapshot.
pub struct TerminalSink {
    out: Stdout,
}

impl TerminalSink {
    #[must_use]
    pub fn new() -> Self {
        Self { out: io::stdout() }
    }
}

impl Default for TerminalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderSink for TerminalSink {
    fn render(&mut self, snapshot: &DashboardSnapshot) -> Result<()> {
        let text = render_text(snapshot);
        let io_err = |e: io::Error| DpcError::io("<stdout>", e);
        queue!(self.out, cursor::MoveTo(0, 0), Clear(ClearType::All)).map_err(io_err)?;
        let height = usize::from(snapshot.terminal_size.1.max(1));
        for (row, line) in text.lines().take(height).enumerate() {
            let row = u16::try_from(row).unwrap_or(u16::MAX);
            queue!(self.out, cursor::MoveTo(0, row)).map_err(io_err)?;
            self.out.write_all(line.as_bytes()).map_err(io_err)?;
        }
        self.out.flush().map_err(io_err)
    }
}

// ──────────────────── tests ────────────────────
