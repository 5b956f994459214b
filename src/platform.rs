//! Terminal mode and process signal plumbing for the attach phase.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

/// Switches the controlling terminal in and out of raw mode.
pub trait TerminalMode {
    fn enter_raw(&mut self) -> io::Result<()>;
    fn restore(&mut self) -> io::Result<()>;
}

/// The real terminal, via crossterm.
#[derive(Debug, Default)]
pub struct CrosstermMode;

impl TerminalMode for CrosstermMode {
    fn enter_raw(&mut self) -> io::Result<()> {
        crossterm::terminal::enable_raw_mode()
    }

    fn restore(&mut self) -> io::Result<()> {
        crossterm::terminal::disable_raw_mode()
    }
}

/// Raw mode for as long as the guard lives; restored on drop, including
/// during unwinding.
pub struct RawModeGuard<'a, M: TerminalMode + ?Sized> {
    mode: &'a mut M,
    active: bool,
}

impl<'a, M: TerminalMode + ?Sized> RawModeGuard<'a, M> {
    pub fn enter(mode: &'a mut M) -> io::Result<Self> {
        mode.enter_raw()?;
        Ok(RawModeGuard { mode, active: true })
    }

    /// Restore now and report the result instead of swallowing it in `drop`.
    pub fn restore(mut self) -> io::Result<()> {
        self.active = false;
        self.mode.restore()
    }
}

impl<M: TerminalMode + ?Sized> Drop for RawModeGuard<'_, M> {
    fn drop(&mut self) {
        if self.active {
            let _ = self.mode.restore();
        }
    }
}

static TERMINATE: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
const TERMINATION_SIGNALS: [libc::c_int; 3] = [libc::SIGINT, libc::SIGTERM, libc::SIGHUP];

#[cfg(unix)]
extern "C" fn on_terminate(_sig: libc::c_int) {
    TERMINATE.store(true, Ordering::SeqCst);
}

/// While alive, SIGINT, SIGTERM and SIGHUP set a flag instead of killing the
/// process, so the attacher can restore the terminal first. Dropping it puts
/// the default dispositions back.
pub struct TerminationSignals {
    _private: (),
}

impl TerminationSignals {
    #[cfg(unix)]
    pub fn subscribe() -> io::Result<Self> {
        TERMINATE.store(false, Ordering::SeqCst);
        let handler = on_terminate as extern "C" fn(libc::c_int) as libc::sighandler_t;
        for sig in TERMINATION_SIGNALS {
            // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
            if unsafe { libc::signal(sig, handler) } == libc::SIG_ERR {
                reset_handlers();
                return Err(io::Error::last_os_error());
            }
        }
        Ok(TerminationSignals { _private: () })
    }

    #[cfg(not(unix))]
    pub fn subscribe() -> io::Result<Self> {
        TERMINATE.store(false, Ordering::SeqCst);
        Ok(TerminationSignals { _private: () })
    }
}

/// Whether a termination signal arrived since the last `subscribe`.
pub fn termination_requested() -> bool {
    TERMINATE.load(Ordering::SeqCst)
}

#[cfg(unix)]
fn reset_handlers() {
    for sig in TERMINATION_SIGNALS {
        // SAFETY: restoring the default disposition has no preconditions.
        unsafe { libc::signal(sig, libc::SIG_DFL) };
    }
}

impl Drop for TerminationSignals {
    fn drop(&mut self) {
        #[cfg(unix)]
        reset_handlers();
    }
}

/// Current size of the controlling terminal as `(cols, rows)`.
pub fn terminal_size() -> io::Result<(u16, u16)> {
    crossterm::terminal::size()
}
