//! Session attacher: runs `tmux attach-session` on a pseudo-terminal and
//! bridges it to the real terminal until the session ends.
//!
//! Three threads feed one channel consumed by the calling thread:
//! stdin to PTY (fire and forget), PTY to stdout (reports `Closed` on end
//! of stream), and a watcher that reports terminal resizes and termination
//! signals. The caller applies resizes to the PTY master and stops on
//! `Closed` or `Interrupted`.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use portable_pty::{native_pty_system, CommandBuilder, PtySize};

use crate::platform::{terminal_size, RawModeGuard, TerminalMode, TerminationSignals};
use crate::tmux::Tmux;

/// How often the watcher samples the terminal size and signal flag.
const WATCH_INTERVAL: Duration = Duration::from_millis(100);
const COPY_BUF: usize = 8192;
/// PTY size used when the controlling terminal cannot report one.
const FALLBACK_SIZE: (u16, u16) = (120, 30);

#[derive(Debug)]
pub enum AttachEvent {
    Resize { cols: u16, rows: u16 },
    /// PTY output reached end of stream (`Ok`) or failed.
    Closed(io::Result<u64>),
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// tmux exited (session ended or client detached).
    Finished,
    /// A termination signal arrived while attached.
    Interrupted,
}

/// Attach the controlling terminal to `tmux`'s session.
pub fn attach_session<M: TerminalMode + ?Sized>(tmux: &Tmux, mode: &mut M) -> io::Result<AttachOutcome> {
    let (cols, rows) = terminal_size().unwrap_or(FALLBACK_SIZE);
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize { rows, cols, pixel_width: 0, pixel_height: 0 })
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("openpty error: {e}")))?;

    let inv = tmux.attach_session();
    let mut cmd = CommandBuilder::new(&inv.program);
    cmd.args(&inv.args);
    if let Ok(cwd) = std::env::current_dir() {
        cmd.cwd(cwd);
    }
    let mut child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("spawn tmux error: {e}")))?;
    // Keep only the child's reference to the slave so the master sees EOF when tmux exits.
    drop(pair.slave);

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("clone reader error: {e}")))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("take writer error: {e}")))?;

    let signals = TerminationSignals::subscribe()?;
    let (tx, rx) = mpsc::channel::<AttachEvent>();
    let stop = Arc::new(AtomicBool::new(false));

    spawn_input_pump(writer);
    {
        let tx = tx.clone();
        thread::spawn(move || {
            let mut out = io::stdout();
            let _ = tx.send(AttachEvent::Closed(pump(reader, &mut out)));
        });
    }
    let watcher = spawn_watcher(
        tx,
        stop.clone(),
        WATCH_INTERVAL,
        || terminal_size().ok(),
        crate::platform::termination_requested,
    );

    let master = pair.master;
    let result = relay_session(mode, &rx, |cols, rows| {
        master
            .resize(PtySize { rows, cols, pixel_width: 0, pixel_height: 0 })
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("resize error: {e}")))
    });

    stop.store(true, Ordering::SeqCst);
    let _ = watcher.join();
    drop(signals);

    if matches!(result, Ok(AttachOutcome::Interrupted) | Err(_)) {
        let _ = child.kill();
    }
    let status = child.wait();
    drop(master);

    let outcome = result?;
    match status {
        Ok(s) if !s.success() && outcome == AttachOutcome::Finished => Err(io::Error::new(
            io::ErrorKind::Other,
            format!("tmux attach exited with code {}", s.exit_code()),
        )),
        _ => Ok(outcome),
    }
}

/// Hold raw mode and dispatch events until the session closes or is
/// interrupted. Raw mode is restored on every return path.
pub fn relay_session<M, F>(mode: &mut M, events: &mpsc::Receiver<AttachEvent>, mut resize: F) -> io::Result<AttachOutcome>
where
    M: TerminalMode + ?Sized,
    F: FnMut(u16, u16) -> io::Result<()>,
{
    let guard = RawModeGuard::enter(mode)?;
    let outcome = loop {
        match events.recv() {
            Ok(AttachEvent::Resize { cols, rows }) => {
                if let Err(e) = resize(cols, rows) {
                    log::debug!("pty resize to {}x{} failed: {}", cols, rows, e);
                }
            }
            Ok(AttachEvent::Closed(Ok(bytes))) => {
                log::debug!("pty closed after {} bytes", bytes);
                break Ok(AttachOutcome::Finished);
            }
            Ok(AttachEvent::Closed(Err(e))) => break Err(e),
            Ok(AttachEvent::Interrupted) => break Ok(AttachOutcome::Interrupted),
            // every sender gone without a Closed event
            Err(mpsc::RecvError) => break Ok(AttachOutcome::Finished),
        }
    };
    guard.restore()?;
    outcome
}

/// Copy `reader` into `writer`, flushing per chunk, until end of stream.
pub fn pump<R: Read, W: Write>(mut reader: R, writer: &mut W) -> io::Result<u64> {
    let mut buf = [0u8; COPY_BUF];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_pty_hangup(&e) => return Ok(total),
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        writer.flush()?;
        total += n as u64;
    }
}

/// Linux reports a closed PTY slave as EIO on the master rather than EOF.
fn is_pty_hangup(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(libc::EIO)
    }
    #[cfg(not(unix))]
    {
        let _ = e;
        false
    }
}

/// stdin to PTY. Blocks on stdin, so it is never joined; it ends with the
/// process or on the first write error after tmux exits.
fn spawn_input_pump(mut writer: Box<dyn Write + Send>) {
    thread::spawn(move || {
        let stdin = io::stdin();
        let _ = pump(stdin.lock(), &mut writer);
    });
}

/// Poll `size` and `interrupted` every `interval` until `stop` is set.
/// The first size is always sent so the PTY starts at the right size.
pub fn spawn_watcher<S, I>(
    tx: mpsc::Sender<AttachEvent>,
    stop: Arc<AtomicBool>,
    interval: Duration,
    size: S,
    interrupted: I,
) -> thread::JoinHandle<()>
where
    S: Fn() -> Option<(u16, u16)> + Send + 'static,
    I: Fn() -> bool + Send + 'static,
{
    thread::spawn(move || {
        let mut last: Option<(u16, u16)> = None;
        while !stop.load(Ordering::SeqCst) {
            if interrupted() {
                let _ = tx.send(AttachEvent::Interrupted);
                return;
            }
            if let Some(cur) = size() {
                if last != Some(cur) {
                    last = Some(cur);
                    if tx.send(AttachEvent::Resize { cols: cur.0, rows: cur.1 }).is_err() { return; }
                }
            }
            thread::sleep(interval);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::platform::testing::FakeMode;

    /// Fails every write, to stand in for a broken stdout.
    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdout closed"))
        }
        fn flush(&mut self) -> io::Result<()> { Ok(()) }
    }

    #[test]
    fn test_pump_copies_until_eof() {
        let mut out = Vec::new();
        let n = pump(&b"hello tmux"[..], &mut out).unwrap();
        assert_eq!(n, 10);
        assert_eq!(out, b"hello tmux");
    }

    #[test]
    fn test_pump_reports_write_failure() {
        let err = pump(&b"x"[..], &mut BrokenPipe).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[cfg(unix)]
    #[test]
    fn test_pump_treats_eio_as_end_of_stream() {
        struct HungUp;
        impl Read for HungUp {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::from_raw_os_error(libc::EIO))
            }
        }
        assert_eq!(pump(HungUp, &mut Vec::new()).unwrap(), 0);
    }

    #[test]
    fn test_relay_applies_resizes_and_finishes() {
        let mut mode = FakeMode::default();
        let (tx, rx) = mpsc::channel();
        tx.send(AttachEvent::Resize { cols: 200, rows: 50 }).unwrap();
        tx.send(AttachEvent::Resize { cols: 80, rows: 24 }).unwrap();
        tx.send(AttachEvent::Closed(Ok(42))).unwrap();
        let mut sizes = Vec::new();
        let outcome = relay_session(&mut mode, &rx, |c, r| { sizes.push((c, r)); Ok(()) }).unwrap();
        assert_eq!(outcome, AttachOutcome::Finished);
        assert_eq!(sizes, vec![(200, 50), (80, 24)]);
        assert!(!mode.raw);
        assert_eq!(mode.restored, 1);
    }

    #[test]
    fn test_relay_restores_mode_when_copy_fails() {
        let mut mode = FakeMode::default();
        let (tx, rx) = mpsc::channel();
        // run a real pump into a broken writer and forward its result
        let handle = thread::spawn(move || {
            let r = pump(&b"frame"[..], &mut BrokenPipe);
            tx.send(AttachEvent::Closed(r)).unwrap();
        });
        let err = relay_session(&mut mode, &rx, |_, _| Ok(())).unwrap_err();
        handle.join().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(!mode.raw);
        assert_eq!((mode.entered, mode.restored), (1, 1));
    }

    #[test]
    fn test_relay_ignores_resize_errors() {
        let mut mode = FakeMode::default();
        let (tx, rx) = mpsc::channel();
        tx.send(AttachEvent::Resize { cols: 1, rows: 1 }).unwrap();
        tx.send(AttachEvent::Closed(Ok(0))).unwrap();
        let outcome = relay_session(&mut mode, &rx, |_, _| Err(io::Error::new(io::ErrorKind::Other, "bad size"))).unwrap();
        assert_eq!(outcome, AttachOutcome::Finished);
    }

    #[test]
    fn test_relay_interrupted() {
        let mut mode = FakeMode::default();
        let (tx, rx) = mpsc::channel();
        tx.send(AttachEvent::Interrupted).unwrap();
        assert_eq!(relay_session(&mut mode, &rx, |_, _| Ok(())).unwrap(), AttachOutcome::Interrupted);
        assert!(!mode.raw);
    }

    #[test]
    fn test_relay_raw_mode_failure_is_fatal() {
        let mut mode = FakeMode { fail_enter: true, ..Default::default() };
        let (_tx, rx) = mpsc::channel();
        assert!(relay_session(&mut mode, &rx, |_, _| Ok(())).is_err());
        assert_eq!(mode.restored, 0);
    }

    #[test]
    fn test_relay_ends_when_senders_drop() {
        let mut mode = FakeMode::default();
        let (tx, rx) = mpsc::channel::<AttachEvent>();
        drop(tx);
        assert_eq!(relay_session(&mut mode, &rx, |_, _| Ok(())).unwrap(), AttachOutcome::Finished);
        assert_eq!(mode.restored, 1);
    }

    #[test]
    fn test_watcher_sends_initial_and_changed_sizes() {
        let sizes = Arc::new(Mutex::new(vec![(80, 24), (80, 24), (100, 40)]));
        let feed = sizes.clone();
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let h = spawn_watcher(tx, stop.clone(), Duration::from_millis(1), move || {
            let mut v = feed.lock().unwrap();
            if v.len() > 1 { Some(v.remove(0)) } else { v.first().copied() }
        }, || false);

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        stop.store(true, Ordering::SeqCst);
        h.join().unwrap();
        assert!(matches!(first, AttachEvent::Resize { cols: 80, rows: 24 }));
        assert!(matches!(second, AttachEvent::Resize { cols: 100, rows: 40 }));
        // size unchanged afterwards: no further events
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_watcher_reports_interrupt_and_exits() {
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let h = spawn_watcher(tx, stop, Duration::from_millis(1), || None, || true);
        assert!(matches!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), AttachEvent::Interrupted));
        h.join().unwrap();
    }
}
