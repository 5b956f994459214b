//! tmux command construction and execution.
//!
//! Every call into tmux goes through a [`CommandRunner`] as a single
//! request/response: one [`Invocation`] in, captured output or a typed
//! [`CommandError`] out. Nothing here keeps tmux state; the pane builder
//! owns ordering.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::CommandError;
use crate::types::LayoutKind;

/// Format string that makes `new-session` / `split-window` print the new pane id.
pub const PANE_ID_FORMAT: &str = "#{pane_id}";

/// How often a running child is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A program and its argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Invocation { program: program.into(), args: Vec::new() }
    }

    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }

    pub fn args<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(items.into_iter().map(Into::into));
        self
    }

    /// Shell-quoted command line, for logs and `--dry-run`.
    pub fn command_line(&self) -> String {
        let mut words = Vec::with_capacity(self.args.len() + 1);
        words.push(self.program.as_str());
        words.extend(self.args.iter().map(String::as_str));
        shell_words::join(words)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs one external command to completion.
pub trait CommandRunner {
    fn run(&self, inv: &Invocation) -> Result<CommandOutput, CommandError>;
}

/// Runs commands as child processes, killing any that outlive `timeout`.
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        ProcessRunner { timeout }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, inv: &Invocation) -> Result<CommandOutput, CommandError> {
        log::debug!("exec: {}", inv.command_line());
        let mut child = Command::new(&inv.program)
            .args(&inv.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CommandError::Spawn { program: inv.program.clone(), source })?;

        // Drain both pipes on their own threads so a chatty child cannot
        // block on a full pipe while we poll for its exit.
        let stdout = child.stdout.take().map(spawn_drain);
        let stderr = child.stderr.take().map(spawn_drain);

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if start.elapsed() >= self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(CommandError::TimedOut { command: inv.command_line(), after: self.timeout });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(source) => return Err(CommandError::Spawn { program: inv.program.clone(), source }),
            }
        };

        let output = CommandOutput {
            stdout: stdout.map(join_drain).unwrap_or_default(),
            stderr: stderr.map(join_drain).unwrap_or_default(),
        };
        log::debug!("exit {} after {:?}", status, start.elapsed());
        if !status.success() {
            return Err(CommandError::NonZeroExit {
                command: inv.command_line(),
                status: status.to_string(),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

fn spawn_drain<R: Read + Send + 'static>(mut r: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = r.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_drain(h: thread::JoinHandle<String>) -> String {
    h.join().unwrap_or_default()
}

/// Prints each command instead of running it. Commands that would print a
/// pane id get a fabricated one so the pane builder can keep targeting.
pub struct DryRunRunner<W: Write> {
    out: std::cell::RefCell<W>,
    next_pane: std::cell::Cell<usize>,
}

impl<W: Write> DryRunRunner<W> {
    pub fn new(out: W) -> Self {
        DryRunRunner { out: std::cell::RefCell::new(out), next_pane: std::cell::Cell::new(0) }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write> CommandRunner for DryRunRunner<W> {
    fn run(&self, inv: &Invocation) -> Result<CommandOutput, CommandError> {
        writeln!(self.out.borrow_mut(), "{}", inv.command_line())
            .map_err(|source| CommandError::Spawn { program: inv.program.clone(), source })?;
        let mut output = CommandOutput::default();
        if inv.args.iter().any(|a| a == PANE_ID_FORMAT) {
            let id = self.next_pane.get();
            self.next_pane.set(id + 1);
            output.stdout = format!("%{}\n", id);
        }
        Ok(output)
    }
}

/// Builds tmux invocations for one named session.
#[derive(Debug, Clone)]
pub struct Tmux {
    bin: String,
    session: String,
}

impl Tmux {
    pub fn new(bin: impl Into<String>, session: impl Into<String>) -> Self {
        Tmux { bin: bin.into(), session: session.into() }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    fn cmd(&self) -> Invocation {
        Invocation::new(self.bin.clone())
    }

    /// Detached session whose first pane runs `shell_command`.
    pub fn new_session(&self, shell_command: &str) -> Invocation {
        self.cmd()
            .args(["new-session", "-d", "-s", &self.session, "-P", "-F", PANE_ID_FORMAT])
            .arg(shell_command)
    }

    /// Split `target` (a pane id such as `%3`) and run `shell_command` in the new pane.
    /// With `percent`, the new pane gets that share of the target (`-l N%`).
    pub fn split_window(&self, kind: LayoutKind, target: &str, percent: Option<u32>, shell_command: &str) -> Invocation {
        let mut inv = self.cmd().args(["split-window", kind.split_flag(), "-t", target]);
        if let Some(p) = percent {
            inv = inv.arg("-l").arg(format!("{}%", p));
        }
        inv.args(["-P", "-F", PANE_ID_FORMAT]).arg(shell_command)
    }

    pub fn select_layout(&self, layout: &str) -> Invocation {
        self.cmd().args(["select-layout", "-t", &self.session, layout])
    }

    pub fn synchronize_panes(&self) -> Invocation {
        self.cmd().args(["set-window-option", "-t", &self.session, "synchronize-panes", "on"])
    }

    pub fn kill_session(&self) -> Invocation {
        self.cmd().args(["kill-session", "-t", &self.session])
    }

    /// Attach command, run inside the attacher's PTY. `-d` detaches other clients.
    pub fn attach_session(&self) -> Invocation {
        self.cmd().args(["-2", "attach-session", "-d", "-t", &self.session])
    }
}

/// Pull the pane id out of `-P -F '#{pane_id}'` output.
pub fn parse_pane_id(stdout: &str) -> io::Result<String> {
    let id = stdout.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    if id.starts_with('%') && id[1..].parse::<usize>().is_ok() {
        Ok(id.to_string())
    } else {
        Err(io::Error::new(io::ErrorKind::InvalidData, format!("tmux printed no pane id: '{}'", stdout.trim())))
    }
}

/// Resolve a program name on PATH, keeping explicit paths as given.
pub fn resolve_binary(name: &str) -> Result<PathBuf, which::Error> {
    which::which(name)
}
