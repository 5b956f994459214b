//! One boshmux run: director lookup, filtering, layout, pane build, attach.

use std::io::{self, Write};

use crate::client::AttachOutcome;
use crate::config::Config;
use crate::director::Director;
use crate::error::{Error, Result};
use crate::filter::filter_instances;
use crate::layout::select_layout;
use crate::pane::{BuildFailure, BuiltSession, PaneBuilder};
use crate::tmux::{CommandRunner, Tmux};

/// What a successful run produced.
#[derive(Debug)]
pub struct RunReport {
    pub director: String,
    pub session: BuiltSession,
    /// `None` when attaching was skipped.
    pub attached: Option<AttachOutcome>,
}

/// Drive a full run. User-facing progress goes to `out`; `attach` is only
/// called once every pane exists and `config.attach` is set.
pub fn run<D, R, W, A>(config: &Config, director: &D, runner: &R, out: &mut W, attach: A) -> Result<RunReport>
where
    D: Director + ?Sized,
    R: CommandRunner + ?Sized,
    W: Write,
    A: FnOnce(&Tmux) -> io::Result<AttachOutcome>,
{
    let info = director.info()?;
    log::info!("director {} (uuid {}, version {})", info.name, info.uuid, info.version);
    say(out, format_args!("Director: {}", info.name));

    let all = director.instances(&config.deployment)?;
    log::debug!("deployment {} has {} instances", config.deployment, all.len());
    let matched = filter_instances(&all, &config.filters);
    if matched.is_empty() {
        return Err(Error::NoMatchingInstances {
            deployment: config.deployment.clone(),
            filters: config.filters.clone(),
        });
    }
    if matched.len() > config.max_panes {
        return Err(Error::TooManyInstances { count: matched.len(), max: config.max_panes });
    }

    let layout = select_layout(matched.len())?;
    log::debug!("layout {} holds up to {} panes", layout, layout.capacity());
    for inst in &matched {
        say(out, format_args!("  {}", inst));
    }
    say(out, format_args!("Found {} instances ({} layout)", matched.len(), layout));

    let tmux = Tmux::new(config.tmux_bin.clone(), config.session_name.clone());
    let builder = PaneBuilder::new(runner, &tmux, &config.bosh_bin, &config.deployment);
    let session = match builder.build(&matched, layout) {
        Ok(s) => s,
        Err(BuildFailure { error, session_created }) => {
            if session_created && config.cleanup_on_error {
                cleanup(runner, &tmux);
            } else if session_created {
                log::warn!("leaving partially built session '{}' running", tmux.session());
            }
            return Err(error);
        }
    };

    let attached = if config.attach {
        log::info!("attaching to session {}", session.session);
        let outcome = attach(&tmux).map_err(|source| Error::Attach { session: session.session.clone(), source })?;
        if outcome == AttachOutcome::Interrupted {
            log::warn!("attach interrupted by signal; session '{}' is still running", session.session);
        }
        Some(outcome)
    } else {
        None
    };

    Ok(RunReport { director: info.name, session, attached })
}

/// Best effort: a failed kill is logged, the build error is what gets reported.
fn cleanup<R: CommandRunner + ?Sized>(runner: &R, tmux: &Tmux) {
    log::info!("killing partially built session {}", tmux.session());
    if let Err(e) = runner.run(&tmux.kill_session()) {
        log::error!("cleanup of session '{}' failed: {}", tmux.session(), e);
    }
}

fn say<W: Write>(out: &mut W, line: std::fmt::Arguments<'_>) {
    if let Err(e) = writeln!(out, "{}", line) {
        log::debug!("stdout write failed: {}", e);
    }
}
