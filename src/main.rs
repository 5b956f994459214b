mod types;
mod error;
mod filter;
mod layout;
mod tmux;
mod pane;
mod director;
mod config;
mod cli;
mod platform;
mod client;
mod app;

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use anyhow::Context as _;
use chrono::Local;
use clap::Parser;

use crate::cli::{get_program_name, Cli};
use crate::client::{attach_session, AttachOutcome};
use crate::config::Config;
use crate::director::HttpDirector;
use crate::error::ConfigError;
use crate::platform::CrosstermMode;
use crate::tmux::{resolve_binary, DryRunRunner, ProcessRunner, Tmux};
use crate::types::VERSION;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_file.as_deref()) {
        eprintln!("{}: {:#}", get_program_name(), e);
        std::process::exit(1);
    }
    log::debug!("boshmux {}", VERSION);

    if let Err(e) = run(&cli) {
        report_error(&e, cli.log_file.is_some(), &mut io::stderr());
        std::process::exit(1);
    }
}

/// One line on stderr. The log only gets a copy when it goes to a file,
/// otherwise stderr would show the error twice.
fn report_error<W: Write>(err: &anyhow::Error, logging_to_file: bool, stderr: &mut W) {
    if logging_to_file {
        log::error!("{:#}", err);
    }
    let _ = writeln!(stderr, "{}: {:#}", get_program_name(), err);
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = Config::load(cli).context("invalid configuration")?;

    if !config.dry_run {
        for bin in [&config.tmux_bin, &config.bosh_bin] {
            let path = resolve_binary(bin)
                .map_err(|source| ConfigError::BinaryNotFound { name: bin.clone(), source })?;
            log::debug!("{} -> {}", bin, path.display());
        }
    }

    let director = HttpDirector::new(&config).context("cannot set up director client")?;
    let mut stdout = io::stdout();

    let report = if config.dry_run {
        let runner = DryRunRunner::new(io::stdout());
        app::run(&config, &director, &runner, &mut stdout, attach_terminal)?
    } else {
        let runner = ProcessRunner::new(config.command_timeout);
        app::run(&config, &director, &runner, &mut stdout, attach_terminal)?
    };
    log::info!(
        "session {} on {}: panes {}",
        report.session.session,
        report.director,
        report.session.pane_ids.join(" ")
    );

    if report.attached.is_none() && !config.dry_run {
        let tmux = Tmux::new(config.tmux_bin.clone(), report.session.session.clone());
        writeln!(stdout, "Session '{}' ready: {}", tmux.session(), tmux.attach_session().command_line())?;
    }
    Ok(())
}

fn attach_terminal(tmux: &Tmux) -> io::Result<AttachOutcome> {
    attach_session(tmux, &mut CrosstermMode)
}

/// `RUST_LOG` wins; otherwise only warnings and errors. With `--log-file`
/// nothing is written to stderr, so the attached screen stays clean.
fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{} {:<5} {}] {}",
            Local::now().format("%H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });
    if let Some(path) = log_file {
        let file = File::options()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.try_init().context("logger already initialized")?;
    Ok(())
}
