use clap::Parser;

use crate::types::DEFAULT_SESSION_NAME;

pub fn get_program_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
        .unwrap_or_else(|| "boshmux".to_string())
        .to_lowercase()
        .replace(".exe", "")
}

const AFTER_HELP: &str = r#"ENVIRONMENT VARIABLES:
    DIRECTOR_URL          Director base URL, e.g. https://10.0.0.6:25555
    UAA_URL               UAA base URL, e.g. https://10.0.0.6:8443
    BOSH_CLIENT           UAA client id
    BOSH_CLIENT_SECRET    UAA client secret
    BOSH_CA_CERT          CA certificate (PEM text or path), optional
    RUST_LOG              Log filter (default: warn)

On a tmux failure the partially built session is left running for
inspection unless --cleanup-on-error is given.

EXAMPLES:
    boshmux -d cf router              One pane per router instance
    boshmux -d cf web/ db/0           All web instances plus db/0
    boshmux -d cf --dry-run diego     Print the tmux commands only"#;

/// Open one `bosh ssh` pane per matching instance in a synchronized tmux session
#[derive(Parser, Debug, Clone)]
#[command(name = "boshmux", version, about, long_about = None, after_help = AFTER_HELP)]
pub struct Cli {
    /// Deployment name
    #[arg(short = 'd', long = "deployment", value_name = "DEPLOYMENT")]
    pub deployment: String,

    /// Instance prefixes to match against `group/id` (e.g. `web`, `db/0`)
    #[arg(value_name = "JOB_PREFIX", required = true, num_args = 1..)]
    pub filters: Vec<String>,

    /// tmux session name
    #[arg(long, value_name = "NAME", default_value = DEFAULT_SESSION_NAME)]
    pub session_name: String,

    /// bosh executable used inside each pane
    #[arg(long, value_name = "PATH", default_value = "bosh")]
    pub bosh_bin: String,

    /// tmux executable
    #[arg(long, value_name = "PATH", default_value = "tmux")]
    pub tmux_bin: String,

    /// Seconds to wait for each tmux command before giving up
    #[arg(long, value_name = "SECONDS", default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub command_timeout: u64,

    /// Retries for transient director/UAA failures
    #[arg(long, value_name = "N", default_value_t = 2)]
    pub api_retries: u32,

    /// Refuse to open more panes than this
    #[arg(long, value_name = "N", default_value_t = 16, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_panes: u64,

    /// Kill the tmux session if building the layout fails
    #[arg(long)]
    pub cleanup_on_error: bool,

    /// Build the session but do not attach to it
    #[arg(long)]
    pub no_attach: bool,

    /// Print the tmux commands instead of running them
    #[arg(long)]
    pub dry_run: bool,

    /// Write log output to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<std::path::PathBuf>,
}
