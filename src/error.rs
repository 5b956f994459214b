use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::layout::LayoutError;

/// Top-level failure of a boshmux run. Every variant is fatal.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Director(#[from] DirectorError),

    #[error("no matching instances in deployment '{deployment}' for {}", filters.join(", "))]
    NoMatchingInstances { deployment: String, filters: Vec<String> },

    #[error("{count} matching instances exceeds the pane limit of {max} (raise --max-panes or narrow the filters)")]
    TooManyInstances { count: usize, max: usize },

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("tmux step '{step}' failed")]
    PaneBuild {
        step: String,
        #[source]
        source: CommandError,
    },

    #[error("attach to tmux session '{session}' failed")]
    Attach {
        session: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("{name} must be an https:// URL, got '{value}'")]
    InsecureUrl { name: &'static str, value: String },

    #[error("cannot read CA certificate file {path}")]
    CaCertRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("BOSH_CA_CERT contains no PEM certificate")]
    CaCertEmpty,

    #[error("'{name}' not found on PATH")]
    BinaryNotFound {
        name: String,
        #[source]
        source: which::Error,
    },
}

#[derive(Debug, Error)]
pub enum DirectorError {
    #[error("invalid CA certificate")]
    Tls(#[source] ureq::Error),

    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: ureq::Error,
    },

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("unexpected response body from {url}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("UAA rejected the client credentials for '{client}'")]
    Unauthorized { client: String },

    #[error("deployment '{0}' not found")]
    DeploymentNotFound(String),
}

impl DirectorError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DirectorError::Transport { .. } => true,
            DirectorError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Typed outcome of one external command invocation.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("cannot start {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    NonZeroExit { command: String, status: String, stderr: String },

    #[error("`{command}` printed unexpected output '{output}'")]
    UnexpectedOutput { command: String, output: String },

    #[error("`{command}` did not finish within {after:?}")]
    TimedOut { command: String, after: Duration },
}

pub type Result<T> = std::result::Result<T, Error>;
