use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Cli;
use crate::error::ConfigError;

pub const ENV_DIRECTOR_URL: &str = "DIRECTOR_URL";
pub const ENV_UAA_URL: &str = "UAA_URL";
pub const ENV_CLIENT: &str = "BOSH_CLIENT";
pub const ENV_CLIENT_SECRET: &str = "BOSH_CLIENT_SECRET";
pub const ENV_CA_CERT: &str = "BOSH_CA_CERT";

/// Everything a run needs, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub deployment: String,
    pub filters: Vec<String>,
    pub director_url: String,
    pub uaa_url: String,
    pub client: String,
    pub client_secret: String,
    /// PEM text of the CA bundle, already read if given as a path.
    pub ca_cert: Option<String>,
    pub session_name: String,
    pub bosh_bin: String,
    pub tmux_bin: String,
    pub command_timeout: Duration,
    pub api_retries: u32,
    pub max_panes: usize,
    pub cleanup_on_error: bool,
    pub attach: bool,
    pub dry_run: bool,
}

impl Config {
    /// Combine parsed flags with the process environment.
    pub fn load(cli: &Cli) -> Result<Config, ConfigError> {
        Config::from_lookup(cli, |k| std::env::var(k).ok())
    }

    /// Same as [`Config::load`] with an injectable environment.
    pub fn from_lookup<F>(cli: &Cli, lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| -> Result<String, ConfigError> {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::MissingEnv(name))
        };
        let director_url = https_url(ENV_DIRECTOR_URL, required(ENV_DIRECTOR_URL)?)?;
        let uaa_url = https_url(ENV_UAA_URL, required(ENV_UAA_URL)?)?;
        let client = required(ENV_CLIENT)?;
        let client_secret = required(ENV_CLIENT_SECRET)?;
        let ca_cert = match lookup(ENV_CA_CERT).filter(|v| !v.trim().is_empty()) {
            Some(v) => Some(load_ca_cert(&v)?),
            None => None,
        };

        Ok(Config {
            deployment: cli.deployment.clone(),
            filters: cli.filters.clone(),
            director_url,
            uaa_url,
            client,
            client_secret,
            ca_cert,
            session_name: cli.session_name.clone(),
            bosh_bin: cli.bosh_bin.clone(),
            tmux_bin: cli.tmux_bin.clone(),
            command_timeout: Duration::from_secs(cli.command_timeout),
            api_retries: cli.api_retries,
            max_panes: usize::try_from(cli.max_panes).unwrap_or(usize::MAX),
            cleanup_on_error: cli.cleanup_on_error,
            attach: !cli.no_attach && !cli.dry_run,
            dry_run: cli.dry_run,
        })
    }
}

fn https_url(name: &'static str, value: String) -> Result<String, ConfigError> {
    if value.to_ascii_lowercase().starts_with("https://") {
        Ok(value)
    } else {
        Err(ConfigError::InsecureUrl { name, value })
    }
}

/// `BOSH_CA_CERT` holds either PEM text or a path to a PEM file.
fn load_ca_cert(value: &str) -> Result<String, ConfigError> {
    if value.contains("-----BEGIN") {
        return Ok(value.to_string());
    }
    let path: PathBuf = expand_home(value.trim());
    let pem = std::fs::read_to_string(&path)
        .map_err(|source| ConfigError::CaCertRead { path: path.clone(), source })?;
    if !pem.contains("-----BEGIN") {
        return Err(ConfigError::CaCertEmpty);
    }
    Ok(pem)
}

fn expand_home(p: &str) -> PathBuf {
    if let Some(rest) = p.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(p)
}
