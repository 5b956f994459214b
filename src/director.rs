//! Minimal BOSH director client: UAA client-credentials login, `/info`,
//! and the instance list of one deployment.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use base64::Engine as _;
use serde::Deserialize;
use ureq::tls::{parse_pem, PemItem, RootCerts, TlsConfig, TlsProvider};
use ureq::Agent;

use crate::config::Config;
use crate::error::{ConfigError, DirectorError};
use crate::types::Instance;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_BACKOFF: Duration = Duration::from_millis(500);
/// Largest response body accepted from the director (instance lists can be long).
const MAX_BODY: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DirectorInfo {
    pub name: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub version: String,
}

/// The director operations boshmux needs.
pub trait Director {
    fn info(&self) -> Result<DirectorInfo, DirectorError>;
    fn instances(&self, deployment: &str) -> Result<Vec<Instance>, DirectorError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
}

fn default_token_type() -> String { "bearer".into() }

#[derive(Debug, Deserialize)]
struct InstanceJson {
    job: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    index: Option<u64>,
}

impl InstanceJson {
    /// Old directors report no id; fall back to the index like `bosh` does.
    fn into_instance(self) -> Option<Instance> {
        let id = match (self.id, self.index) {
            (Some(id), _) if !id.is_empty() => id,
            (_, Some(index)) => index.to_string(),
            _ => return None,
        };
        Some(Instance::new(self.job, id))
    }
}

/// Director reached over HTTPS with a UAA client-credentials token.
pub struct HttpDirector {
    agent: Agent,
    director_url: String,
    uaa_url: String,
    client: String,
    client_secret: String,
    retries: u32,
    token: std::cell::RefCell<Option<String>>,
}

impl HttpDirector {
    pub fn new(config: &Config) -> Result<Self, DirectorError> {
        let roots = match &config.ca_cert {
            Some(pem) => RootCerts::Specific(Arc::new(parse_ca_bundle(pem)?)),
            None => RootCerts::PlatformVerifier,
        };
        let tls_config = TlsConfig::builder()
            .provider(TlsProvider::NativeTls)
            .root_certs(roots)
            .build();
        let agent: Agent = Agent::config_builder()
            .tls_config(tls_config)
            .timeout_global(Some(HTTP_TIMEOUT))
            .build()
            .into();
        Ok(HttpDirector {
            agent,
            director_url: config.director_url.trim_end_matches('/').to_string(),
            uaa_url: config.uaa_url.trim_end_matches('/').to_string(),
            client: config.client.clone(),
            client_secret: config.client_secret.clone(),
            retries: config.api_retries,
            token: std::cell::RefCell::new(None),
        })
    }

    fn with_retries<T>(&self, what: &str, mut f: impl FnMut() -> Result<T, DirectorError>) -> Result<T, DirectorError> {
        let mut attempt = 0;
        loop {
            match f() {
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    log::warn!("{} failed ({}), retry {}/{}", what, e, attempt, self.retries);
                    thread::sleep(RETRY_BACKOFF * attempt);
                }
                other => return other,
            }
        }
    }

    fn fetch_token(&self) -> Result<String, DirectorError> {
        let url = format!("{}/oauth/token", self.uaa_url);
        let basic = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.client, self.client_secret));
        log::debug!("POST {}", url);
        let result = self.agent.post(&url)
            .header("Authorization", format!("Basic {}", basic))
            .header("Accept", "application/json")
            .send_form([("grant_type", "client_credentials")]);
        let body = match read_body(&url, result) {
            Err(DirectorError::Status { status: 401, .. }) => {
                return Err(DirectorError::Unauthorized { client: self.client.clone() });
            }
            other => other?,
        };
        let token: TokenResponse = decode(&url, &body)?;
        Ok(format!("{} {}", capitalize(&token.token_type), token.access_token))
    }

    fn authorization(&self) -> Result<String, DirectorError> {
        if let Some(t) = self.token.borrow().as_ref() {
            return Ok(t.clone());
        }
        let t = self.with_retries("UAA login", || self.fetch_token())?;
        *self.token.borrow_mut() = Some(t.clone());
        Ok(t)
    }

    fn get(&self, path: &str) -> Result<String, DirectorError> {
        let auth = self.authorization()?;
        let url = format!("{}{}", self.director_url, path);
        self.with_retries(&format!("GET {}", path), || {
            log::debug!("GET {}", url);
            let result = self.agent.get(&url)
                .header("Authorization", auth.as_str())
                .header("Accept", "application/json")
                .call();
            read_body(&url, result)
        })
    }
}

impl Director for HttpDirector {
    fn info(&self) -> Result<DirectorInfo, DirectorError> {
        let url = format!("{}/info", self.director_url);
        let body = self.get("/info")?;
        decode(&url, &body)
    }

    fn instances(&self, deployment: &str) -> Result<Vec<Instance>, DirectorError> {
        let path = format!("/deployments/{}/instances", deployment);
        let body = match self.get(&path) {
            Err(DirectorError::Status { status: 404, .. }) => {
                return Err(DirectorError::DeploymentNotFound(deployment.to_string()));
            }
            other => other?,
        };
        parse_instances(&format!("{}{}", self.director_url, path), &body)
    }
}

fn read_body(
    url: &str,
    result: Result<ureq::http::Response<ureq::Body>, ureq::Error>,
) -> Result<String, DirectorError> {
    let mut response = match result {
        Ok(r) => r,
        Err(ureq::Error::StatusCode(status)) => return Err(DirectorError::Status { url: url.to_string(), status }),
        Err(source) => return Err(DirectorError::Transport { url: url.to_string(), source }),
    };
    response
        .body_mut()
        .with_config()
        .limit(MAX_BODY)
        .read_to_string()
        .map_err(|source| DirectorError::Transport { url: url.to_string(), source })
}

fn decode<'a, T: Deserialize<'a>>(url: &str, body: &'a str) -> Result<T, DirectorError> {
    serde_json::from_str(body).map_err(|source| DirectorError::Decode { url: url.to_string(), source })
}

fn parse_instances(url: &str, body: &str) -> Result<Vec<Instance>, DirectorError> {
    let raw: Vec<InstanceJson> = decode(url, body)?;
    Ok(raw.into_iter().filter_map(InstanceJson::into_instance).collect())
}

fn capitalize(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        Some(first) => first.to_uppercase().chain(c).collect(),
        None => String::new(),
    }
}

/// All certificates in a PEM bundle.
pub fn parse_ca_bundle(pem: &str) -> Result<Vec<ureq::tls::Certificate<'static>>, DirectorError> {
    let mut certs = Vec::new();
    for item in parse_pem(pem.as_bytes()) {
        if let PemItem::Certificate(cert) = item.map_err(DirectorError::Tls)? {
            certs.push(cert.to_owned());
        }
    }
    if certs.is_empty() {
        return Err(DirectorError::Tls(ureq::Error::Other(Box::new(ConfigError::CaCertEmpty))));
    }
    Ok(certs)
}
