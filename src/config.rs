use std::path::{Path, PathBuf};
use std::time::Duration;

use http::uri::Authority;
use nacos::{ClientConfig, Credentials, DEFAULT_PORT};
use serde::Deserialize;

use crate::Error;

fn default_server() -> String {
    format!("localhost:{DEFAULT_PORT}")
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_context_path() -> String {
    "/nacos".to_string()
}

fn default_group() -> String {
    "DEFAULT_GROUP".to_string()
}

fn default_clusters() -> Vec<String> {
    vec!["DEFAULT".to_string()]
}

const fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_refresh_interval() -> Duration {
    Duration::from_secs(30)
}

const fn default_concurrency() -> usize {
    4
}

const fn default_page_size() -> usize {
    100
}

/// Nacos service discovery retrieves scrape targets from the Nacos naming
/// service, and publishes them as target groups.
///
/// ```yaml
/// server: 127.0.0.1:8848
/// namespace: 7ec73a7e-ecba-49ef-a01a-65a288969ded
/// group: DEFAULT_GROUP
/// clusters:
/// - DEFAULT
/// username: nacos
/// password: nacos
/// timeout: 5s
/// refresh_interval: 30s
/// output: /etc/prometheus/targets/nacos.json
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address of the Nacos server, `host[:port]`, the default port is 8848.
    #[serde(default = "default_server")]
    pub server: String,

    /// `http` or `https`
    #[serde(default = "default_scheme")]
    pub scheme: String,

    #[serde(default = "default_context_path")]
    pub context_path: String,

    /// Namespace id, leave it empty for the `public` namespace.
    #[serde(default)]
    pub namespace: String,

    #[serde(default = "default_group")]
    pub group: String,

    /// Only instances of these clusters are discovered.
    #[serde(default = "default_clusters")]
    pub clusters: Vec<String>,

    /// Username and password must be configured together.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,

    /// The deadline of every single request to Nacos.
    #[serde(default = "default_timeout", with = "humanize::duration::serde")]
    pub timeout: Duration,

    /// The time after which the targets are refreshed.
    #[serde(
        default = "default_refresh_interval",
        with = "humanize::duration::serde"
    )]
    pub refresh_interval: Duration,

    /// How many services are queried concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Page size used when listing services.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Ask Nacos to return healthy instances only.
    #[serde(default)]
    pub healthy_only: bool,

    /// Where to write targets in the `file_sd` format, targets are printed
    /// to stdout if not set.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: default_server(),
            scheme: default_scheme(),
            context_path: default_context_path(),
            namespace: String::new(),
            group: default_group(),
            clusters: default_clusters(),
            username: None,
            password: None,
            timeout: default_timeout(),
            refresh_interval: default_refresh_interval(),
            concurrency: default_concurrency(),
            page_size: default_page_size(),
            healthy_only: false,
            output: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, Error> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            Error::ConfigInvalid(format!("read {} failed, {err}", path.display()))
        })?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Config, Error> {
        let config = serde_yaml::from_str::<Config>(content)
            .map_err(|err| Error::ConfigInvalid(err.to_string()))?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.authority()?;

        if self.scheme != "http" && self.scheme != "https" {
            return Err(Error::ConfigInvalid(format!(
                "unknown scheme \"{}\", only http and https are supported",
                self.scheme
            )));
        }

        self.credentials()?;

        if self.timeout.is_zero() {
            return Err(Error::ConfigInvalid("timeout must be positive".into()));
        }
        if self.refresh_interval.is_zero() {
            return Err(Error::ConfigInvalid(
                "refresh_interval must be positive".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(Error::ConfigInvalid("concurrency must be positive".into()));
        }
        if self.page_size == 0 {
            return Err(Error::ConfigInvalid("page_size must be positive".into()));
        }

        Ok(())
    }

    /// Returns the credentials, if configured. Partial credentials, only a
    /// username or only a password, are rejected.
    pub fn credentials(&self) -> Result<Option<Credentials>, Error> {
        let username = self.username.as_deref().filter(|s| !s.is_empty());
        let password = self.password.as_deref().filter(|s| !s.is_empty());

        match (username, password) {
            (Some(username), Some(password)) => Ok(Some(Credentials {
                username: username.to_string(),
                password: password.to_string(),
            })),
            (None, None) => Ok(None),
            _ => Err(Error::ConfigInvalid(
                "username and password must be configured together".into(),
            )),
        }
    }

    /// Base url of the Nacos Open API, e.g. `http://localhost:8848/nacos`
    pub fn endpoint(&self) -> Result<String, Error> {
        let authority = self.authority()?;
        let host = authority.host();
        let port = authority.port_u16().unwrap_or(DEFAULT_PORT);
        let context_path = self.context_path.trim().trim_matches('/');

        let mut endpoint = format!("{}://{host}:{port}", self.scheme);
        if !context_path.is_empty() {
            endpoint.push('/');
            endpoint.push_str(context_path);
        }

        Ok(endpoint)
    }

    pub fn client_config(&self) -> Result<ClientConfig, Error> {
        Ok(ClientConfig {
            endpoint: self.endpoint()?,
            namespace: self.namespace.clone(),
            group: self.group.clone(),
            clusters: self.clusters.clone(),
            credentials: self.credentials()?,
            timeout: self.timeout,
            page_size: self.page_size,
            healthy_only: self.healthy_only,
        })
    }

    fn authority(&self) -> Result<Authority, Error> {
        let server = self.server.trim();
        if server.is_empty() {
            return Err(Error::ConfigInvalid(
                "nacos discovery requires a server address".into(),
            ));
        }

        server
            .parse::<Authority>()
            .map_err(|err| Error::ConfigInvalid(format!("invalid server \"{server}\", {err}")))
    }
}
