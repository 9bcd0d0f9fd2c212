use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{ConfigBuilderExt, HttpsConnector};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use url::form_urlencoded::Serializer;

use crate::Error;
use crate::types::{Instance, InstanceList, LoginResponse, ServiceList};

/// The default port Nacos servers listen on.
pub const DEFAULT_PORT: u16 = 8848;

// one year
const MAX_TOKEN_TTL: u64 = 365 * 24 * 60 * 60;

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"******")
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base url of the Open API, e.g. `http://127.0.0.1:8848/nacos`
    pub endpoint: String,
    /// Namespace id, empty means the `public` namespace
    pub namespace: String,
    pub group: String,
    pub clusters: Vec<String>,
    pub credentials: Option<Credentials>,
    /// Deadline of every single request, including reading the response body
    pub timeout: Duration,
    pub page_size: usize,
    pub healthy_only: bool,
}

struct AccessToken {
    value: String,
    renew_at: Instant,
}

pub struct Client {
    http: hyper_util::client::legacy::Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    config: ClientConfig,
    token: Mutex<Option<AccessToken>>,
}

impl Client {
    pub fn new(mut config: ClientConfig) -> Result<Self, Error> {
        let trimmed = config.endpoint.trim_end_matches('/').len();
        config.endpoint.truncate(trimmed);
        config.endpoint.parse::<Uri>()?;

        // native certificates are only required when talking https
        let tls = if config.endpoint.starts_with("https://") {
            rustls::ClientConfig::builder()
                .with_native_roots()
                .map_err(Error::NativeCerts)?
                .with_no_client_auth()
        } else {
            rustls::ClientConfig::builder()
                .with_root_certificates(rustls::RootCertStore::empty())
                .with_no_client_auth()
        };

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(config.timeout));

        let https = HttpsConnector::from((http, tls));
        let http = hyper_util::client::legacy::Client::builder(TokioExecutor::new()).build(https);

        Ok(Client {
            http,
            config,
            token: Mutex::new(None),
        })
    }

    /// List names of all services under the configured namespace and group.
    /// Pages are fetched until all services are collected.
    pub async fn services(&self) -> Result<Vec<String>, Error> {
        let page_size = self.config.page_size.max(1);
        let mut services = Vec::new();
        let mut page = 1usize;

        loop {
            let page_no = page.to_string();
            let size = page_size.to_string();
            let list = self
                .get::<ServiceList>(
                    "/v1/ns/service/list",
                    &[
                        ("pageNo", page_no.as_str()),
                        ("pageSize", size.as_str()),
                        ("groupName", self.config.group.as_str()),
                    ],
                )
                .await?;

            let doms = list.doms.unwrap_or_default();
            if doms.is_empty() {
                break;
            }

            services.extend(doms);
            if services.len() >= list.count {
                break;
            }

            page += 1;
        }

        Ok(services)
    }

    /// List instances of the service, restricted to the configured clusters
    /// and group. A service without any instance is not an error.
    pub async fn instances(&self, service: &str) -> Result<Vec<Instance>, Error> {
        let clusters = self.config.clusters.join(",");
        let healthy_only = if self.config.healthy_only {
            "true"
        } else {
            "false"
        };

        let list = self
            .get::<InstanceList>(
                "/v1/ns/instance/list",
                &[
                    ("serviceName", service),
                    ("groupName", self.config.group.as_str()),
                    ("clusters", clusters.as_str()),
                    ("healthyOnly", healthy_only),
                ],
            )
            .await?;

        Ok(list.hosts.unwrap_or_default())
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, Error> {
        let token = self.access_token().await?;

        // `Serializer` is not `Send`, it must not live across awaits
        let query = {
            let mut query = Serializer::new(String::new());
            if !self.config.namespace.is_empty() {
                query.append_pair("namespaceId", &self.config.namespace);
            }
            for (key, value) in params {
                query.append_pair(key, value);
            }
            if let Some(token) = &token {
                query.append_pair("accessToken", token);
            }

            query.finish()
        };

        let req = Request::builder()
            .method(Method::GET)
            .uri(format!("{}{}?{}", self.config.endpoint, path, query))
            .header(ACCEPT, "application/json")
            .body(Full::default())?;

        let result = self.send(req).await;
        if let Err(Error::UnexpectedStatus(status)) = &result {
            // the token might be revoked or expired earlier than expected,
            // login again next time.
            if token.is_some()
                && (*status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN)
            {
                self.token.lock().unwrap().take();
            }
        }

        result
    }

    async fn access_token(&self) -> Result<Option<String>, Error> {
        let Some(credentials) = &self.config.credentials else {
            return Ok(None);
        };

        if let Some(token) = self.token.lock().unwrap().as_ref() {
            if token.renew_at > Instant::now() {
                return Ok(Some(token.value.clone()));
            }
        }

        let resp = self.login(credentials).await?;
        let deadline = renew_at(Instant::now(), resp.token_ttl);
        debug!(
            message = "login success",
            username = %credentials.username,
            ttl = resp.token_ttl,
        );

        *self.token.lock().unwrap() = Some(AccessToken {
            value: resp.access_token.clone(),
            renew_at: deadline,
        });

        Ok(Some(resp.access_token))
    }

    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, Error> {
        let body = Serializer::new(String::new())
            .append_pair("username", &credentials.username)
            .append_pair("password", &credentials.password)
            .finish();

        let req = Request::builder()
            .method(Method::POST)
            .uri(format!("{}/v1/auth/login", self.config.endpoint))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(ACCEPT, "application/json")
            .body(Full::new(Bytes::from(body)))?;

        self.send(req).await
    }

    async fn send<T: DeserializeOwned>(&self, req: Request<Full<Bytes>>) -> Result<T, Error> {
        let path = req.uri().path().to_string();
        let start = Instant::now();

        let fut = async {
            let resp = self.http.request(req).await?;
            let (parts, incoming) = resp.into_parts();
            let body = incoming.collect().await?.to_bytes();

            if !parts.status.is_success() {
                debug!(
                    message = "unexpected response",
                    path,
                    status = %parts.status,
                    body = %String::from_utf8_lossy(&body),
                );

                return Err(Error::UnexpectedStatus(parts.status));
            }

            serde_json::from_slice::<T>(&body).map_err(Error::from)
        };

        let result = match tokio::time::timeout(self.config.timeout, fut).await {
            Ok(result) => result,
            Err(_elapsed) => Err(Error::Timeout(self.config.timeout)),
        };

        trace!(
            message = "nacos request finished",
            path,
            ok = result.is_ok(),
            elapsed = ?start.elapsed(),
        );

        result
    }
}

/// Tokens are renewed after 90% of their TTL. The TTL is capped, so a bogus
/// value from the server can not overflow `Instant`.
fn renew_at(now: Instant, token_ttl: u64) -> Instant {
    let ttl = Duration::from_secs(token_ttl.min(MAX_TOKEN_TTL)) * 9 / 10;

    now.checked_add(ttl).unwrap_or(now)
}
