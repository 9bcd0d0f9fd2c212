//! A small client of the Nacos Open API (v1), covering what service discovery
//! needs: authentication, listing services and listing instances.

mod client;
mod types;

pub use client::{Client, ClientConfig, Credentials, DEFAULT_PORT};
pub use types::{Instance, InstanceList, LoginResponse, ServiceList};

#[macro_use]
extern crate tracing;

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid endpoint, {0}")]
    InvalidEndpoint(#[from] http::uri::InvalidUri),
    #[error("load native certificates failed, {0}")]
    NativeCerts(std::io::Error),
    #[error("build HTTP request failed, {0}")]
    BuildRequest(#[from] http::Error),
    #[error("make HTTP request failed, {0}")]
    CallRequest(#[from] hyper_util::client::legacy::Error),
    #[error("reading response failed, {0}")]
    ReadIncoming(#[from] hyper::Error),
    #[error("unexpected status code {0}")]
    UnexpectedStatus(http::StatusCode),
    #[error("decode json response failed, {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Returns true if the error is caused by the per request deadline.
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}
