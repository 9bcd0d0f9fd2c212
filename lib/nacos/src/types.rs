use std::collections::BTreeMap;

use serde::Deserialize;

/// Response of `POST /v1/auth/login`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    /// in seconds
    pub token_ttl: u64,
}

/// Response of `GET /v1/ns/service/list`
#[derive(Debug, Default, Deserialize)]
pub struct ServiceList {
    /// Total number of services, not the size of this page.
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub doms: Option<Vec<String>>,
}

/// Response of `GET /v1/ns/instance/list`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceList {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub clusters: String,
    #[serde(default)]
    pub hosts: Option<Vec<Instance>>,
}

const fn default_true() -> bool {
    true
}

/// A registered endpoint of some service.
///
/// Missing fields fall back to defaults, entries without ip or port are kept
/// and left for the caller to drop.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: u64,
    #[serde(default)]
    pub weight: f64,
    #[serde(default = "default_true")]
    pub healthy: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}
