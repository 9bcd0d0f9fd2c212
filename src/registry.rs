use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Opaque name of a registry-side service.
pub type ServiceName = String;

/// One registered endpoint of some service, as reported by the registry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Instance {
    pub host: String,
    pub port: u16,
    pub healthy: bool,
    pub ephemeral: bool,
    pub metadata: BTreeMap<String, String>,
}

impl Instance {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Instance {
            host: host.into(),
            port,
            healthy: true,
            ephemeral: true,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl From<nacos::Instance> for Instance {
    fn from(instance: nacos::Instance) -> Self {
        Instance {
            host: instance.ip,
            // out of range ports can not be scraped, they are mapped to zero
            // and dropped later.
            port: u16::try_from(instance.port).unwrap_or_default(),
            healthy: instance.healthy,
            ephemeral: instance.ephemeral,
            metadata: instance.metadata,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry unavailable, {0}")]
    Unavailable(String),
    #[error("registry request timed out after {0:?}")]
    Timeout(Duration),
}

impl From<nacos::Error> for RegistryError {
    fn from(err: nacos::Error) -> Self {
        match err {
            nacos::Error::Timeout(timeout) => RegistryError::Timeout(timeout),
            err => RegistryError::Unavailable(err.to_string()),
        }
    }
}

/// The operations discovery needs from a service registry. Both of them
/// are a network round trip, and neither of them retries.
#[async_trait::async_trait]
pub trait Registry: Send + Sync {
    /// List all services visible under the configured namespace and group.
    async fn list_services(&self) -> Result<Vec<ServiceName>, RegistryError>;

    /// List current instances of the service. An empty list is returned
    /// if the service has no instances at all.
    async fn list_instances(&self, name: &str) -> Result<Vec<Instance>, RegistryError>;
}

#[async_trait::async_trait]
impl Registry for nacos::Client {
    async fn list_services(&self) -> Result<Vec<ServiceName>, RegistryError> {
        self.services().await.map_err(Into::into)
    }

    async fn list_instances(&self, name: &str) -> Result<Vec<Instance>, RegistryError> {
        let instances = self.instances(name).await?;

        Ok(instances.into_iter().map(Instance::from).collect())
    }
}

#[async_trait::async_trait]
impl<R> Registry for Arc<R>
where
    R: Registry + ?Sized,
{
    async fn list_services(&self) -> Result<Vec<ServiceName>, RegistryError> {
        (**self).list_services().await
    }

    async fn list_instances(&self, name: &str) -> Result<Vec<Instance>, RegistryError> {
        (**self).list_instances(name).await
    }
}
