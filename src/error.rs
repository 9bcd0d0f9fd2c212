use crate::registry::RegistryError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or incomplete configuration, the discovery cannot start.
    #[error("invalid configuration, {0}")]
    ConfigInvalid(String),

    /// The host is not able to run the discovery, e.g. no native
    /// certificates can be loaded.
    #[error("environment unavailable, {0}")]
    Environment(String),

    /// Listing services failed, so nothing can be discovered in this cycle.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The refresh was abandoned because shutdown is requested.
    #[error("refresh cancelled")]
    Cancelled,
}

impl From<nacos::Error> for Error {
    fn from(err: nacos::Error) -> Self {
        match err {
            nacos::Error::NativeCerts(_) => {
                Error::Environment(format!("build nacos client failed, {err}"))
            }
            err => Error::ConfigInvalid(format!("build nacos client failed, {err}")),
        }
    }
}
