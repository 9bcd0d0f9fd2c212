#[macro_use]
extern crate tracing;

pub mod config;
mod error;
pub mod mapper;
pub mod refresh;
pub mod registry;
pub mod signal;
pub mod trace;

pub use config::Config;
pub use error::Error;
pub use mapper::map_instances;
pub use refresh::{NacosDiscovery, SOURCE};
pub use registry::{Instance, Registry, RegistryError, ServiceName};
