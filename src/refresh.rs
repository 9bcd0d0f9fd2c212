use std::time::Instant;

use discovery::{Discoverer, TargetGroup};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::mapper::map_instances;
use crate::registry::Registry;
use crate::Error;

/// Source of the target group, it does not depend on the configuration so
/// consumers always replace the previous group.
pub const SOURCE: &str = "nacos";

/// NacosDiscovery rebuilds the whole target group from the registry on every
/// refresh, nothing is carried between refreshes.
pub struct NacosDiscovery<R = nacos::Client> {
    registry: R,
    concurrency: usize,
}

impl NacosDiscovery<nacos::Client> {
    pub fn new(config: &Config) -> Result<Self, Error> {
        config.validate()?;

        let client = nacos::Client::new(config.client_config()?)?;

        Ok(NacosDiscovery::with_registry(client, config.concurrency))
    }
}

impl<R: Registry> NacosDiscovery<R> {
    /// `concurrency` limits how many services are queried at the same time.
    pub fn with_registry(registry: R, concurrency: usize) -> Self {
        NacosDiscovery {
            registry,
            concurrency: concurrency.max(1),
        }
    }

    #[inline]
    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Discover targets of all services, and aggregate them into one target
    /// group.
    ///
    /// Failing to list services fails the whole refresh. Failing to list
    /// instances of one service only skips that service. Once `cancel` fires
    /// all outstanding requests are dropped and `Error::Cancelled` is
    /// returned.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<Vec<TargetGroup>, Error> {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.discover() => result,
        }
    }

    async fn discover(&self) -> Result<Vec<TargetGroup>, Error> {
        let start = Instant::now();
        let services = self.registry.list_services().await?;

        // `buffered` yields results in the order of services, no matter
        // which request finishes first.
        let results = futures::stream::iter(services.iter().cloned())
            .map(|service| async move {
                let result = self.registry.list_instances(&service).await;
                (service, result)
            })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut targets = Vec::new();
        let mut skipped = 0usize;
        for (service, result) in results {
            match result {
                Ok(instances) => targets.extend(map_instances(&service, &instances)),
                Err(err) => {
                    skipped += 1;
                    warn!(
                        message = "list instances failed, skip service",
                        service = %service,
                        %err,
                    );
                }
            }
        }

        debug!(
            message = "discover targets finished",
            services = services.len(),
            skipped,
            targets = targets.len(),
            elapsed = ?start.elapsed(),
        );

        Ok(vec![TargetGroup::new(SOURCE, targets)])
    }
}

#[async_trait::async_trait]
impl<R: Registry> Discoverer for NacosDiscovery<R> {
    async fn refresh(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<TargetGroup>, discovery::Error> {
        NacosDiscovery::refresh(self, cancel).await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use discovery::LabelSet;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::registry::{Instance, RegistryError, ServiceName};

    #[derive(Default)]
    struct FakeRegistry {
        services: Option<Vec<ServiceName>>,
        instances: BTreeMap<String, Vec<Instance>>,
        // services listed here are slower than others
        delays: BTreeMap<String, Duration>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeRegistry {
        fn new(services: &[&str]) -> Self {
            FakeRegistry {
                services: Some(services.iter().map(|s| s.to_string()).collect()),
                ..Default::default()
            }
        }

        fn unavailable() -> Self {
            FakeRegistry::default()
        }

        fn instances(mut self, service: &str, instances: Vec<Instance>) -> Self {
            self.instances.insert(service.to_string(), instances);
            self
        }

        fn delay(mut self, service: &str, delay: Duration) -> Self {
            self.delays.insert(service.to_string(), delay);
            self
        }
    }

    #[async_trait]
    impl Registry for FakeRegistry {
        async fn list_services(&self) -> Result<Vec<ServiceName>, RegistryError> {
            self.services
                .clone()
                .ok_or_else(|| RegistryError::Unavailable("connection refused".to_string()))
        }

        async fn list_instances(&self, name: &str) -> Result<Vec<Instance>, RegistryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);

            if let Some(delay) = self.delays.get(name) {
                tokio::time::sleep(*delay).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.instances
                .get(name)
                .cloned()
                .ok_or_else(|| RegistryError::Timeout(Duration::from_secs(5)))
        }
    }

    fn target(address: &str) -> LabelSet {
        LabelSet::from([
            ("__address__".to_string(), address.to_string()),
            ("instance".to_string(), address.to_string()),
        ])
    }

    #[tokio::test]
    async fn skip_failed_service() {
        let registry =
            FakeRegistry::new(&["A", "B"]).instances("A", vec![Instance::new("10.0.0.1", 9100)]);
        let discovery = NacosDiscovery::with_registry(registry, 4);

        let groups = discovery
            .refresh(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            groups,
            vec![TargetGroup::new(SOURCE, vec![target("10.0.0.1:9100")])]
        );
    }

    #[tokio::test]
    async fn list_services_failed() {
        let discovery = NacosDiscovery::with_registry(FakeRegistry::unavailable(), 4);

        let err = discovery
            .refresh(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Registry(RegistryError::Unavailable(_))));
        assert_eq!(discovery.registry().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_services() {
        let discovery = NacosDiscovery::with_registry(FakeRegistry::new(&[]), 4);

        let groups = discovery
            .refresh(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].source, SOURCE);
        assert!(groups[0].is_empty());
    }

    #[tokio::test]
    async fn service_without_instances() {
        let registry = FakeRegistry::new(&["A"]).instances("A", vec![]);
        let discovery = NacosDiscovery::with_registry(registry, 4);

        let groups = discovery
            .refresh(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(groups, vec![TargetGroup::new(SOURCE, vec![])]);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_service_order() {
        let registry = FakeRegistry::new(&["A", "B", "C"])
            .instances("A", vec![Instance::new("10.0.0.1", 9100)])
            .instances(
                "B",
                vec![Instance::new("10.0.0.2", 9100), Instance::new("", 9100)],
            )
            .instances("C", vec![Instance::new("10.0.0.3", 9100)])
            // A finishes last
            .delay("A", Duration::from_secs(3))
            .delay("B", Duration::from_secs(1));
        let discovery = NacosDiscovery::with_registry(registry, 3);

        let groups = discovery
            .refresh(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            groups[0].targets,
            vec![
                target("10.0.0.1:9100"),
                target("10.0.0.2:9100"),
                target("10.0.0.3:9100"),
            ]
        );
        assert_eq!(discovery.registry().max_in_flight.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_concurrency() {
        let names = (0..10).map(|i| format!("svc-{i}")).collect::<Vec<_>>();
        let refs = names.iter().map(String::as_str).collect::<Vec<_>>();

        let mut registry = FakeRegistry::new(&refs);
        for (i, name) in names.iter().enumerate() {
            registry = registry
                .instances(name, vec![Instance::new(format!("10.0.1.{i}"), 80)])
                .delay(name, Duration::from_millis(100));
        }
        let discovery = NacosDiscovery::with_registry(registry, 2);

        let groups = discovery
            .refresh(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(groups[0].targets.len(), 10);
        assert_eq!(discovery.registry().calls.load(Ordering::SeqCst), 10);
        assert_eq!(discovery.registry().max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn idempotent() {
        let registry = FakeRegistry::new(&["A", "B"])
            .instances(
                "A",
                vec![Instance::new("10.0.0.1", 9100).with_metadata("env", "prod")],
            )
            .instances("B", vec![Instance::new("10.0.0.2", 9100)]);
        let discovery = NacosDiscovery::with_registry(registry, 4);

        let cancel = CancellationToken::new();
        let first = discovery.refresh(&cancel).await.unwrap();
        let second = discovery.refresh(&cancel).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_in_flight() {
        let registry = FakeRegistry::new(&["A", "B"])
            .instances("A", vec![Instance::new("10.0.0.1", 9100)])
            .instances("B", vec![Instance::new("10.0.0.2", 9100)])
            .delay("B", Duration::from_secs(60));
        let discovery = NacosDiscovery::with_registry(registry, 1);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = tokio::time::Instant::now();
        let err = discovery.refresh(&cancel).await.unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn already_cancelled() {
        let discovery = NacosDiscovery::with_registry(FakeRegistry::new(&["A"]), 4);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = discovery.refresh(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(discovery.registry().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refresh_on_spawned_task() {
        let registry = FakeRegistry::new(&["A", "B"])
            .instances("A", vec![Instance::new("10.0.0.1", 9100)])
            .instances("B", vec![Instance::new("10.0.0.2", 9100)]);
        let discovery = Arc::new(NacosDiscovery::with_registry(registry, 2));

        let handle = tokio::spawn({
            let discovery = Arc::clone(&discovery);
            async move { discovery.refresh(&CancellationToken::new()).await }
        });

        let groups = handle.await.unwrap().unwrap();
        assert_eq!(
            groups[0].targets,
            vec![target("10.0.0.1:9100"), target("10.0.0.2:9100")]
        );
    }

    #[tokio::test]
    async fn shared_registry() {
        let registry =
            Arc::new(FakeRegistry::new(&["A"]).instances("A", vec![Instance::new("10.0.0.1", 80)]));
        let discovery = NacosDiscovery::with_registry(Arc::clone(&registry), 4);

        let groups = Discoverer::refresh(&discovery, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(groups[0].targets, vec![target("10.0.0.1:80")]);
        assert_eq!(registry.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn build_from_config() {
        let config = Config::default();
        assert!(NacosDiscovery::new(&config).is_ok());

        let config = Config {
            username: Some("nacos".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            NacosDiscovery::new(&config),
            Err(Error::ConfigInvalid(_))
        ));
    }
}
