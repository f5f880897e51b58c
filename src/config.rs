use std::time::Duration;

use futures::{stream::BoxStream, StreamExt};
use k8s_openapi::api::core::v1::ConfigMap;
use kube_client::{Api, Client};
use kube_core::NamespaceResourceScope;
use kube_runtime::watcher;

use crate::{
    filter::{EventFilter, SpecChanged},
    resources::{ConfigMonitor, WATCHED_NAMESPACE},
    subscriber::{self, QualifiedName},
};

/// Parameters for [`run`](crate::run).
pub trait Config {
    /// Non-fatal errors reported by [`subscribe`](Self::subscribe); the stream keeps going after them.
    type SubscribeErr: std::fmt::Display + Send + 'static;

    /// Subscribe to the identities of config objects that need a reconciliation.
    fn subscribe(&self) -> BoxStream<'static, Result<QualifiedName, Self::SubscribeErr>>;

    /// Retry delays for failed reconciliations.
    fn backoff(&self) -> Backoff {
        Backoff::default()
    }
}

/// Exponential retry delays, doubling from `base` and capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(300),
        }
    }
}

impl Backoff {
    /// The delay before retry number `attempt`, counting from zero.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Registers the watches feeding the controller:
/// config objects through the event filter, and monitors routed to the config objects owning them.
///
/// Both watches are scoped to a single namespace.
pub struct Builder<Filter> {
    client: Client,
    namespace: String,
    filter: Filter,
    watcher_config: watcher::Config,
    backoff: Backoff,
}

impl<Filter> Builder<Filter> {
    /// Replaces the event filter applied to both watches.
    pub fn with_filter<F>(self, filter: F) -> Builder<F> {
        Builder {
            client: self.client,
            namespace: self.namespace,
            filter,
            watcher_config: self.watcher_config,
            backoff: self.backoff,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_watcher_config(mut self, watcher_config: watcher::Config) -> Self {
        self.watcher_config = watcher_config;
        self
    }

    /// The namespace both watches are scoped to; the reconciler skips everything else.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube_core::Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

impl<Filter> Config for Builder<Filter>
where
    Filter: EventFilter<ConfigMap> + EventFilter<ConfigMonitor> + Clone + Send + 'static,
{
    type SubscribeErr = watcher::Error;

    fn subscribe(&self) -> BoxStream<'static, Result<QualifiedName, Self::SubscribeErr>> {
        let config_objects = subscriber::objects(
            self.api::<ConfigMap>(),
            self.watcher_config.clone(),
            self.filter.clone(),
        )
        .filter_map(|result| async move {
            match result {
                Ok(obj) => QualifiedName::from_resource(&obj).map(Ok),
                Err(err) => Some(Err(err)),
            }
        });

        let monitors = subscriber::owned::<ConfigMap, _, _>(
            self.api::<ConfigMonitor>(),
            self.watcher_config.clone(),
            self.filter.clone(),
        );

        futures::stream::select(config_objects.boxed(), monitors.boxed()).boxed()
    }

    fn backoff(&self) -> Backoff {
        self.backoff
    }
}

/// Starts a registration on `client` with the [`SpecChanged`] filter and default settings.
pub fn watch(client: Client) -> Builder<SpecChanged> {
    Builder {
        client,
        namespace: WATCHED_NAMESPACE.to_owned(),
        filter: SpecChanged,
        watcher_config: watcher::Config::default(),
        backoff: Backoff::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let backoff = Backoff {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
        };
        let delays: Vec<_> = (0..7).map(|n| backoff.delay(n).as_secs()).collect();
        assert_eq!(delays, [1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn backoff_saturates_on_large_attempts() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(64), backoff.max);
        assert_eq!(backoff.delay(u32::MAX), backoff.max);
    }

    fn offline_client() -> Client {
        let config = kube_client::Config::new("http://127.0.0.1:1".parse().unwrap());
        Client::try_from(config).unwrap()
    }

    #[tokio::test]
    async fn watches_only_the_reconciled_namespace() {
        let builder = watch(offline_client());
        assert_eq!(builder.namespace(), WATCHED_NAMESPACE);
        assert_eq!(
            builder.api::<ConfigMap>().resource_url(),
            "/api/v1/namespaces/default/configmaps"
        );
        assert_eq!(
            builder.api::<ConfigMonitor>().resource_url(),
            "/apis/cache.example.com/v1alpha1/namespaces/default/configmonitors"
        );
    }
}
