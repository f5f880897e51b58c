//! The control-plane operations a [`Reconciler`](crate::Reconciler) depends on.

use std::{error::Error as StdError, future::Future};

use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube_client::{
    api::{DeleteParams, ListParams},
    Api, Client,
};

use crate::{resources::ConfigMonitor, selector::Selector};

/// Reads and mutations against the cluster, abstracted so tests can substitute an in-memory store.
pub trait ControlPlane: Send + Sync + 'static {
    /// Any failure other than a missing object.
    type Error: StdError + Send + Sync + 'static;

    /// Fetches a config object, returning `None` if it does not exist.
    fn get_config_object(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<ConfigMap>, Self::Error>> + Send;

    fn list_monitors(
        &self,
        namespace: &str,
    ) -> impl Future<Output = Result<Vec<ConfigMonitor>, Self::Error>> + Send;

    /// Lists the entities in `namespace` whose labels satisfy `selector`.
    fn list_entities(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> impl Future<Output = Result<Vec<Pod>, Self::Error>> + Send;

    /// Deletes an entity. An entity that is already gone counts as terminated.
    fn terminate(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// [`ControlPlane`] backed by the Kubernetes apiserver.
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl ControlPlane for KubeControlPlane {
    type Error = kube_client::Error;

    async fn get_config_object(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, Self::Error> {
        Api::<ConfigMap>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
    }

    async fn list_monitors(&self, namespace: &str) -> Result<Vec<ConfigMonitor>, Self::Error> {
        let list = Api::<ConfigMonitor>::namespaced(self.client.clone(), namespace)
            .list(&ListParams::default())
            .await?;
        Ok(list.items)
    }

    async fn list_entities(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Vec<Pod>, Self::Error> {
        let params = ListParams::default().labels(&selector.to_string());
        let list = Api::<Pod>::namespaced(self.client.clone(), namespace)
            .list(&params)
            .await?;
        Ok(list.items)
    }

    async fn terminate(&self, namespace: &str, name: &str) -> Result<(), Self::Error> {
        let pods = Api::<Pod>::namespaced(self.client.clone(), namespace);
        match pods.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube_client::Error::Api(response)) if response.code == 404 => {
                log::debug!("Pod {namespace}/{name} already gone");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
