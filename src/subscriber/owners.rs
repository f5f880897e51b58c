use std::fmt::Debug;

use futures::{stream, Stream, TryStreamExt};
use kube_client::Api;
use kube_core::Resource;
use kube_runtime::watcher;
use serde::de::DeserializeOwned;

use super::{objects, QualifiedName};
use crate::filter::EventFilter;

/// Subscriber mapping each admitted change of an object of type `K`
/// to its controlling owners of type `P`.
pub fn owned<P, K, F>(
    client: Api<K>,
    watcher_config: watcher::Config,
    filter: F,
) -> impl Stream<Item = Result<QualifiedName, watcher::Error>> + Send
where
    P: Resource<DynamicType = ()>,
    K: 'static + Debug + Clone + DeserializeOwned + Send + Resource,
    F: 'static + Send + EventFilter<K>,
{
    objects(client, watcher_config, filter)
        .map_ok(|obj| {
            let owners = controller_owners::<P, K>(&obj);
            stream::iter(owners.into_iter().map(Ok::<_, watcher::Error>))
        })
        .try_flatten()
}

/// The owners of `obj` with type `P` that are marked as its controller.
///
/// Owner references cannot cross namespaces, so owners inherit the namespace of `obj`.
pub fn controller_owners<P, K>(obj: &K) -> Vec<QualifiedName>
where
    P: Resource<DynamicType = ()>,
    K: Resource,
{
    let api_version = P::api_version(&());
    let kind = P::kind(&());
    let meta = obj.meta();

    meta.owner_references
        .iter()
        .flatten()
        .filter(|owner| owner.controller == Some(true))
        .filter(|owner| owner.api_version == api_version && owner.kind == kind)
        .map(|owner| QualifiedName {
            namespace: meta.namespace.clone(),
            name: owner.name.clone(),
        })
        .collect()
}
