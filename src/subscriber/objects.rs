use std::{collections::HashMap, fmt::Debug, mem};

use futures::{stream, Stream, TryStreamExt};
use kube_client::Api;
use kube_core::Resource;
use kube_runtime::{watcher, WatchStreamExt};
use serde::de::DeserializeOwned;

use super::QualifiedName;
use crate::filter::EventFilter;

/// Subscriber yielding each object of type `K` whose change passes `filter`.
pub fn objects<K, F>(
    client: Api<K>,
    watcher_config: watcher::Config,
    filter: F,
) -> impl Stream<Item = Result<K, watcher::Error>> + Send
where
    K: 'static + Debug + Clone + DeserializeOwned + Send + Resource,
    F: 'static + Send + EventFilter<K>,
{
    let mut events = FilteredEvents::new(filter);

    watcher(client, watcher_config)
        .default_backoff()
        .map_ok(move |event| {
            let admitted = events.admit(event);
            stream::iter(admitted.into_iter().map(Ok::<_, watcher::Error>))
        })
        .try_flatten()
}

/// Turns raw watch events into create/update/delete decisions for an [`EventFilter`].
///
/// The watcher only reports the current state of an object,
/// so the last seen snapshot of every object is kept to compare updates against.
pub struct FilteredEvents<K, F> {
    filter: F,
    seen: HashMap<QualifiedName, K>,
}

impl<K, F> FilteredEvents<K, F>
where
    K: Resource + Clone,
    F: EventFilter<K>,
{
    pub fn new(filter: F) -> Self {
        Self {
            filter,
            seen: HashMap::new(),
        }
    }

    /// Records `event` and returns the objects it admits.
    pub fn admit(&mut self, event: watcher::Event<K>) -> Vec<K> {
        match event {
            watcher::Event::Applied(obj) => self.applied(obj).into_iter().collect(),
            watcher::Event::Deleted(obj) => self.deleted(obj).into_iter().collect(),
            watcher::Event::Restarted(objs) => self.restarted(objs),
        }
    }

    fn applied(&mut self, obj: K) -> Option<K> {
        let key = QualifiedName::from_resource(&obj)?;
        let admit = match self.seen.insert(key, obj.clone()) {
            Some(old) => self.filter.admit_update(&old, &obj),
            None => self.filter.admit_create(&obj),
        };
        admit.then_some(obj)
    }

    fn deleted(&mut self, obj: K) -> Option<K> {
        if let Some(key) = QualifiedName::from_resource(&obj) {
            self.seen.remove(&key);
        }
        self.filter.admit_delete(&obj).then_some(obj)
    }

    // A relist replaces everything seen so far; objects missing from it were deleted in between.
    fn restarted(&mut self, objs: Vec<K>) -> Vec<K> {
        let mut stale = mem::take(&mut self.seen);
        let mut admitted = Vec::new();

        for obj in objs {
            let Some(key) = QualifiedName::from_resource(&obj) else {
                continue;
            };
            let admit = match stale.remove(&key) {
                Some(old) => self.filter.admit_update(&old, &obj),
                None => self.filter.admit_create(&obj),
            };
            self.seen.insert(key, obj.clone());
            if admit {
                admitted.push(obj);
            }
        }

        let filter = &self.filter;
        admitted.extend(stale.into_values().filter(|obj| filter.admit_delete(obj)));
        admitted
    }

    /// Number of objects currently known.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
