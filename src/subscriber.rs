//! Subscribers producing the trigger stream a [`Config`](crate::Config) is built from.

use std::fmt;

use kube_core::Resource;

/// Uniquely identifies an object of a known type by namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedName {
    /// The object namespace, if any
    pub namespace: Option<String>,
    /// The object name
    pub name: String,
}

impl QualifiedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Returns `None` for objects that have no name yet.
    pub fn from_resource<K: Resource>(resource: &K) -> Option<Self> {
        Some(Self {
            namespace: resource.meta().namespace.clone(),
            name: resource.meta().name.clone()?,
        })
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

pub mod objects;
pub use objects::{objects, FilteredEvents};

pub mod owners;
pub use owners::owned;

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube_core::ObjectMeta;

    use super::*;

    #[test]
    fn display_includes_namespace() {
        assert_eq!(QualifiedName::new("default", "app").to_string(), "default/app");
        let cluster_scoped = QualifiedName {
            namespace: None,
            name: "node".into(),
        };
        assert_eq!(cluster_scoped.to_string(), "node");
    }

    #[test]
    fn unnamed_resource_has_no_qualified_name() {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                generate_name: Some("settings-".into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(QualifiedName::from_resource(&cm), None);
    }
}
