//! Resource types the controller reads and acts on.

use kube_core::CustomResourceExt;
use kube_derive::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use k8s_openapi::api::core::v1::{ConfigMap, Pod};

/// The only namespace whose config objects are reconciled.
pub const WATCHED_NAMESPACE: &str = "default";

/// Declares which pods must be recreated when a config object in the same namespace changes.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cache.example.com",
    version = "v1alpha1",
    kind = "ConfigMonitor",
    plural = "configmonitors",
    namespaced,
    crates(kube_core = "::kube_core")
)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMonitorSpec {
    /// Pods governed by this monitor.
    pub pod_selector: PodSelector,
}

/// Label expression matching pods by their `app` label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PodSelector {
    /// Required value of the `app` label.
    #[serde(default)]
    pub app: String,
}

/// Renders the ConfigMonitor CRD manifest as YAML.
pub fn crd_yaml() -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(&ConfigMonitor::crd())
}
