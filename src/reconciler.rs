//! Recreates the pods governed by monitors whenever a config object in their namespace changes.

use crate::{
    client::ControlPlane,
    error::{Failure, ReconcileError},
    resources::{ConfigMonitor, WATCHED_NAMESPACE},
    selector::Selector,
    subscriber::QualifiedName,
};

/// What the dispatcher should do after a successful reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Run the reconciliation again even though nothing changed.
    pub requeue: bool,
}

impl Outcome {
    pub fn done() -> Self {
        Self { requeue: false }
    }
}

/// Terminates the entities selected by the monitors of a changed config object.
///
/// Holds no state between invocations: every pass lists current cluster state,
/// so repeating or interrupting a pass is harmless.
pub struct Reconciler<C> {
    client: C,
    namespace: String,
}

impl<C: ControlPlane> Reconciler<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            namespace: WATCHED_NAMESPACE.to_owned(),
        }
    }

    /// Reconciles the config object identified by `identity`.
    ///
    /// Monitors are applied independently and best-effort:
    /// a failure in one does not stop the others, and all failures are reported together.
    pub async fn reconcile(
        &self,
        identity: &QualifiedName,
    ) -> Result<Outcome, ReconcileError<C::Error>> {
        if identity.namespace.as_deref() != Some(self.namespace.as_str()) {
            log::debug!("Skipping {identity} outside namespace {}", self.namespace);
            return Ok(Outcome::done());
        }
        let namespace = self.namespace.as_str();

        let config = self
            .client
            .get_config_object(namespace, &identity.name)
            .await
            .map_err(|source| ReconcileError::Fetch {
                identity: identity.clone(),
                source,
            })?;
        if config.is_none() {
            log::debug!("Config object {identity} no longer exists, nothing to do");
            return Ok(Outcome::done());
        }

        let monitors = self.client.list_monitors(namespace).await.map_err(|source| {
            ReconcileError::ListMonitors {
                namespace: namespace.to_owned(),
                source,
            }
        })?;
        log::info!("Reconciling {identity} against {} monitor(s)", monitors.len());

        let mut failures = Vec::new();
        for monitor in &monitors {
            self.apply_monitor(namespace, monitor, &mut failures).await;
        }

        if failures.is_empty() {
            Ok(Outcome::done())
        } else {
            Err(ReconcileError::Incomplete { failures })
        }
    }

    async fn apply_monitor(
        &self,
        namespace: &str,
        monitor: &ConfigMonitor,
        failures: &mut Vec<Failure<C::Error>>,
    ) {
        let selector = Selector::from(&monitor.spec.pod_selector);
        let monitor_name = QualifiedName {
            namespace: Some(namespace.to_owned()),
            name: monitor.metadata.name.clone().unwrap_or_default(),
        };

        // The apiserver rejects such a selector on every attempt, so retrying cannot help.
        if let Err(err) = selector.validate() {
            log::warn!("Skipping monitor {monitor_name}: {err}");
            return;
        }

        let entities = match self.client.list_entities(namespace, &selector).await {
            Ok(entities) => entities,
            Err(source) => {
                log::warn!(
                    "Failed to list pods matching {selector} for monitor {monitor_name}: {source}"
                );
                failures.push(Failure::ListEntities {
                    monitor: monitor_name,
                    selector,
                    source,
                });
                return;
            }
        };

        for entity in entities.iter().filter(|entity| selector.matches_resource(*entity)) {
            let Some(name) = entity.metadata.name.as_deref() else {
                continue;
            };
            let entity_name = QualifiedName::new(namespace, name);

            match self.client.terminate(namespace, name).await {
                Ok(()) => log::info!("Terminated {entity_name} selected by monitor {monitor_name}"),
                Err(source) => {
                    log::warn!("Failed to terminate {entity_name}: {source}");
                    failures.push(Failure::Terminate {
                        entity: entity_name,
                        source,
                    });
                }
            }
        }
    }
}
