use std::{error::Error as StdError, fmt};

use crate::{selector::Selector, subscriber::QualifiedName};

/// Why a reconciliation did not fully converge.
///
/// `E` is the error type of the [`ControlPlane`](crate::ControlPlane) in use.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError<E: StdError + 'static> {
    /// The config object could not be fetched for a reason other than it being absent.
    #[error("failed to fetch config object {identity}")]
    Fetch {
        identity: QualifiedName,
        #[source]
        source: E,
    },
    /// The monitors in the namespace could not be listed, so no entity was touched.
    #[error("failed to list monitors in namespace {namespace}")]
    ListMonitors {
        namespace: String,
        #[source]
        source: E,
    },
    /// Every monitor was processed, but some of them could not be fully applied.
    #[error("{} of the monitor actions failed: {}", .failures.len(), Summary(.failures))]
    Incomplete { failures: Vec<Failure<E>> },
}

impl<E: StdError + 'static> ReconcileError<E> {
    /// Whether some work was done despite the error.
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Incomplete { .. })
    }

    /// The individual failures aggregated into this error.
    pub fn failures(&self) -> &[Failure<E>] {
        match self {
            Self::Incomplete { failures } => failures,
            _ => &[],
        }
    }
}

/// A single failed step while applying one monitor.
#[derive(Debug, thiserror::Error)]
pub enum Failure<E: StdError + 'static> {
    #[error("failed to list entities matching {selector} for monitor {monitor}")]
    ListEntities {
        monitor: QualifiedName,
        selector: Selector,
        #[source]
        source: E,
    },
    #[error("failed to terminate entity {entity}")]
    Terminate {
        entity: QualifiedName,
        #[source]
        source: E,
    },
}

struct Summary<'a, E: StdError + 'static>(&'a [Failure<E>]);

impl<E: StdError + 'static> fmt::Display for Summary<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            match failure.source() {
                Some(source) => write!(f, "{failure}: {source}")?,
                None => write!(f, "{failure}")?,
            }
        }
        Ok(())
    }
}
