//! config-monitor recreates pods whenever the configuration they consume changes.
//!
//! A `ConfigMonitor` custom resource selects pods by their `app` label.
//! When the spec of a `ConfigMap` in the watched namespace changes,
//! every pod selected by a monitor in that namespace is deleted,
//! leaving its owning workload controller to start a replacement that picks up the new configuration.
//!
//! Reconciliation is level-triggered and stateless:
//! each pass lists the current monitors and pods instead of tracking what changed,
//! so a pass can be repeated or interrupted at any point without leaving anything inconsistent.

pub mod client;
pub use client::{ControlPlane, KubeControlPlane};
pub mod config;
pub use config::{Backoff, Config};
mod error;
pub use error::{Failure, ReconcileError};
pub mod filter;
pub use filter::{EventFilter, SpecChanged};
mod reconciler;
pub use reconciler::{Outcome, Reconciler};
pub mod resources;
mod runner;
pub use runner::run;
pub mod selector;
pub use selector::Selector;
pub mod subscriber;
pub use subscriber::QualifiedName;
