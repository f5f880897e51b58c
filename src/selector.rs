//! Typed label selector used to resolve a monitor to the pods it governs.

use std::{collections::BTreeMap, fmt, sync::OnceLock};

use kube_core::Resource;
use regex::Regex;

use crate::resources::PodSelector;

/// The label key monitors select pods by.
pub const APP_LABEL: &str = "app";

/// Longest label value the apiserver accepts.
pub const MAX_LABEL_VALUE_LEN: usize = 63;

static LABEL_VALUE: OnceLock<Regex> = OnceLock::new();

fn label_value_pattern() -> &'static Regex {
    LABEL_VALUE.get_or_init(|| {
        Regex::new(r"^(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])?$")
            .expect("label value pattern is a valid regex")
    })
}

/// A selector the apiserver would reject; listing with it can never succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{value:?} is not a valid value for label {key}")]
pub struct InvalidSelector {
    pub key: String,
    pub value: String,
}

/// An exact single-key label match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selector {
    key: String,
    value: String,
}

impl Selector {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Selects entities whose `app` label equals `value`.
    pub fn app(value: impl Into<String>) -> Self {
        Self::new(APP_LABEL, value)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Checks the value against the Kubernetes label value syntax,
    /// so it can be sent as a label selector without escaping.
    pub fn validate(&self) -> Result<(), InvalidSelector> {
        if self.value.len() <= MAX_LABEL_VALUE_LEN && label_value_pattern().is_match(&self.value) {
            Ok(())
        } else {
            Err(InvalidSelector {
                key: self.key.clone(),
                value: self.value.clone(),
            })
        }
    }

    /// Whether `labels` carries the selected key with exactly the selected value.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        labels.get(&self.key) == Some(&self.value)
    }

    /// Like [`matches`](Self::matches), on the labels of a resource.
    /// Resources without labels never match.
    pub fn matches_resource<K: Resource>(&self, resource: &K) -> bool {
        resource
            .meta()
            .labels
            .as_ref()
            .is_some_and(|labels| self.matches(labels))
    }
}

/// Renders in apiserver label selector syntax, e.g. `app=web`.
impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

impl From<&PodSelector> for Selector {
    fn from(selector: &PodSelector) -> Self {
        Self::app(selector.app.clone())
    }
}
