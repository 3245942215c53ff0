use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("vault path '{0}' not found or empty")]
    NotFound(String),

    #[error("vault unavailable reading '{path}': {reason}")]
    StoreUnavailable { path: String, reason: String },

    #[error("failed to read {kind} '{namespace}/{name}': {source}")]
    ClusterRead {
        kind: &'static str,
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("failed to write {kind} '{namespace}/{name}': {source}")]
    ClusterWrite {
        kind: &'static str,
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("unsupported workload kind: {0}")]
    UnsupportedKind(String),

    #[error("{kind} '{namespace}/{name}' has no pod template")]
    MissingPodTemplate {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("failed to persist status of SecretRotation '{namespace}/{name}': {source}")]
    StatusPersist {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("SecretRotation '{0}' has no namespace")]
    MissingNamespace(String),

    #[error("reconcile pass did not finish within {0:?}")]
    PassTimeout(Duration),
}

impl Error {
    /// Secret store failures are retried on a short timer without touching
    /// status instead of going through the controller's error backoff.
    pub fn is_soft(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::StoreUnavailable { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
