//! In-memory cluster and secret store for driving reconcile passes in tests.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use k8s_openapi::{ByteString, api::core::v1::Secret};
use kube::{api::ObjectMeta, core::ErrorResponse};
use serde_json::Value;

use crate::{
    cluster::ClusterApi,
    crds::{SecretRotation, SecretRotationSpec, SecretRotationStatus},
    error::{Error, Result},
    store::{RawObject, SecretSnapshot, SecretStore},
    workload::WorkloadKind,
};

pub fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_owned(),
        message: reason.to_owned(),
        reason: reason.to_owned(),
        code,
    })
}

/// A client for an API server faked by `server`, over plain HTTP.
pub fn mock_api_client(server: &wiremock::MockServer) -> kube::Client {
    let config = kube::Config::new(server.uri().parse().unwrap());
    kube::Client::try_from(config).unwrap()
}

pub fn conflict_status() -> Value {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": "the object has been modified",
        "reason": "Conflict",
        "code": 409
    })
}

fn key(namespace: &str, name: &str) -> (String, String) {
    (namespace.to_owned(), name.to_owned())
}

/// `namespace/Kind/name`, with the canonical kind spelling.
pub fn workload_key(kind: WorkloadKind, namespace: &str, name: &str) -> String {
    format!("{namespace}/{}/{name}", kind.as_str())
}

#[derive(Default)]
pub struct State {
    pub rotations: BTreeMap<(String, String), SecretRotation>,
    pub secrets: BTreeMap<(String, String), Secret>,
    /// Pod template annotations per workload, keyed by [`workload_key`].
    pub workloads: BTreeMap<String, BTreeMap<String, String>>,
    pub failing_workloads: BTreeSet<String>,
    pub fail_secret_reads: bool,
    pub conflict_secret_writes: bool,
    pub fail_status_writes: bool,
    /// Status writes never complete.
    pub stall_status_writes: bool,
    pub secret_writes: usize,
    pub workload_writes: usize,
    pub status_writes: usize,
    resource_version: u64,
}

impl State {
    fn next_version(&mut self) -> Option<String> {
        self.resource_version += 1;
        Some(self.resource_version.to_string())
    }
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn insert_rotation(&self, namespace: &str, name: &str, spec: SecretRotationSpec) {
        let mut rotation = SecretRotation::new(name, spec);
        rotation.metadata.namespace = Some(namespace.to_owned());
        let mut state = self.state();
        rotation.metadata.resource_version = state.next_version();
        state.rotations.insert(key(namespace, name), rotation);
    }

    pub fn set_status(&self, namespace: &str, name: &str, status: SecretRotationStatus) {
        let mut state = self.state();
        if let Some(rotation) = state.rotations.get_mut(&key(namespace, name)) {
            rotation.status = Some(status);
        }
    }

    pub fn status(&self, namespace: &str, name: &str) -> Option<SecretRotationStatus> {
        self.state()
            .rotations
            .get(&key(namespace, name))
            .and_then(|rotation| rotation.status.clone())
    }

    pub fn insert_secret(&self, namespace: &str, name: &str, snapshot: &SecretSnapshot) {
        let data = snapshot
            .iter()
            .map(|(k, v)| (k.clone(), ByteString(v.clone())))
            .collect::<BTreeMap<_, _>>();
        let mut state = self.state();
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some(namespace.to_owned()),
                resource_version: state.next_version(),
                ..ObjectMeta::default()
            },
            data: (!data.is_empty()).then_some(data),
            ..Secret::default()
        };
        state.secrets.insert(key(namespace, name), secret);
    }

    pub fn secret_data(&self, namespace: &str, name: &str) -> Option<SecretSnapshot> {
        self.state().secrets.get(&key(namespace, name)).map(|secret| {
            secret
                .data
                .iter()
                .flatten()
                .map(|(k, v)| (k.clone(), v.0.clone()))
                .collect()
        })
    }

    pub fn insert_workload(&self, kind: WorkloadKind, namespace: &str, name: &str) {
        self.state()
            .workloads
            .insert(workload_key(kind, namespace, name), BTreeMap::new());
    }

    pub fn annotation(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        annotation: &str,
    ) -> Option<String> {
        self.state()
            .workloads
            .get(&workload_key(kind, namespace, name))
            .and_then(|annotations| annotations.get(annotation).cloned())
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_rotation(&self, namespace: &str, name: &str) -> Result<Option<SecretRotation>> {
        Ok(self.state().rotations.get(&key(namespace, name)).cloned())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let state = self.state();
        if state.fail_secret_reads {
            return Err(Error::ClusterRead {
                kind: "Secret",
                namespace: namespace.to_owned(),
                name: name.to_owned(),
                source: api_error(500, "InternalError"),
            });
        }
        Ok(state.secrets.get(&key(namespace, name)).cloned())
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        let mut state = self.state();
        if state.secrets.contains_key(&key(namespace, &name)) {
            return Err(Error::ClusterWrite {
                kind: "Secret",
                namespace: namespace.to_owned(),
                name,
                source: api_error(409, "AlreadyExists"),
            });
        }
        let mut secret = secret.clone();
        secret.metadata.resource_version = state.next_version();
        state.secrets.insert(key(namespace, &name), secret);
        state.secret_writes += 1;
        Ok(())
    }

    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        let mut state = self.state();
        let current_version = state
            .secrets
            .get(&key(namespace, &name))
            .and_then(|current| current.metadata.resource_version.clone());
        if state.conflict_secret_writes || current_version != secret.metadata.resource_version {
            return Err(Error::ClusterWrite {
                kind: "Secret",
                namespace: namespace.to_owned(),
                name,
                source: api_error(409, "Conflict"),
            });
        }
        let mut secret = secret.clone();
        secret.metadata.resource_version = state.next_version();
        state.secrets.insert(key(namespace, &name), secret);
        state.secret_writes += 1;
        Ok(())
    }

    async fn annotate_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        annotation: &str,
        value: &str,
    ) -> Result<()> {
        let id = workload_key(kind, namespace, name);
        let mut state = self.state();
        if state.failing_workloads.contains(&id) {
            return Err(Error::ClusterWrite {
                kind: kind.as_str(),
                namespace: namespace.to_owned(),
                name: name.to_owned(),
                source: api_error(409, "Conflict"),
            });
        }
        let Some(annotations) = state.workloads.get_mut(&id) else {
            return Err(Error::ClusterRead {
                kind: kind.as_str(),
                namespace: namespace.to_owned(),
                name: name.to_owned(),
                source: api_error(404, "NotFound"),
            });
        };
        annotations.insert(annotation.to_owned(), value.to_owned());
        state.workload_writes += 1;
        Ok(())
    }

    async fn patch_rotation_status(
        &self,
        rotation: &SecretRotation,
        status: &SecretRotationStatus,
    ) -> Result<()> {
        let namespace = rotation.metadata.namespace.clone().unwrap_or_default();
        let name = rotation.metadata.name.clone().unwrap_or_default();
        let stall = self.state().stall_status_writes;
        if stall {
            std::future::pending::<()>().await;
        }
        let mut state = self.state();
        if state.fail_status_writes {
            return Err(Error::StatusPersist {
                namespace,
                name,
                source: api_error(409, "Conflict"),
            });
        }
        let version = state.next_version();
        let Some(stored) = state.rotations.get_mut(&key(&namespace, &name)) else {
            return Err(Error::StatusPersist {
                namespace,
                name,
                source: api_error(404, "NotFound"),
            });
        };
        stored.status = Some(status.clone());
        stored.metadata.resource_version = version;
        state.status_writes += 1;
        Ok(())
    }
}

/// Secret store answering from a fixed map of paths.
#[derive(Default)]
pub struct FakeStore {
    paths: Mutex<BTreeMap<String, Value>>,
    unavailable: Mutex<bool>,
}

impl FakeStore {
    /// `data` is the response's `data` member, enveloped or not.
    pub fn put(&self, path: &str, data: Value) {
        self.paths.lock().unwrap().insert(path.to_owned(), data);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }
}

#[async_trait]
impl SecretStore for FakeStore {
    async fn read(&self, path: &str) -> Result<Option<RawObject>> {
        if *self.unavailable.lock().unwrap() {
            return Err(Error::StoreUnavailable {
                path: path.to_owned(),
                reason: "connection refused".to_owned(),
            });
        }
        Ok(match self.paths.lock().unwrap().get(path) {
            Some(data @ Value::Object(_)) => Some(serde_json::from_str(&data.to_string()).unwrap()),
            _ => None,
        })
    }
}
