use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    Api, Client,
    api::{Patch, PatchParams, PostParams},
};
use serde_json::json;

use crate::{
    crds::{SecretRotation, SecretRotationStatus},
    error::{Error, Result},
    workload::WorkloadKind,
};

const SECRET_KIND: &str = "Secret";
const ROTATION_KIND: &str = "SecretRotation";

/// Every cluster read and write a reconcile pass performs.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_rotation(&self, namespace: &str, name: &str) -> Result<Option<SecretRotation>>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()>;

    /// `secret` must carry the resource version it was read at.
    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<()>;

    async fn annotate_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<()>;

    async fn patch_rotation_status(
        &self,
        rotation: &SecretRotation,
        status: &SecretRotationStatus,
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_rotation(&self, namespace: &str, name: &str) -> Result<Option<SecretRotation>> {
        Api::<SecretRotation>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .map_err(|source| Error::ClusterRead {
                kind: ROTATION_KIND,
                namespace: namespace.to_owned(),
                name: name.to_owned(),
                source,
            })
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Api::<Secret>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .map_err(|source| Error::ClusterRead {
                kind: SECRET_KIND,
                namespace: namespace.to_owned(),
                name: name.to_owned(),
                source,
            })
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        Api::<Secret>::namespaced(self.client.clone(), namespace)
            .create(&PostParams::default(), secret)
            .await
            .map(|_| ())
            .map_err(|source| Error::ClusterWrite {
                kind: SECRET_KIND,
                namespace: namespace.to_owned(),
                name: secret.metadata.name.clone().unwrap_or_default(),
                source,
            })
    }

    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        Api::<Secret>::namespaced(self.client.clone(), namespace)
            .replace(&name, &PostParams::default(), secret)
            .await
            .map(|_| ())
            .map_err(|source| Error::ClusterWrite {
                kind: SECRET_KIND,
                namespace: namespace.to_owned(),
                name,
                source,
            })
    }

    async fn annotate_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        kind.annotate(&self.client, namespace, name, key, value).await
    }

    async fn patch_rotation_status(
        &self,
        rotation: &SecretRotation,
        status: &SecretRotationStatus,
    ) -> Result<()> {
        let name = rotation.metadata.name.clone().unwrap_or_default();
        let namespace = rotation.metadata.namespace.clone().unwrap_or_default();

        // resourceVersion makes the merge patch conditional on what this pass read.
        let patch = json!({
            "metadata": { "resourceVersion": rotation.metadata.resource_version },
            "status": status,
        });

        Api::<SecretRotation>::namespaced(self.client.clone(), &namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|source| Error::StatusPersist {
                namespace,
                name,
                source,
            })
    }
}
