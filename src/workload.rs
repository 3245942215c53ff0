//! Rollout triggers for workloads that consume the mirrored secret.
//!
//! Writing the checksum into the pod template's annotations (not the
//! workload's own metadata) is what makes the owning controller roll pods.

use std::{collections::BTreeMap, fmt::Debug, str::FromStr};

use k8s_openapi::{
    NamespaceResourceScope,
    api::{
        apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
        core::v1::PodTemplateSpec,
    },
};
use kube::{
    Api, Client, Resource,
    api::{ObjectMeta, PostParams},
};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
    ReplicaSet,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => <Deployment as PodTemplateWorkload>::KIND,
            WorkloadKind::StatefulSet => <StatefulSet as PodTemplateWorkload>::KIND,
            WorkloadKind::DaemonSet => <DaemonSet as PodTemplateWorkload>::KIND,
            WorkloadKind::ReplicaSet => <ReplicaSet as PodTemplateWorkload>::KIND,
        }
    }

    pub async fn annotate(
        self,
        client: &Client,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        match self {
            WorkloadKind::Deployment => {
                annotate_pod_template::<Deployment>(client, namespace, name, key, value).await
            }
            WorkloadKind::StatefulSet => {
                annotate_pod_template::<StatefulSet>(client, namespace, name, key, value).await
            }
            WorkloadKind::DaemonSet => {
                annotate_pod_template::<DaemonSet>(client, namespace, name, key, value).await
            }
            WorkloadKind::ReplicaSet => {
                annotate_pod_template::<ReplicaSet>(client, namespace, name, key, value).await
            }
        }
    }
}

impl FromStr for WorkloadKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "deployment" => Ok(WorkloadKind::Deployment),
            "statefulset" => Ok(WorkloadKind::StatefulSet),
            "daemonset" => Ok(WorkloadKind::DaemonSet),
            "replicaset" => Ok(WorkloadKind::ReplicaSet),
            _ => Err(Error::UnsupportedKind(s.to_owned())),
        }
    }
}

/// A namespaced workload that owns a pod template.
pub trait PodTemplateWorkload:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
    const KIND: &'static str;

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec>;
}

impl PodTemplateWorkload for Deployment {
    const KIND: &'static str = "Deployment";

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|spec| &mut spec.template)
    }
}

impl PodTemplateWorkload for StatefulSet {
    const KIND: &'static str = "StatefulSet";

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|spec| &mut spec.template)
    }
}

impl PodTemplateWorkload for DaemonSet {
    const KIND: &'static str = "DaemonSet";

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|spec| &mut spec.template)
    }
}

impl PodTemplateWorkload for ReplicaSet {
    const KIND: &'static str = "ReplicaSet";

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().and_then(|spec| spec.template.as_mut())
    }
}

pub fn stamp_annotation(template: &mut PodTemplateSpec, key: &str, value: &str) {
    template
        .metadata
        .get_or_insert_with(ObjectMeta::default)
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_owned(), value.to_owned());
}

/// Read, stamp, replace. The replace carries the resource version of the
/// read, so a concurrent writer turns into a conflict error. Not retried.
pub async fn annotate_pod_template<K: PodTemplateWorkload>(
    client: &Client,
    namespace: &str,
    name: &str,
    key: &str,
    value: &str,
) -> Result<()> {
    let api = Api::<K>::namespaced(client.clone(), namespace);

    let mut workload = api.get(name).await.map_err(|source| Error::ClusterRead {
        kind: K::KIND,
        namespace: namespace.to_owned(),
        name: name.to_owned(),
        source,
    })?;

    let template = workload
        .pod_template_mut()
        .ok_or_else(|| Error::MissingPodTemplate {
            kind: K::KIND,
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        })?;
    stamp_annotation(template, key, value);

    api.replace(name, &PostParams::default(), &workload)
        .await
        .map_err(|source| Error::ClusterWrite {
            kind: K::KIND,
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            source,
        })?;

    Ok(())
}
