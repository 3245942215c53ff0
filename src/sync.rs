use std::collections::BTreeMap;

use k8s_openapi::{ByteString, api::core::v1::Secret};
use kube::api::ObjectMeta;
use tracing::{debug, info};

use crate::{cluster::ClusterApi, error::Result, store::SecretSnapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
}

impl SyncOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, SyncOutcome::Unchanged)
    }
}

fn secret_data(snapshot: &SecretSnapshot) -> BTreeMap<String, ByteString> {
    snapshot
        .iter()
        .map(|(key, value)| (key.clone(), ByteString(value.clone())))
        .collect()
}

/// Makes the Secret `namespace/name` hold exactly `desired`. Extra keys in
/// the existing Secret count as drift and are dropped.
pub async fn converge_secret<C>(
    cluster: &C,
    namespace: &str,
    name: &str,
    desired: &SecretSnapshot,
) -> Result<SyncOutcome>
where
    C: ClusterApi + ?Sized,
{
    let data = secret_data(desired);

    let Some(mut existing) = cluster.get_secret(namespace, name).await? else {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some(namespace.to_owned()),
                ..ObjectMeta::default()
            },
            data: Some(data),
            ..Secret::default()
        };
        cluster.create_secret(namespace, &secret).await?;
        info!(secret = name, namespace, "created Secret");
        return Ok(SyncOutcome::Created);
    };

    let in_sync = match &existing.data {
        Some(current) => *current == data,
        None => data.is_empty(),
    };
    if in_sync {
        debug!(secret = name, namespace, "Secret already up to date");
        return Ok(SyncOutcome::Unchanged);
    }

    existing.data = Some(data);
    cluster.replace_secret(namespace, &existing).await?;
    info!(secret = name, namespace, "updated Secret");

    Ok(SyncOutcome::Updated)
}
