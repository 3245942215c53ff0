//! One reconcile pass: fetch from Vault, fingerprint, converge the Secret,
//! stamp dependent workloads, record status.
//!
//! Vault failures are soft: the pass is requeued on a short timer and status
//! is left alone. Cluster and status failures are hard and go through the
//! controller's error policy, which applies per-object exponential backoff.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::Utc;
use futures::{StreamExt, stream};
use kube::{ResourceExt, runtime::controller::Action};
use tokio_retry2::strategy::{ExponentialBackoff, jitter};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{
    cluster::ClusterApi,
    config::Settings,
    crds::{SecretRotation, SecretRotationStatus, WorkloadReference},
    error::{Error, Result},
    fingerprint::fingerprint,
    store::{SecretStore, fetch_snapshot},
    sync::{SyncOutcome, converge_secret},
    workload::WorkloadKind,
};

const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// The SecretRotation no longer exists.
    Deleted,
    /// Vault couldn't be read; nothing was changed.
    Deferred,
    Rotated {
        checksum: String,
        changed: bool,
        updated_workloads: Vec<String>,
    },
}

pub struct Rotator<C, S> {
    cluster: C,
    store: S,
    settings: Settings,
    backoffs: Mutex<HashMap<String, ExponentialBackoff>>,
}

impl<C, S> Rotator<C, S>
where
    C: ClusterApi,
    S: SecretStore,
{
    pub fn new(cluster: C, store: S, settings: Settings) -> Self {
        Self {
            cluster,
            store,
            settings,
            backoffs: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run_pass(&self, namespace: &str, name: &str) -> Result<PassOutcome> {
        let Some(rotation) = self.cluster.get_rotation(namespace, name).await? else {
            debug!("SecretRotation is gone, nothing to do");
            return Ok(PassOutcome::Deleted);
        };
        let spec = &rotation.spec;

        let fetched = tokio::time::timeout(
            self.settings.vault_timeout,
            fetch_snapshot(&self.store, &spec.vault_path),
        )
        .await
        .unwrap_or_else(|_| {
            Err(Error::StoreUnavailable {
                path: spec.vault_path.clone(),
                reason: "timed out".to_owned(),
            })
        });
        let snapshot = match fetched {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_soft() => {
                warn!(path = %spec.vault_path, error = %e, "vault read failed, retrying later");
                return Ok(PassOutcome::Deferred);
            }
            Err(e) => return Err(e),
        };

        let checksum = fingerprint(&snapshot);
        let previous = rotation.status.clone().unwrap_or_default();
        let mut changed = previous.secret_checksum.as_deref() != Some(checksum.as_str());

        let synced = converge_secret(&self.cluster, namespace, &spec.target_secret, &snapshot).await?;
        if synced == SyncOutcome::Created {
            changed = true;
        }

        let updated_workloads = if changed {
            if spec.target_workloads.is_empty() {
                Vec::new()
            } else {
                info!(%checksum, "secret changed, updating target workloads");
                self.annotate_workloads(&rotation, namespace, &checksum).await
            }
        } else {
            previous.updated_workloads
        };

        let status = SecretRotationStatus {
            last_rotation: Some(Utc::now()),
            secret_checksum: Some(checksum.clone()),
            updated_workloads: updated_workloads.clone(),
        };
        self.cluster.patch_rotation_status(&rotation, &status).await?;

        Ok(PassOutcome::Rotated {
            checksum,
            changed,
            updated_workloads: if changed { updated_workloads } else { Vec::new() },
        })
    }

    /// Stamps every declared workload and returns the identifiers of those
    /// that succeeded, in declaration order. Failures are logged and skipped.
    async fn annotate_workloads(
        &self,
        rotation: &SecretRotation,
        namespace: &str,
        checksum: &str,
    ) -> Vec<String> {
        let key = rotation.spec.annotation_key();
        let key = key.as_str();

        let pending: Vec<_> = rotation
            .spec
            .target_workloads
            .iter()
            .map(|reference| async move {
                (reference, self.annotate_workload(reference, namespace, key, checksum).await)
            })
            .collect();

        let results: Vec<(&WorkloadReference, Result<()>)> = stream::iter(pending)
            .buffered(self.settings.workload_concurrency.max(1))
            .collect()
            .await;

        results
            .into_iter()
            .filter_map(|(reference, result)| match result {
                Ok(()) => {
                    info!(kind = %reference.kind, name = %reference.name, %checksum, "updated workload annotation");
                    Some(reference.status_key(namespace))
                }
                Err(e) => {
                    error!(kind = %reference.kind, name = %reference.name, error = %e, "failed to update workload");
                    None
                }
            })
            .collect()
    }

    async fn annotate_workload(
        &self,
        reference: &WorkloadReference,
        default_namespace: &str,
        key: &str,
        checksum: &str,
    ) -> Result<()> {
        let kind = reference.kind.parse::<WorkloadKind>()?;
        self.cluster
            .annotate_workload(
                kind,
                reference.namespace_or(default_namespace),
                &reference.name,
                key,
                checksum,
            )
            .await
    }

    fn next_action(&self, outcome: &PassOutcome) -> Action {
        match outcome {
            PassOutcome::Deleted => Action::await_change(),
            PassOutcome::Deferred => Action::requeue(self.settings.retry_interval),
            PassOutcome::Rotated { .. } => Action::requeue(self.settings.resync_interval),
        }
    }

    fn next_backoff(&self, key: &str) -> Duration {
        let mut backoffs = self.backoffs.lock().unwrap_or_else(PoisonError::into_inner);
        let delay = backoffs
            .entry(key.to_owned())
            .or_insert_with(error_backoff)
            .next()
            .unwrap_or(MAX_ERROR_BACKOFF);
        delay / 2 + jitter(delay / 2)
    }

    fn reset_backoff(&self, key: &str) {
        self.backoffs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Drops the error backoff of a SecretRotation that no longer exists.
    pub fn forget(&self, namespace: &str, name: &str) {
        self.reset_backoff(&backoff_key(namespace, name));
    }
}

/// 2s, 4s, 8s, ... capped at five minutes.
fn error_backoff() -> ExponentialBackoff {
    ExponentialBackoff::from_millis(2)
        .factor(1000)
        .max_delay_millis(MAX_ERROR_BACKOFF.as_millis() as u64)
}

fn backoff_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

fn object_key(rotation: &SecretRotation) -> Result<(String, String)> {
    let name = rotation.name_any();
    let namespace = rotation
        .namespace()
        .ok_or_else(|| Error::MissingNamespace(name.clone()))?;
    Ok((namespace, name))
}

pub async fn reconcile<C, S>(rotation: Arc<SecretRotation>, ctx: Arc<Rotator<C, S>>) -> Result<Action>
where
    C: ClusterApi,
    S: SecretStore,
{
    let (namespace, name) = object_key(&rotation)?;
    let key = backoff_key(&namespace, &name);
    let span = info_span!("reconcile", rotation = %key);

    async move {
        // Dropping the pass on timeout also drops its pending status write.
        let deadline = ctx.settings.pass_timeout;
        let outcome = tokio::time::timeout(deadline, ctx.run_pass(&namespace, &name))
            .await
            .map_err(|_| Error::PassTimeout(deadline))??;
        ctx.reset_backoff(&key);
        Ok(ctx.next_action(&outcome))
    }
    .instrument(span)
    .await
}

pub fn error_policy<C, S>(rotation: Arc<SecretRotation>, error: &Error, ctx: Arc<Rotator<C, S>>) -> Action
where
    C: ClusterApi,
    S: SecretStore,
{
    let key = match object_key(&rotation) {
        Ok((namespace, name)) => backoff_key(&namespace, &name),
        Err(_) => rotation.name_any(),
    };
    let delay = ctx.next_backoff(&key);
    error!(rotation = %key, %error, retry_in = ?delay, "reconcile failed");
    Action::requeue(delay)
}
