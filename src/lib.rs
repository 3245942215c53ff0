use std::sync::Arc;

use futures::{Stream, StreamExt};
use kube::{
    Api, Client,
    config::KubeConfigOptions,
    runtime::{Controller, WatchStreamExt, controller, predicates, reflector, watcher},
};
use tracing::{debug, error, info};

pub mod cluster;
pub mod config;
pub mod crds;
pub mod error;
pub mod fingerprint;
pub mod reconciler;
pub mod store;
pub mod sync;
pub mod workload;

#[cfg(test)]
mod testing;

use cluster::KubeCluster;
use config::RunArgs;
use crds::SecretRotation;
use reconciler::{Rotator, error_policy, reconcile};
use store::VaultClient;

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let options = KubeConfigOptions::default();

    // Load kubeconfig if it's present otherwise fall back to cluster config
    let config = kube::Config::from_kubeconfig(&options)
        .await
        .or_else(|_| kube::Config::incluster())?;
    let client = Client::try_from(config)?;

    let store = VaultClient::new(&args.vault_config())?;
    let rotator = Arc::new(Rotator::new(
        KubeCluster::new(client.clone()),
        store,
        args.settings(),
    ));

    let rotations = match args.namespace.as_deref() {
        Some(namespace) => Api::<SecretRotation>::namespaced(client, namespace),
        None => Api::<SecretRotation>::all(client),
    };

    info!(
        namespace = args.namespace.as_deref().unwrap_or("*"),
        "starting SecretRotation controller"
    );

    let (reader, writer) = reflector::store::<SecretRotation>();
    let events = watcher(rotations, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects();

    Controller::for_stream(spec_changes(events), reader)
        .shutdown_on_signal()
        .run(
            reconcile::<KubeCluster, VaultClient>,
            error_policy::<KubeCluster, VaultClient>,
            Arc::clone(&rotator),
        )
        .for_each(|res| {
            let rotator = Arc::clone(&rotator);
            async move {
                match res {
                    Ok((rotation, _)) => info!("SecretRotation '{}' reconciled", rotation),
                    Err(controller::Error::ObjectNotFound(rotation)) => {
                        debug!("SecretRotation '{}' is gone", rotation);
                        rotator.forget(rotation.namespace.as_deref().unwrap_or_default(), &rotation.name);
                    }
                    Err(e) => error!("SecretRotation controller error: {}", e),
                }
            }
        })
        .await;

    info!("SecretRotation controller stopped");

    Ok(())
}

/// Keeps only events that change `metadata.generation`. Status writes leave
/// the generation alone, so a pass never schedules the next one through its
/// own status patch; periodic passes come from requeues.
pub fn spec_changes<S>(events: S) -> impl Stream<Item = Result<SecretRotation, watcher::Error>> + Send
where
    S: Stream<Item = Result<SecretRotation, watcher::Error>> + Send,
{
    events.predicate_filter(predicates::generation)
}
