use crate::commands::status::print_instance;
use crate::daemon::Daemon;
use cloudplane_services::{ServiceError, ServiceKey};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            token.cancel();
        }
    });
}

/// Reconcile one instance in the foreground
pub async fn once(daemon: &Daemon, cluster_id: u64, service: &str) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let key = ServiceKey::new(cluster_id, service);
    daemon.reconciler.reconcile(&key, cancel).await?;

    let instance = daemon.store.load(cluster_id, service).await?;
    print_instance(&instance);
    Ok(())
}

/// Reconcile every stored instance until Ctrl-C
///
/// Each instance gets its own task; a resync tick starts a new execution
/// for every instance whose previous one has finished.
pub async fn run(daemon: Arc<Daemon>) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    tracing::info!(
        "Reconciling every {}s",
        daemon.resync_interval.as_secs()
    );

    let mut running: HashMap<ServiceKey, JoinHandle<()>> = HashMap::new();
    let mut ticker = tokio::time::interval(daemon.resync_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => break,
        }

        running.retain(|_, handle| !handle.is_finished());

        let keys = match daemon.store.list().await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("Failed to list service instances: {}", e);
                continue;
            }
        };

        for key in keys {
            if running.contains_key(&key) {
                continue;
            }

            let reconciler = daemon.reconciler.clone();
            let token = cancel.child_token();
            let task_key = key.clone();
            let handle = tokio::spawn(async move {
                match reconciler.reconcile(&task_key, token).await {
                    Ok(status) => tracing::debug!(
                        "{} at {:?} ({})",
                        task_key,
                        status.phase,
                        status.management_status
                    ),
                    Err(ServiceError::Cancelled) => {}
                    Err(e) => tracing::warn!("Reconciliation of {} failed: {}", task_key, e),
                }
            });
            running.insert(key, handle);
        }
    }

    tracing::info!("Waiting for {} reconciliations to stop", running.len());
    for (key, handle) in running {
        if let Err(e) = handle.await {
            tracing::warn!("Reconciliation task for {} panicked: {}", key, e);
        }
    }
    Ok(())
}
