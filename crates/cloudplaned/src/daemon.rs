//! Wiring of settings into the service core

use cloudplane_cloud::{RetryPolicy, Waiter};
use cloudplane_config::Settings;
use cloudplane_helm::{ChartSpec, Helm, HelmOperator};
use cloudplane_services::{
    Cluster, FileStore, InstanceStore, OrgMembership, Reconciler, ReconcilerConfig, ServiceApi,
    StaticClusters,
};
use std::sync::Arc;
use std::time::Duration;

pub struct Daemon {
    pub store: Arc<dyn InstanceStore>,
    pub clusters: Arc<StaticClusters>,
    pub api: ServiceApi,
    pub reconciler: Arc<Reconciler>,
    pub resync_interval: Duration,
}

impl Daemon {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let state_dir = settings.state_dir()?;
        tracing::debug!("Using state directory {}", state_dir.display());
        let store: Arc<dyn InstanceStore> = Arc::new(FileStore::new(state_dir));

        let clusters = Arc::new(StaticClusters::new(settings.clusters.iter().map(|c| {
            Cluster {
                id: c.id,
                name: c.name.clone(),
                org_id: c.org_id,
                uid: c.uid.clone(),
                ready: c.ready,
                rbac_enabled: c.rbac_enabled,
            }
        })));

        let authorizer = settings
            .authorization
            .users
            .iter()
            .fold(OrgMembership::new(), |authz, user| {
                authz.with_member(user.name.clone(), user.org_id)
            });

        let operator = settings.services.iter().fold(
            HelmOperator::new(
                Helm::new(&settings.helm.binary),
                Waiter::new(settings.waiter.poll_interval()),
            ),
            |operator, (name, service)| {
                let mut chart = ChartSpec::new(service.chart.clone(), service.namespace.clone())
                    .with_upgrade_paths(service.upgrade_paths.clone());
                if let Some(url) = &service.repository {
                    chart = chart.with_repository(url.clone());
                }
                operator.with_chart(name.clone(), chart)
            },
        );

        let config = ReconcilerConfig {
            retry: RetryPolicy {
                max_attempts: settings.retry.max_attempts,
                initial_delay: settings.retry.initial_delay(),
                max_delay: settings.retry.max_delay(),
                backoff_multiplier: settings.retry.backoff_multiplier,
            },
            auto_retry_limit: settings.reconciler.auto_retry_limit,
        };

        let api = ServiceApi::new(store.clone(), clusters.clone(), Arc::new(authorizer));
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            Arc::new(operator),
            clusters.clone(),
            config,
        ));

        Ok(Self {
            store,
            clusters,
            api,
            reconciler,
            resync_interval: settings.reconciler.resync_interval(),
        })
    }
}
