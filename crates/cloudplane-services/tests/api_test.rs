//! Service API authorization and spec writes

use async_trait::async_trait;
use cloudplane_cloud::ActivityError;
use cloudplane_services::{
    Cluster, DnsRecords, InstanceStore, MemoryStore, OrgMembership, Phase, ServiceApi,
    ServiceError, ServiceInstance, ServiceKey, ServiceSpec, ServiceStatus, StaticClusters,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct RecordingDns {
    deleted: Mutex<Vec<(String, u64)>>,
}

#[async_trait]
impl DnsRecords for RecordingDns {
    async fn delete_records_owned_by(&self, uid: &str, org_id: u64) -> Result<(), ActivityError> {
        self.deleted.lock().unwrap().push((uid.to_string(), org_id));
        Ok(())
    }
}

/// Lands a reconciler status write between the API's load and its write
struct InterleavingStore {
    inner: MemoryStore,
    pending_status: Mutex<Option<ServiceStatus>>,
}

#[async_trait]
impl InstanceStore for InterleavingStore {
    async fn load(
        &self,
        cluster_id: u64,
        service_name: &str,
    ) -> Result<ServiceInstance, ServiceError> {
        self.inner.load(cluster_id, service_name).await
    }

    async fn save(&self, instance: &ServiceInstance) -> Result<(), ServiceError> {
        self.inner.save(instance).await
    }

    async fn save_spec(
        &self,
        key: &ServiceKey,
        spec: &ServiceSpec,
        generation: u64,
    ) -> Result<(), ServiceError> {
        let pending = self.pending_status.lock().unwrap().take();
        if let Some(status) = pending {
            self.inner.save_status(key, &status).await?;
        }
        self.inner.save_spec(key, spec, generation).await
    }

    async fn save_status(
        &self,
        key: &ServiceKey,
        status: &ServiceStatus,
    ) -> Result<(), ServiceError> {
        self.inner.save_status(key, status).await
    }

    async fn list(&self) -> Result<Vec<ServiceKey>, ServiceError> {
        self.inner.list().await
    }
}

fn cluster(id: u64, org_id: u64) -> Cluster {
    Cluster {
        id,
        name: format!("cluster-{}", id),
        org_id,
        uid: format!("uid-{}", id),
        ready: true,
        rbac_enabled: false,
    }
}

fn api_without_dns(store: Arc<dyn InstanceStore>) -> ServiceApi {
    let clusters = Arc::new(StaticClusters::new([cluster(1, 10), cluster(2, 20)]));
    let authorizer = Arc::new(OrgMembership::new().with_member("alice", 10));
    ServiceApi::new(store, clusters, authorizer)
}

fn api(store: Arc<MemoryStore>, dns: Arc<RecordingDns>) -> ServiceApi {
    api_without_dns(store).with_dns(dns)
}

#[tokio::test]
async fn test_enable_creates_and_updates() {
    let store = Arc::new(MemoryStore::new());
    let api = api(store.clone(), Arc::default());

    let created = api
        .enable("alice", 1, "logging", "1.0", json!({"retention": "7d"}))
        .await
        .unwrap();
    assert_eq!(created.generation, 1);
    assert!(created.spec.enabled);

    // Same spec again does not bump the generation
    let same = api
        .enable("alice", 1, "logging", "1.0", json!({"retention": "7d"}))
        .await
        .unwrap();
    assert_eq!(same.generation, 1);

    let upgraded = api
        .enable("alice", 1, "logging", "1.1", json!({"retention": "7d"}))
        .await
        .unwrap();
    assert_eq!(upgraded.generation, 2);
    assert_eq!(
        store.load(1, "logging").await.unwrap().spec.requested_version,
        "1.1"
    );
}

#[tokio::test]
async fn test_enable_rejects_empty_version() {
    let api = api(Arc::new(MemoryStore::new()), Arc::default());
    assert!(matches!(
        api.enable("alice", 1, "logging", " ", json!(null)).await,
        Err(ServiceError::InvalidSpec(_))
    ));
}

#[tokio::test]
async fn test_foreign_org_is_forbidden() {
    let api = api(Arc::new(MemoryStore::new()), Arc::default());

    let err = api
        .enable("alice", 2, "logging", "1.0", json!(null))
        .await
        .unwrap_err();
    match err {
        ServiceError::Forbidden { method, path, .. } => {
            assert_eq!(method, "PUT");
            assert_eq!(path, "/api/v1/orgs/20/clusters/2/services/logging");
        }
        other => panic!("unexpected error: {}", other),
    }

    assert!(matches!(
        api.get("mallory", 1, "logging").await,
        Err(ServiceError::Forbidden { .. })
    ));
}

#[tokio::test]
async fn test_retry_bumps_generation_only() {
    let store = Arc::new(MemoryStore::new());
    let api = api(store.clone(), Arc::default());
    let created = api
        .enable("alice", 1, "dns", "0.4", json!(null))
        .await
        .unwrap();

    let retried = api.retry("alice", 1, "dns").await.unwrap();

    assert_eq!(retried.generation, created.generation + 1);
    assert_eq!(retried.spec, created.spec);
}

#[tokio::test]
async fn test_detach_cluster() {
    let store = Arc::new(MemoryStore::new());
    let dns = Arc::new(RecordingDns::default());
    let api = api(store.clone(), dns.clone());

    api.enable("alice", 1, "dns", "0.4", json!(null))
        .await
        .unwrap();
    api.enable("alice", 1, "logging", "1.0", json!(null))
        .await
        .unwrap();

    let detached = api.detach_cluster("alice", 1).await.unwrap();

    assert_eq!(detached.len(), 2);
    for instance in api.list("alice", 1).await.unwrap() {
        assert!(!instance.spec.enabled);
        assert_eq!(instance.generation, 2);
    }
    assert_eq!(
        *dns.deleted.lock().unwrap(),
        vec![("uid-1".to_string(), 10)]
    );
}

#[tokio::test]
async fn test_unknown_cluster() {
    let api = api(Arc::new(MemoryStore::new()), Arc::default());
    assert!(matches!(
        api.list("alice", 99).await,
        Err(ServiceError::ClusterNotFound(99))
    ));
}

#[tokio::test]
async fn test_spec_write_keeps_concurrent_status() {
    let store = Arc::new(InterleavingStore {
        inner: MemoryStore::new(),
        pending_status: Mutex::new(None),
    });
    let api = api_without_dns(store.clone());
    api.enable("alice", 1, "logging", "1.0", json!(null))
        .await
        .unwrap();

    // The reconciler finishes the install while the upgrade request is in flight
    let mut installed = ServiceStatus::default();
    installed.phase = Some(Phase::Installed);
    installed.installed_version = Some("1.0".to_string());
    installed.observed_generation = 1;
    *store.pending_status.lock().unwrap() = Some(installed.clone());

    api.enable("alice", 1, "logging", "1.1", json!(null))
        .await
        .unwrap();

    let stored = store.load(1, "logging").await.unwrap();
    assert_eq!(stored.status, installed);
    assert_eq!(stored.spec.requested_version, "1.1");
    assert_eq!(stored.generation, 2);
}

#[tokio::test]
async fn test_retry_and_disable_keep_status() {
    let store = Arc::new(MemoryStore::new());
    let api = api(store.clone(), Arc::default());
    api.enable("alice", 1, "dns", "0.4", json!(null))
        .await
        .unwrap();

    let mut failed = ServiceStatus::default();
    failed.phase = Some(Phase::InstallFailed);
    failed.failure_count = 1;
    store
        .save_status(&ServiceKey::new(1, "dns"), &failed)
        .await
        .unwrap();

    api.retry("alice", 1, "dns").await.unwrap();
    api.disable("alice", 1, "dns").await.unwrap();

    let stored = store.load(1, "dns").await.unwrap();
    assert_eq!(stored.status, failed);
    assert_eq!(stored.generation, 3);
    assert!(!stored.spec.enabled);
}

#[tokio::test]
async fn test_detach_without_dns_provider() {
    let store = Arc::new(MemoryStore::new());
    let api = api_without_dns(store.clone());
    api.enable("alice", 1, "logging", "1.0", json!(null))
        .await
        .unwrap();

    let detached = api.detach_cluster("alice", 1).await.unwrap();

    assert_eq!(detached, vec![ServiceKey::new(1, "logging")]);
    assert!(!store.load(1, "logging").await.unwrap().spec.enabled);
}
