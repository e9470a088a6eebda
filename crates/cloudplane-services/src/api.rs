//! Authorized service operations
//!
//! The API layer only writes `spec` and `generation`; the reconciler picks
//! the change up on its next pass.

use crate::cluster::{Authorizer, Cluster, ClusterLookup, DnsRecords};
use crate::error::{Result, ServiceError};
use crate::model::{ServiceInstance, ServiceKey, ServiceSpec};
use crate::store::InstanceStore;
use std::sync::Arc;

pub struct ServiceApi {
    store: Arc<dyn InstanceStore>,
    clusters: Arc<dyn ClusterLookup>,
    authorizer: Arc<dyn Authorizer>,
    dns: Option<Arc<dyn DnsRecords>>,
}

impl ServiceApi {
    pub fn new(
        store: Arc<dyn InstanceStore>,
        clusters: Arc<dyn ClusterLookup>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            store,
            clusters,
            authorizer,
            dns: None,
        }
    }

    pub fn with_dns(mut self, dns: Arc<dyn DnsRecords>) -> Self {
        self.dns = Some(dns);
        self
    }

    /// Request `version` of a service on a cluster
    pub async fn enable(
        &self,
        user: &str,
        cluster_id: u64,
        service_name: &str,
        version: &str,
        config: serde_json::Value,
    ) -> Result<ServiceInstance> {
        if version.trim().is_empty() {
            return Err(ServiceError::InvalidSpec(
                "requested version must not be empty".to_string(),
            ));
        }
        self.authorize(user, cluster_id, Some(service_name), "PUT")
            .await?;

        let desired = ServiceSpec::new(service_name, version).with_config(config);
        let instance = match self.store.load(cluster_id, service_name).await {
            Ok(mut instance) => {
                if instance.spec == desired {
                    return Ok(instance);
                }
                instance.spec = desired;
                instance.generation += 1;
                self.store
                    .save_spec(&instance.key(), &instance.spec, instance.generation)
                    .await?;
                instance
            }
            Err(ServiceError::InstanceNotFound(_)) => {
                let instance = ServiceInstance::new(cluster_id, desired);
                self.store.save(&instance).await?;
                instance
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            "{} enabled {} at version {} (generation {})",
            user,
            instance.key(),
            version,
            instance.generation
        );
        Ok(instance)
    }

    /// Request removal of a service
    pub async fn disable(
        &self,
        user: &str,
        cluster_id: u64,
        service_name: &str,
    ) -> Result<ServiceInstance> {
        self.authorize(user, cluster_id, Some(service_name), "DELETE")
            .await?;
        let instance = self.store.load(cluster_id, service_name).await?;
        self.disable_instance(instance).await
    }

    /// Ask the reconciler to try a halted instance again
    pub async fn retry(
        &self,
        user: &str,
        cluster_id: u64,
        service_name: &str,
    ) -> Result<ServiceInstance> {
        self.authorize(user, cluster_id, Some(service_name), "POST")
            .await?;

        let mut instance = self.store.load(cluster_id, service_name).await?;
        instance.generation += 1;
        self.store
            .save_spec(&instance.key(), &instance.spec, instance.generation)
            .await?;

        tracing::info!(
            "{} requested a retry of {} (generation {})",
            user,
            instance.key(),
            instance.generation
        );
        Ok(instance)
    }

    pub async fn get(
        &self,
        user: &str,
        cluster_id: u64,
        service_name: &str,
    ) -> Result<ServiceInstance> {
        self.authorize(user, cluster_id, Some(service_name), "GET")
            .await?;
        self.store.load(cluster_id, service_name).await
    }

    /// Every service instance on a cluster
    pub async fn list(&self, user: &str, cluster_id: u64) -> Result<Vec<ServiceInstance>> {
        self.authorize(user, cluster_id, None, "GET").await?;

        let mut instances = Vec::new();
        for key in self.cluster_keys(cluster_id).await? {
            instances.push(self.store.load(key.cluster_id, &key.service_name).await?);
        }
        Ok(instances)
    }

    /// Disable every service on a cluster and drop its DNS records
    pub async fn detach_cluster(&self, user: &str, cluster_id: u64) -> Result<Vec<ServiceKey>> {
        let cluster = self.authorize(user, cluster_id, None, "DELETE").await?;

        let keys = self.cluster_keys(cluster_id).await?;
        for key in &keys {
            let instance = self.store.load(key.cluster_id, &key.service_name).await?;
            self.disable_instance(instance).await?;
        }

        match &self.dns {
            Some(dns) => {
                dns.delete_records_owned_by(&cluster.uid, cluster.org_id)
                    .await?;
                tracing::info!("Deleted DNS records owned by cluster {}", cluster.uid);
            }
            None => tracing::warn!(
                "No DNS provider configured, records owned by cluster {} were kept",
                cluster.uid
            ),
        }

        tracing::info!(
            "{} detached cluster {} ({} services disabled)",
            user,
            cluster.name,
            keys.len()
        );
        Ok(keys)
    }

    async fn disable_instance(&self, mut instance: ServiceInstance) -> Result<ServiceInstance> {
        if !instance.spec.enabled {
            return Ok(instance);
        }
        instance.spec.enabled = false;
        instance.generation += 1;
        self.store
            .save_spec(&instance.key(), &instance.spec, instance.generation)
            .await?;

        tracing::info!(
            "Disabled {} (generation {})",
            instance.key(),
            instance.generation
        );
        Ok(instance)
    }

    async fn cluster_keys(&self, cluster_id: u64) -> Result<Vec<ServiceKey>> {
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|key| key.cluster_id == cluster_id)
            .collect())
    }

    async fn authorize(
        &self,
        user: &str,
        cluster_id: u64,
        service_name: Option<&str>,
        method: &str,
    ) -> Result<Cluster> {
        let cluster = self.clusters.get_cluster(cluster_id).await?;
        let path = resource_path(cluster.org_id, cluster_id, service_name);

        if !self
            .authorizer
            .enforce(cluster.org_id, user, &path, method)
            .await?
        {
            return Err(ServiceError::Forbidden {
                user: user.to_string(),
                method: method.to_string(),
                path,
            });
        }
        Ok(cluster)
    }
}

/// Authorization path of the services of a cluster
pub fn resource_path(org_id: u64, cluster_id: u64, service_name: Option<&str>) -> String {
    match service_name {
        Some(name) => format!(
            "/api/v1/orgs/{}/clusters/{}/services/{}",
            org_id, cluster_id, name
        ),
        None => format!("/api/v1/orgs/{}/clusters/{}/services", org_id, cluster_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_path() {
        assert_eq!(
            resource_path(3, 12, Some("logging")),
            "/api/v1/orgs/3/clusters/12/services/logging"
        );
        assert_eq!(
            resource_path(3, 12, None),
            "/api/v1/orgs/3/clusters/12/services"
        );
    }
}
