//! Cluster, DNS and authorization collaborators
//!
//! These are consumed by the reconciler and the API surface only through
//! the traits below; the real implementations live outside this crate.

use crate::error::{Result, ServiceError};
use async_trait::async_trait;
use cloudplane_cloud::ActivityError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cluster as seen by the service core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: u64,
    pub name: String,
    pub org_id: u64,
    pub uid: String,
    pub ready: bool,
    pub rbac_enabled: bool,
}

#[async_trait]
pub trait ClusterLookup: Send + Sync {
    /// Look up a cluster by id
    async fn get_cluster(&self, cluster_id: u64) -> Result<Cluster>;
}

#[async_trait]
pub trait DnsRecords: Send + Sync {
    /// Delete every DNS record owned by the cluster `uid` in `org_id`
    async fn delete_records_owned_by(
        &self,
        uid: &str,
        org_id: u64,
    ) -> std::result::Result<(), ActivityError>;
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Whether `user` in `org_id` may call `method` on `path`
    async fn enforce(&self, org_id: u64, user: &str, path: &str, method: &str) -> Result<bool>;
}

/// Fixed set of clusters, e.g. loaded from the settings file
#[derive(Debug, Clone, Default)]
pub struct StaticClusters {
    clusters: HashMap<u64, Cluster>,
}

impl StaticClusters {
    pub fn new(clusters: impl IntoIterator<Item = Cluster>) -> Self {
        Self {
            clusters: clusters.into_iter().map(|c| (c.id, c)).collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.values()
    }
}

#[async_trait]
impl ClusterLookup for StaticClusters {
    async fn get_cluster(&self, cluster_id: u64) -> Result<Cluster> {
        self.clusters
            .get(&cluster_id)
            .cloned()
            .ok_or(ServiceError::ClusterNotFound(cluster_id))
    }
}

/// Grants every request of known members of an organization
#[derive(Debug, Clone, Default)]
pub struct OrgMembership {
    members: HashMap<String, Vec<u64>>,
}

impl OrgMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_member(mut self, user: impl Into<String>, org_id: u64) -> Self {
        self.members.entry(user.into()).or_default().push(org_id);
        self
    }
}

#[async_trait]
impl Authorizer for OrgMembership {
    async fn enforce(&self, org_id: u64, user: &str, path: &str, method: &str) -> Result<bool> {
        let granted = self
            .members
            .get(user)
            .is_some_and(|orgs| orgs.contains(&org_id));
        if !granted {
            tracing::debug!("Denied {} {} for {} in org {}", method, path, user, org_id);
        }
        Ok(granted)
    }
}
