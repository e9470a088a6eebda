//! Provider operations behind each phase

use crate::cluster::Cluster;
use crate::upgrade::UpgradePaths;
use async_trait::async_trait;
use cloudplane_cloud::{ActivityContext, ActivityError};
use serde::{Deserialize, Serialize};

/// Input of one phase operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub cluster: Cluster,
    pub service_name: String,

    /// Version being installed, or the installed version when uninstalling
    pub version: Option<String>,

    pub config: serde_json::Value,
}

/// Executes the externally-effecting step of each phase
///
/// Implementations run as activities: they may be retried with the same
/// context identity, so mutating calls should carry the idempotency token
/// from [`cloudplane_cloud::token_for`]. Errors must already be encoded
/// with [`cloudplane_cloud::encode`].
#[async_trait]
pub trait ServiceOperator: Send + Sync {
    /// Prepare the cluster for the service (repositories, namespaces, secrets)
    async fn pre_install(
        &self,
        ctx: &ActivityContext,
        request: &OperationRequest,
    ) -> Result<(), ActivityError>;

    /// Install or upgrade the service to `request.version`
    async fn install(
        &self,
        ctx: &ActivityContext,
        request: &OperationRequest,
    ) -> Result<(), ActivityError>;

    /// Wait for the installed service to become healthy
    async fn post_install(
        &self,
        ctx: &ActivityContext,
        request: &OperationRequest,
    ) -> Result<(), ActivityError>;

    /// Remove the service from the cluster
    async fn uninstall(
        &self,
        ctx: &ActivityContext,
        request: &OperationRequest,
    ) -> Result<(), ActivityError>;

    /// Upgrade paths known for the service, if the operator has a catalog
    fn upgrade_paths(&self, _service_name: &str) -> Option<UpgradePaths> {
        None
    }
}
