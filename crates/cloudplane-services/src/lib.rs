//! Cloudplane integrated services
//!
//! Integrated services (monitoring, logging, DNS, ingress) are attached to
//! clusters as [`ServiceInstance`]s. The API layer writes the desired
//! state; the [`Reconciler`] walks each instance through the install,
//! upgrade and uninstall phases by calling a [`ServiceOperator`] one
//! activity at a time.
//!
//! ```text
//!  ServiceApi ──spec──▶ InstanceStore ◀──status── Reconciler
//!                                                    │
//!                                         Execution (run id, activities)
//!                                                    │
//!                                            ServiceOperator
//! ```

pub mod api;
pub mod cluster;
pub mod error;
pub mod execution;
pub mod model;
pub mod operator;
pub mod reconciler;
pub mod store;
pub mod upgrade;

pub use api::{ServiceApi, resource_path};
pub use cluster::{Authorizer, Cluster, ClusterLookup, DnsRecords, OrgMembership, StaticClusters};
pub use error::{Result, ServiceError};
pub use execution::Execution;
pub use model::{ManagementStatus, Phase, ServiceInstance, ServiceKey, ServiceSpec, ServiceStatus};
pub use operator::{OperationRequest, ServiceOperator};
pub use reconciler::{
    Decision, MAX_INSTALL_CYCLES, Reconciler, ReconcilerConfig, Transition, plan,
};
pub use store::{FileStore, InstanceStore, MemoryStore};
pub use upgrade::{UpgradePathError, UpgradePaths, next_version, upgrade_route};
