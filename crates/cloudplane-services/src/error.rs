//! Service reconciliation error types

use crate::model::ServiceKey;
use cloudplane_cloud::ActivityError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Service instance not found: {0}")]
    InstanceNotFound(ServiceKey),

    #[error("Cluster not found: {0}")]
    ClusterNotFound(u64),

    #[error("Forbidden: {user} may not {method} {path}")]
    Forbidden {
        user: String,
        method: String,
        path: String,
    },

    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Collaborator call failed: {0}")]
    Collaborator(#[from] ActivityError),

    #[error("Reconciliation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
