//! Integrated service instance model
//!
//! A [`ServiceInstance`] pairs the desired state (`spec`, written by the API
//! layer) with the observed state (`status`, written only by the
//! reconciler) of one service attached to one cluster.

use crate::upgrade::UpgradePaths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one service on one cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub cluster_id: u64,
    pub service_name: String,
}

impl ServiceKey {
    pub fn new(cluster_id: u64, service_name: impl Into<String>) -> Self {
        Self {
            cluster_id,
            service_name: service_name.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster_id, self.service_name)
    }
}

/// Desired state of a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub service_name: String,
    pub requested_version: String,
    pub enabled: bool,

    /// Service-specific configuration, opaque to the reconciler
    #[serde(default)]
    pub config: serde_json::Value,
}

impl ServiceSpec {
    pub fn new(service_name: impl Into<String>, requested_version: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            requested_version: requested_version.into(),
            enabled: true,
            config: serde_json::Value::Null,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Whether the phase machine governs a service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagementStatus {
    /// No active reconciliation
    #[default]
    Unmanaged,
    /// The phase machine governs the service
    Managed,
    /// Reconciliation refuses to proceed until the spec changes
    Invalid,
}

impl fmt::Display for ManagementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagementStatus::Unmanaged => write!(f, "unmanaged"),
            ManagementStatus::Managed => write!(f, "managed"),
            ManagementStatus::Invalid => write!(f, "invalid"),
        }
    }
}

/// Step of the install/upgrade/uninstall state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    PreInstalling,
    PreInstallFailed,
    Installing,
    InstallFailed,
    PostInstall,
    PostInstallFailed,
    Installed,
    Uninstalling,
    UninstallFailed,
    Uninstalled,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::PreInstalling => "PreInstalling",
            Phase::PreInstallFailed => "PreInstallFailed",
            Phase::Installing => "Installing",
            Phase::InstallFailed => "InstallFailed",
            Phase::PostInstall => "PostInstall",
            Phase::PostInstallFailed => "PostInstallFailed",
            Phase::Installed => "Installed",
            Phase::Uninstalling => "Uninstalling",
            Phase::UninstallFailed => "UninstallFailed",
            Phase::Uninstalled => "Uninstalled",
        }
    }

    /// Phases that execute a provider step when reconciled
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Phase::PreInstalling | Phase::Installing | Phase::PostInstall | Phase::Uninstalling
        )
    }

    pub fn is_failed(&self) -> bool {
        self.retry_phase().is_some()
    }

    pub fn is_terminal_success(&self) -> bool {
        matches!(self, Phase::Installed | Phase::Uninstalled)
    }

    /// Whether the phase belongs to an install or upgrade cycle
    pub fn is_install_cycle(&self) -> bool {
        !matches!(
            self,
            Phase::Uninstalling | Phase::UninstallFailed | Phase::Uninstalled
        )
    }

    /// Phase entered when this phase's step succeeds
    pub fn on_success(&self) -> Option<Phase> {
        match self {
            Phase::PreInstalling => Some(Phase::Installing),
            Phase::Installing => Some(Phase::PostInstall),
            Phase::PostInstall => Some(Phase::Installed),
            Phase::Uninstalling => Some(Phase::Uninstalled),
            _ => None,
        }
    }

    /// Phase entered when this phase's step fails
    pub fn on_failure(&self) -> Option<Phase> {
        match self {
            Phase::PreInstalling => Some(Phase::PreInstallFailed),
            Phase::Installing => Some(Phase::InstallFailed),
            Phase::PostInstall => Some(Phase::PostInstallFailed),
            Phase::Uninstalling => Some(Phase::UninstallFailed),
            _ => None,
        }
    }

    /// In-progress phase a failed phase re-enters on retry
    pub fn retry_phase(&self) -> Option<Phase> {
        match self {
            Phase::PreInstallFailed => Some(Phase::PreInstalling),
            Phase::InstallFailed => Some(Phase::Installing),
            Phase::PostInstallFailed => Some(Phase::PostInstall),
            Phase::UninstallFailed => Some(Phase::Uninstalling),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed state of a service, owned by the reconciler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Target version -> ordered chain of versions an upgrade to it must pass
    #[serde(default)]
    pub available_upgrade_paths: UpgradePaths,

    pub installed_version: Option<String>,

    #[serde(default)]
    pub management_status: ManagementStatus,

    pub phase: Option<Phase>,

    /// Version the current cycle is converging to
    pub converging_to_version: Option<String>,

    /// Spec generation this status was last planned against
    #[serde(default)]
    pub observed_generation: u64,

    /// Consecutive failed steps since the last successful cycle
    #[serde(default)]
    pub failure_count: u32,

    /// Last failure or invalidity reason
    pub message: Option<String>,

    pub updated_at: DateTime<Utc>,
}

impl Default for ServiceStatus {
    fn default() -> Self {
        Self {
            available_upgrade_paths: UpgradePaths::new(),
            installed_version: None,
            management_status: ManagementStatus::Unmanaged,
            phase: None,
            converging_to_version: None,
            observed_generation: 0,
            failure_count: 0,
            message: None,
            updated_at: Utc::now(),
        }
    }
}

/// One integrated service attached to one cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub cluster_id: u64,

    /// Bumped by the API layer on every spec write and retry request
    pub generation: u64,

    pub spec: ServiceSpec,

    #[serde(default)]
    pub status: ServiceStatus,
}

impl ServiceInstance {
    pub fn new(cluster_id: u64, spec: ServiceSpec) -> Self {
        Self {
            cluster_id,
            generation: 1,
            spec,
            status: ServiceStatus::default(),
        }
    }

    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(self.cluster_id, self.spec.service_name.clone())
    }

    /// Whether the spec changed (or a retry was requested) since the last plan
    pub fn has_new_generation(&self) -> bool {
        self.generation > self.status.observed_generation
    }
}
