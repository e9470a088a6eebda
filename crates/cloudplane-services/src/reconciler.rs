//! Service reconciliation
//!
//! ```text
//!            ┌──────────────┐  fail   ┌──────────────────┐
//! spec ───▶  │ PreInstalling│ ──────▶ │ PreInstallFailed │
//!            └──────┬───────┘         └──────────────────┘
//!                   ▼
//!            ┌──────────────┐  fail   ┌──────────────────┐
//!            │  Installing  │ ──────▶ │  InstallFailed   │
//!            └──────┬───────┘         └──────────────────┘
//!                   ▼
//!            ┌──────────────┐  fail   ┌──────────────────┐
//!            │  PostInstall │ ──────▶ │ PostInstallFailed│
//!            └──────┬───────┘         └──────────────────┘
//!                   ▼
//!              Installed
//!
//!   Uninstalling ──▶ Uninstalled      (fail: UninstallFailed)
//! ```
//!
//! [`plan`] decides the next move from a single `(spec, status)` snapshot.
//! [`Reconciler::step`] carries out one decision, calling the operator at
//! most once, and persists the resulting status before returning.

use crate::cluster::ClusterLookup;
use crate::error::{Result, ServiceError};
use crate::execution::Execution;
use crate::model::{ManagementStatus, Phase, ServiceInstance, ServiceKey, ServiceStatus};
use crate::operator::{OperationRequest, ServiceOperator};
use crate::store::InstanceStore;
use crate::upgrade::next_version;
use chrono::Utc;
use cloudplane_cloud::{ActivityContext, ActivityError, RetryPolicy, decode};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Install cycles one execution may start before handing over to the next
pub const MAX_INSTALL_CYCLES: usize = 16;

#[derive(Debug, Clone, Default)]
pub struct ReconcilerConfig {
    /// Retry policy of every provider call
    pub retry: RetryPolicy,

    /// Automatic re-entries of a failed phase before waiting for a retry
    /// request; 0 leaves every failure to an explicit trigger
    pub auto_retry_limit: u32,
}

/// Next move for one service instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Desired and observed state agree
    Settled,
    /// Nothing may happen until the spec changes or a retry is requested
    Halted { reason: String },
    /// The spec cannot be reconciled
    Invalidate { reason: String },
    /// A corrected spec needs no provider work
    Revalidate,
    /// Begin an install or upgrade cycle
    StartInstall { version: String },
    /// Begin removing the service
    StartUninstall,
    /// Re-enter the in-progress phase of a failed phase
    Retry { phase: Phase },
    /// Execute the step of an in-progress phase
    Run { phase: Phase },
}

impl Decision {
    /// Whether carrying out the decision calls the operator
    pub fn calls_provider(&self) -> bool {
        matches!(self, Decision::Run { .. })
    }
}

/// Plan the next move for `instance`
pub fn plan(instance: &ServiceInstance, auto_retry_limit: u32) -> Decision {
    let status = &instance.status;
    let new_generation = instance.has_new_generation();

    if status.management_status == ManagementStatus::Invalid && !new_generation {
        return Decision::Halted {
            reason: status
                .message
                .clone()
                .unwrap_or_else(|| "spec is invalid".to_string()),
        };
    }

    if let Some(phase) = status.phase {
        if phase.is_in_progress() {
            // A spec change waits for the running cycle to finish
            return Decision::Run { phase };
        }

        if let Some(retry_phase) = phase.retry_phase() {
            if !new_generation {
                if auto_retry_limit > 0 && status.failure_count <= auto_retry_limit {
                    return Decision::Retry { phase: retry_phase };
                }
                return Decision::Halted {
                    reason: format!("{} awaiting retry", phase),
                };
            }

            let desired = desired(instance);
            let same_target = match &desired {
                Decision::StartInstall { version } => {
                    phase.is_install_cycle()
                        && status.converging_to_version.as_deref() == Some(version.as_str())
                }
                Decision::StartUninstall => !phase.is_install_cycle(),
                _ => false,
            };
            return if same_target {
                Decision::Retry { phase: retry_phase }
            } else {
                desired
            };
        }
    }

    let desired = desired(instance);
    if desired == Decision::Settled
        && status.management_status == ManagementStatus::Invalid
    {
        return Decision::Revalidate;
    }
    desired
}

/// What the spec asks for, ignoring any failed phase
fn desired(instance: &ServiceInstance) -> Decision {
    let spec = &instance.spec;
    let status = &instance.status;

    if !spec.enabled {
        return match status.phase {
            None | Some(Phase::Uninstalled) => Decision::Settled,
            Some(_) => Decision::StartUninstall,
        };
    }

    let installed = status.installed_version.as_deref();
    if installed == Some(spec.requested_version.as_str()) && status.phase == Some(Phase::Installed)
    {
        return Decision::Settled;
    }

    match next_version(
        &status.available_upgrade_paths,
        installed,
        &spec.requested_version,
    ) {
        Ok(Some(version)) => Decision::StartInstall { version },
        // Installed matches but the phase does not: converge again
        Ok(None) => Decision::StartInstall {
            version: spec.requested_version.clone(),
        },
        Err(e) => Decision::Invalidate {
            reason: e.to_string(),
        },
    }
}

/// Outcome of one reconciliation step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Settled,
    Halted { reason: String },
    WaitingForCluster,
    Invalidated { reason: String },
    Revalidated,
    /// A cycle began or a failed phase was re-entered
    Entered { phase: Phase },
    Advanced { from: Phase, to: Phase },
    Failed { from: Phase, to: Phase, message: String },
}

impl Transition {
    /// Whether the execution should keep stepping
    pub fn continues(&self) -> bool {
        matches!(self, Transition::Entered { .. } | Transition::Advanced { .. })
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Settled => write!(f, "settled"),
            Transition::Halted { reason } => write!(f, "halted: {}", reason),
            Transition::WaitingForCluster => write!(f, "waiting for cluster"),
            Transition::Invalidated { reason } => write!(f, "invalid: {}", reason),
            Transition::Revalidated => write!(f, "revalidated"),
            Transition::Entered { phase } => write!(f, "entered {}", phase),
            Transition::Advanced { from, to } => write!(f, "{} -> {}", from, to),
            Transition::Failed { from, to, message } => {
                write!(f, "{} -> {}: {}", from, to, message)
            }
        }
    }
}

/// Drives service instances towards their spec
pub struct Reconciler {
    store: Arc<dyn InstanceStore>,
    operator: Arc<dyn ServiceOperator>,
    clusters: Arc<dyn ClusterLookup>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn InstanceStore>,
        operator: Arc<dyn ServiceOperator>,
        clusters: Arc<dyn ClusterLookup>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            operator,
            clusters,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn InstanceStore> {
        &self.store
    }

    /// Reconcile one instance until it settles, halts or fails
    pub async fn reconcile(
        &self,
        key: &ServiceKey,
        cancel: CancellationToken,
    ) -> Result<ServiceStatus> {
        let execution = Execution::new(self.config.retry.clone(), cancel);
        let span = tracing::info_span!(
            "reconcile",
            service = %key,
            run_id = %execution.run_id()
        );

        async {
            let mut cycles = 0;
            loop {
                if execution.is_cancelled() {
                    tracing::info!("Reconciliation cancelled");
                    return Err(ServiceError::Cancelled);
                }

                let transition = self.step(&execution, key).await?;
                if !transition.continues() {
                    break;
                }

                if transition
                    == (Transition::Entered {
                        phase: Phase::PreInstalling,
                    })
                {
                    cycles += 1;
                    if cycles > MAX_INSTALL_CYCLES {
                        tracing::warn!(
                            "{} started {} install cycles, resuming in a later execution",
                            key,
                            MAX_INSTALL_CYCLES
                        );
                        break;
                    }
                }
            }

            Ok(self
                .store
                .load(key.cluster_id, &key.service_name)
                .await?
                .status)
        }
        .instrument(span)
        .await
    }

    /// Carry out one planning decision
    pub async fn step(&self, execution: &Execution, key: &ServiceKey) -> Result<Transition> {
        let instance = self.store.load(key.cluster_id, &key.service_name).await?;
        let decision = plan(&instance, self.config.auto_retry_limit);
        tracing::debug!("Planned {:?} for {}", decision, key);

        let mut status = instance.status.clone();
        let transition = match decision {
            Decision::Settled => return Ok(Transition::Settled),
            Decision::Halted { reason } => {
                tracing::debug!("{} halted: {}", key, reason);
                return Ok(Transition::Halted { reason });
            }
            Decision::Invalidate { reason } => {
                tracing::warn!("{} is invalid: {}", key, reason);
                status.management_status = ManagementStatus::Invalid;
                status.message = Some(reason.clone());
                status.observed_generation = instance.generation;
                Transition::Invalidated { reason }
            }
            Decision::Revalidate => {
                status.management_status = if status.phase.is_some() {
                    ManagementStatus::Managed
                } else {
                    ManagementStatus::Unmanaged
                };
                status.message = None;
                status.observed_generation = instance.generation;
                Transition::Revalidated
            }
            Decision::StartInstall { version } => {
                tracing::info!("{} converging to version {}", key, version);
                enter(&mut status, &instance, Phase::PreInstalling);
                status.converging_to_version = Some(version);
                Transition::Entered {
                    phase: Phase::PreInstalling,
                }
            }
            Decision::StartUninstall => {
                tracing::info!("{} uninstalling", key);
                enter(&mut status, &instance, Phase::Uninstalling);
                status.converging_to_version = None;
                Transition::Entered {
                    phase: Phase::Uninstalling,
                }
            }
            Decision::Retry { phase } => {
                tracing::info!(
                    "{} retrying {} (failures so far: {})",
                    key,
                    phase,
                    status.failure_count
                );
                enter(&mut status, &instance, phase);
                Transition::Entered { phase }
            }
            Decision::Run { phase } => match self.run_phase(execution, &instance, phase).await? {
                Some(transition) => {
                    apply(&mut status, &transition, self.operator.as_ref(), &instance);
                    transition
                }
                None => return Ok(Transition::WaitingForCluster),
            },
        };

        status.updated_at = Utc::now();
        self.store.save_status(key, &status).await?;

        match &transition {
            Transition::Failed { .. } => tracing::warn!("{}: {}", key, transition),
            _ => tracing::info!("{}: {}", key, transition),
        }
        Ok(transition)
    }

    /// Run the operator call of an in-progress phase
    ///
    /// `None` when the cluster is not ready yet.
    async fn run_phase(
        &self,
        execution: &Execution,
        instance: &ServiceInstance,
        phase: Phase,
    ) -> Result<Option<Transition>> {
        let cluster = self.clusters.get_cluster(instance.cluster_id).await?;
        if !cluster.ready {
            tracing::info!("Cluster {} is not ready, waiting", cluster.name);
            return Ok(None);
        }

        let version = match phase {
            Phase::Uninstalling => instance.status.installed_version.clone(),
            _ => instance.status.converging_to_version.clone(),
        };
        let request = OperationRequest {
            cluster,
            service_name: instance.spec.service_name.clone(),
            version,
            config: instance.spec.config.clone(),
        };

        let operator = self.operator.clone();
        let result = execution
            .activity(phase.as_str(), move |ctx| {
                let operator = operator.clone();
                let request = request.clone();
                async move { call_operator(operator.as_ref(), phase, &ctx, &request).await }
            })
            .await;

        let transition = match result {
            Ok(()) => Transition::Advanced {
                from: phase,
                to: phase.on_success().unwrap_or(phase),
            },
            Err(e) if e.is_cancelled() => return Err(ServiceError::Cancelled),
            Err(e) => {
                let decoded = decode(e);
                tracing::debug!("{} failed with code {:?}", phase, decoded.code());
                Transition::Failed {
                    from: phase,
                    to: phase.on_failure().unwrap_or(phase),
                    message: decoded.to_string(),
                }
            }
        };
        Ok(Some(transition))
    }
}

async fn call_operator(
    operator: &dyn ServiceOperator,
    phase: Phase,
    ctx: &ActivityContext,
    request: &OperationRequest,
) -> std::result::Result<(), ActivityError> {
    match phase {
        Phase::PreInstalling => operator.pre_install(ctx, request).await,
        Phase::Installing => operator.install(ctx, request).await,
        Phase::PostInstall => operator.post_install(ctx, request).await,
        Phase::Uninstalling => operator.uninstall(ctx, request).await,
        other => Err(ActivityError::new(
            "InvalidPhase",
            format!("{} has no operator step", other),
        )
        .non_retryable()),
    }
}

/// Enter an in-progress phase, recording the generation it answers
fn enter(status: &mut ServiceStatus, instance: &ServiceInstance, phase: Phase) {
    if instance.has_new_generation() {
        status.failure_count = 0;
    }
    status.management_status = ManagementStatus::Managed;
    status.phase = Some(phase);
    status.message = None;
    status.observed_generation = instance.generation;
}

fn apply(
    status: &mut ServiceStatus,
    transition: &Transition,
    operator: &dyn ServiceOperator,
    instance: &ServiceInstance,
) {
    match transition {
        Transition::Advanced { to, .. } => {
            status.phase = Some(*to);
            match to {
                Phase::Installed => {
                    status.installed_version = status.converging_to_version.take();
                    status.failure_count = 0;
                    if let Some(paths) = operator.upgrade_paths(&instance.spec.service_name) {
                        status.available_upgrade_paths = paths;
                    }
                }
                Phase::Uninstalled => {
                    status.installed_version = None;
                    status.converging_to_version = None;
                    status.failure_count = 0;
                }
                _ => {}
            }
        }
        Transition::Failed { to, message, .. } => {
            status.phase = Some(*to);
            status.failure_count += 1;
            status.message = Some(message.clone());
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServiceSpec;

    fn installed(version: &str) -> ServiceInstance {
        let mut instance = ServiceInstance::new(1, ServiceSpec::new("monitoring", version));
        instance.status.management_status = ManagementStatus::Managed;
        instance.status.phase = Some(Phase::Installed);
        instance.status.installed_version = Some(version.to_string());
        instance.status.observed_generation = instance.generation;
        instance
    }

    #[test]
    fn test_plan_settled() {
        assert_eq!(plan(&installed("1.0"), 0), Decision::Settled);

        let disabled = ServiceInstance::new(1, ServiceSpec::new("monitoring", "1.0").disabled());
        assert_eq!(plan(&disabled, 0), Decision::Settled);
    }

    #[test]
    fn test_plan_fresh_install() {
        let instance = ServiceInstance::new(1, ServiceSpec::new("monitoring", "1.0"));
        assert_eq!(
            plan(&instance, 0),
            Decision::StartInstall {
                version: "1.0".to_string()
            }
        );
    }

    #[test]
    fn test_plan_upgrade_follows_path() {
        let mut instance = installed("1.0");
        instance.status.available_upgrade_paths.insert(
            "2.0".to_string(),
            vec!["1.0".to_string(), "1.5".to_string()],
        );
        instance.spec.requested_version = "2.0".to_string();
        instance.generation += 1;

        assert_eq!(
            plan(&instance, 0),
            Decision::StartInstall {
                version: "1.5".to_string()
            }
        );
    }

    #[test]
    fn test_plan_missing_path_invalidates() {
        let mut instance = installed("1.0");
        instance
            .status
            .available_upgrade_paths
            .insert("2.0".to_string(), vec!["1.5".to_string()]);
        instance.spec.requested_version = "2.0".to_string();
        instance.generation += 1;

        let decision = plan(&instance, 0);
        assert!(matches!(decision, Decision::Invalidate { .. }));
        assert!(!decision.calls_provider());

        // Stays halted until the spec changes again
        instance.status.management_status = ManagementStatus::Invalid;
        instance.status.observed_generation = instance.generation;
        assert!(matches!(plan(&instance, 0), Decision::Halted { .. }));
    }

    #[test]
    fn test_plan_failed_phase() {
        let mut instance = ServiceInstance::new(1, ServiceSpec::new("monitoring", "1.0"));
        instance.status.management_status = ManagementStatus::Managed;
        instance.status.phase = Some(Phase::InstallFailed);
        instance.status.converging_to_version = Some("1.0".to_string());
        instance.status.observed_generation = instance.generation;
        instance.status.failure_count = 1;

        assert!(matches!(plan(&instance, 0), Decision::Halted { .. }));
        assert_eq!(
            plan(&instance, 1),
            Decision::Retry {
                phase: Phase::Installing
            }
        );

        instance.status.failure_count = 2;
        assert!(matches!(plan(&instance, 1), Decision::Halted { .. }));

        // A retry request re-enters the failed phase
        instance.generation += 1;
        assert_eq!(
            plan(&instance, 0),
            Decision::Retry {
                phase: Phase::Installing
            }
        );

        // A new target starts over
        instance.spec.requested_version = "1.1".to_string();
        assert_eq!(
            plan(&instance, 0),
            Decision::StartInstall {
                version: "1.1".to_string()
            }
        );
    }

    #[test]
    fn test_plan_in_progress_runs_despite_spec_change() {
        let mut instance = ServiceInstance::new(1, ServiceSpec::new("monitoring", "1.0"));
        instance.status.phase = Some(Phase::Installing);
        instance.spec.enabled = false;
        instance.generation = 5;

        assert_eq!(
            plan(&instance, 0),
            Decision::Run {
                phase: Phase::Installing
            }
        );
    }

    #[test]
    fn test_plan_disable() {
        let mut instance = installed("1.0");
        instance.spec.enabled = false;
        instance.generation += 1;
        assert_eq!(plan(&instance, 0), Decision::StartUninstall);

        instance.status.phase = Some(Phase::Uninstalled);
        instance.status.installed_version = None;
        assert_eq!(plan(&instance, 0), Decision::Settled);
    }

    #[test]
    fn test_plan_corrected_spec_revalidates() {
        let mut instance = installed("1.0");
        instance.status.management_status = ManagementStatus::Invalid;
        instance.status.message = Some("no upgrade path".to_string());
        instance.generation += 1;

        assert_eq!(plan(&instance, 0), Decision::Revalidate);
    }
}
