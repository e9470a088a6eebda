//! Helm-backed service operator

use crate::error::HelmError;
use crate::helm::{ChartInstall, Helm, ReleaseStatus, ReleaseTarget};
use async_trait::async_trait;
use cloudplane_cloud::{ActivityContext, ActivityError, Waiter, encode, token_for};
use cloudplane_services::{OperationRequest, ServiceOperator, UpgradePaths};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Marks releases written by this operator
const DESCRIPTION_PREFIX: &str = "cloudplane:";

/// Chart backing one integrated service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    /// Chart reference, e.g. `grafana/loki`
    pub chart: String,

    /// Repository URL; its name is the prefix of `chart`
    #[serde(default)]
    pub repository: Option<String>,

    pub namespace: String,

    #[serde(default)]
    pub upgrade_paths: UpgradePaths,
}

impl ChartSpec {
    pub fn new(chart: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            chart: chart.into(),
            repository: None,
            namespace: namespace.into(),
            upgrade_paths: UpgradePaths::new(),
        }
    }

    pub fn with_repository(mut self, url: impl Into<String>) -> Self {
        self.repository = Some(url.into());
        self
    }

    pub fn with_upgrade_paths(mut self, paths: UpgradePaths) -> Self {
        self.upgrade_paths = paths;
        self
    }

    fn repository_name(&self) -> Option<&str> {
        self.chart.split_once('/').map(|(repo, _)| repo)
    }
}

/// Runs each phase as helm commands against the cluster's kube context
pub struct HelmOperator {
    helm: Helm,
    waiter: Waiter,
    charts: HashMap<String, ChartSpec>,
}

impl HelmOperator {
    pub fn new(helm: Helm, waiter: Waiter) -> Self {
        Self {
            helm,
            waiter,
            charts: HashMap::new(),
        }
    }

    pub fn with_chart(mut self, service_name: impl Into<String>, chart: ChartSpec) -> Self {
        self.charts.insert(service_name.into(), chart);
        self
    }

    fn chart(&self, service_name: &str) -> Result<&ChartSpec, ActivityError> {
        self.charts
            .get(service_name)
            .ok_or_else(|| encode(HelmError::UnknownService(service_name.to_string())))
    }
}

fn target<'a>(request: &'a OperationRequest, chart: &'a ChartSpec) -> ReleaseTarget<'a> {
    ReleaseTarget {
        kube_context: &request.cluster.name,
        namespace: &chart.namespace,
        release: &request.service_name,
    }
}

#[async_trait]
impl ServiceOperator for HelmOperator {
    async fn pre_install(
        &self,
        _ctx: &ActivityContext,
        request: &OperationRequest,
    ) -> Result<(), ActivityError> {
        let chart = self.chart(&request.service_name)?;

        match (chart.repository_name(), &chart.repository) {
            (Some(name), Some(url)) => {
                self.helm.repo_add(name, url).await.map_err(encode)?;
                tracing::info!("Added chart repository {} ({})", name, url);
            }
            (None, Some(url)) => {
                return Err(encode(HelmError::InvalidRequest(format!(
                    "chart {} has repository {} but no repository prefix",
                    chart.chart, url
                ))));
            }
            _ => {}
        }
        Ok(())
    }

    async fn install(
        &self,
        ctx: &ActivityContext,
        request: &OperationRequest,
    ) -> Result<(), ActivityError> {
        let chart = self.chart(&request.service_name)?;
        let version = request.version.as_deref().ok_or_else(|| {
            encode(HelmError::InvalidRequest(format!(
                "no version to install for {}",
                request.service_name
            )))
        })?;

        let mut token = None;
        token_for(ctx, &mut token);
        let description = format!("{}{}", DESCRIPTION_PREFIX, token.unwrap_or_default());
        let target = target(request, chart);

        // A retry after a lost response must not upgrade twice
        match self.helm.status(&target).await {
            Ok(release)
                if release.info.status == ReleaseStatus::Deployed
                    && release.info.description == description =>
            {
                tracing::info!(
                    "Release {} already deployed by this request, skipping install",
                    request.service_name
                );
                return Ok(());
            }
            Ok(_) | Err(HelmError::ReleaseNotFound(_)) => {}
            Err(e) => return Err(encode(e)),
        }

        ctx.heartbeat(Some(format!("installing {} {}", chart.chart, version)))?;
        self.helm
            .upgrade_install(
                &target,
                &ChartInstall {
                    chart: &chart.chart,
                    version,
                    values: &request.config,
                    description: &description,
                },
            )
            .await
            .map_err(encode)?;

        tracing::info!(
            "Installed {} {} on {}",
            request.service_name,
            version,
            request.cluster.name
        );
        Ok(())
    }

    async fn post_install(
        &self,
        ctx: &ActivityContext,
        request: &OperationRequest,
    ) -> Result<(), ActivityError> {
        let chart = self.chart(&request.service_name)?;
        let target = target(request, chart);
        let (helm, target) = (&self.helm, &target);

        self.waiter
            .wait_until(ctx, move || async move {
                let release = helm.status(target).await?;
                let status = release.info.status;
                match status {
                    ReleaseStatus::Deployed => Ok(()),
                    status if status.is_pending() => Err(HelmError::ReleaseNotReady {
                        release: release.name,
                        status: status.to_string(),
                    }),
                    ReleaseStatus::Failed => Err(HelmError::ReleaseFailed {
                        release: release.name,
                        description: release.info.description,
                    }),
                    status => Err(HelmError::ReleaseFailed {
                        release: release.name,
                        description: format!("unexpected status {}", status),
                    }),
                }
            })
            .await
            .map_err(encode)
    }

    async fn uninstall(
        &self,
        _ctx: &ActivityContext,
        request: &OperationRequest,
    ) -> Result<(), ActivityError> {
        let chart = self.chart(&request.service_name)?;

        match self.helm.uninstall(&target(request, chart)).await {
            Ok(()) => {
                tracing::info!(
                    "Uninstalled {} from {}",
                    request.service_name,
                    request.cluster.name
                );
                Ok(())
            }
            Err(HelmError::ReleaseNotFound(_)) => {
                tracing::info!("Release {} already gone", request.service_name);
                Ok(())
            }
            Err(e) => Err(encode(e)),
        }
    }

    fn upgrade_paths(&self, service_name: &str) -> Option<UpgradePaths> {
        self.charts
            .get(service_name)
            .map(|chart| chart.upgrade_paths.clone())
            .filter(|paths| !paths.is_empty())
    }
}
