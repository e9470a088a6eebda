//! helm CLI wrapper
//!
//! Wraps the helm commands the operator needs. Every command targets a
//! cluster through its kube context.

use crate::error::{HelmError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// helm CLI wrapper
#[derive(Debug, Clone)]
pub struct Helm {
    binary: PathBuf,
}

impl Default for Helm {
    fn default() -> Self {
        Self::new("helm")
    }
}

/// Where a release lives
#[derive(Debug, Clone, Copy)]
pub struct ReleaseTarget<'a> {
    pub kube_context: &'a str,
    pub namespace: &'a str,
    pub release: &'a str,
}

impl ReleaseTarget<'_> {
    fn args(&self) -> [&str; 4] {
        [
            "--namespace",
            self.namespace,
            "--kube-context",
            self.kube_context,
        ]
    }
}

/// Chart installation request
#[derive(Debug, Clone)]
pub struct ChartInstall<'a> {
    pub chart: &'a str,
    pub version: &'a str,
    pub values: &'a serde_json::Value,

    /// Stored as the release description so a later status call can tell
    /// whether this exact request was already applied
    pub description: &'a str,
}

impl Helm {
    pub fn new(binary: impl AsRef<Path>) -> Self {
        Self {
            binary: binary.as_ref().to_path_buf(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Check that helm can be executed and return its version
    pub async fn version(&self) -> Result<String> {
        let output = self.run_command(&["version", "--short"], None).await?;
        Ok(output.trim().to_string())
    }

    /// Run a helm command and return stdout
    async fn run_command(&self, args: &[&str], stdin: Option<&str>) -> Result<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: {} {}", self.binary.display(), args.join(" "));

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => HelmError::HelmNotFound,
            _ => HelmError::IoError(e),
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            pipe.shutdown().await?;
        }

        let output = child.wait_with_output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(HelmError::CommandFailed(stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Add (or refresh) a chart repository
    pub async fn repo_add(&self, name: &str, url: &str) -> Result<()> {
        self.run_command(&["repo", "add", name, url, "--force-update"], None)
            .await?;
        Ok(())
    }

    /// Install the release, or upgrade it when it already exists
    ///
    /// Values are passed on stdin; JSON is valid YAML for `-f -`.
    pub async fn upgrade_install(
        &self,
        target: &ReleaseTarget<'_>,
        install: &ChartInstall<'_>,
    ) -> Result<()> {
        let values = match install.values {
            serde_json::Value::Null => "{}".to_string(),
            values => serde_json::to_string(values)?,
        };

        let mut args = vec![
            "upgrade",
            target.release,
            install.chart,
            "--install",
            "--version",
            install.version,
            "--create-namespace",
            "--description",
            install.description,
            "--values",
            "-",
        ];
        args.extend(target.args());

        self.run_command(&args, Some(&values)).await?;
        Ok(())
    }

    /// Current state of a release
    pub async fn status(&self, target: &ReleaseTarget<'_>) -> Result<Release> {
        let mut args = vec!["status", target.release, "--output", "json"];
        args.extend(target.args());

        let output = self
            .run_command(&args, None)
            .await
            .map_err(|e| not_found_as(e, target.release))?;
        let release: Release = serde_json::from_str(&output)?;
        Ok(release)
    }

    /// Uninstall a release
    pub async fn uninstall(&self, target: &ReleaseTarget<'_>) -> Result<()> {
        let mut args = vec!["uninstall", target.release, "--wait"];
        args.extend(target.args());

        self.run_command(&args, None)
            .await
            .map_err(|e| not_found_as(e, target.release))?;
        Ok(())
    }
}

/// helm reports a missing release only through its stderr text
fn not_found_as(err: HelmError, release: &str) -> HelmError {
    match err {
        HelmError::CommandFailed(stderr) if stderr.contains("release: not found") => {
            HelmError::ReleaseNotFound(release.to_string())
        }
        other => other,
    }
}

/// Release as reported by `helm status --output json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub version: u32,
    pub info: ReleaseInfo,
    #[serde(default)]
    pub chart: Option<ChartInfo>,
}

impl Release {
    pub fn chart_version(&self) -> Option<&str> {
        self.chart.as_ref().map(|c| c.metadata.version.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub status: ReleaseStatus,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartInfo {
    pub metadata: ChartMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartMetadata {
    pub name: String,
    pub version: String,
    #[serde(rename = "appVersion", default)]
    pub app_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStatus {
    Deployed,
    Uninstalled,
    Superseded,
    Failed,
    Uninstalling,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
    #[serde(other)]
    Unknown,
}

impl ReleaseStatus {
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            ReleaseStatus::PendingInstall
                | ReleaseStatus::PendingUpgrade
                | ReleaseStatus::PendingRollback
        )
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReleaseStatus::Deployed => "deployed",
            ReleaseStatus::Uninstalled => "uninstalled",
            ReleaseStatus::Superseded => "superseded",
            ReleaseStatus::Failed => "failed",
            ReleaseStatus::Uninstalling => "uninstalling",
            ReleaseStatus::PendingInstall => "pending-install",
            ReleaseStatus::PendingUpgrade => "pending-upgrade",
            ReleaseStatus::PendingRollback => "pending-rollback",
            ReleaseStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_release() {
        let json = r#"{
            "name": "monitoring",
            "namespace": "observability",
            "version": 3,
            "info": {
                "first_deployed": "2026-01-05T10:00:00Z",
                "status": "pending-upgrade",
                "description": "cloudplane:run-1-2"
            },
            "chart": {
                "metadata": {
                    "name": "kube-prometheus-stack",
                    "version": "58.2.1",
                    "appVersion": "v0.73.2"
                }
            }
        }"#;

        let release: Release = serde_json::from_str(json).unwrap();
        assert_eq!(release.version, 3);
        assert_eq!(release.info.status, ReleaseStatus::PendingUpgrade);
        assert!(release.info.status.is_pending());
        assert_eq!(release.info.description, "cloudplane:run-1-2");
        assert_eq!(release.chart_version(), Some("58.2.1"));
    }

    #[test]
    fn test_unknown_status() {
        let json = r#"{"name": "x", "info": {"status": "something-new"}}"#;
        let release: Release = serde_json::from_str(json).unwrap();
        assert_eq!(release.info.status, ReleaseStatus::Unknown);
        assert!(release.chart_version().is_none());
    }

    #[test]
    fn test_not_found_detection() {
        let err = not_found_as(
            HelmError::CommandFailed("Error: release: not found".to_string()),
            "logging",
        );
        assert!(matches!(err, HelmError::ReleaseNotFound(name) if name == "logging"));

        let err = not_found_as(
            HelmError::CommandFailed("Error: Kubernetes cluster unreachable".to_string()),
            "logging",
        );
        assert!(matches!(err, HelmError::CommandFailed(_)));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let helm = Helm::new("/nonexistent/bin/helm");
        assert!(matches!(helm.version().await, Err(HelmError::HelmNotFound)));
    }
}
