//! Daemon settings file

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where the service store lives; defaults to the local data directory
    pub state_dir: Option<PathBuf>,
    pub waiter: WaiterSettings,
    pub retry: RetrySettings,
    pub reconciler: ReconcilerSettings,
    pub helm: HelmSettings,
    pub clusters: Vec<ClusterSettings>,
    pub services: BTreeMap<String, ServiceSettings>,
    pub authorization: AuthorizationSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaiterSettings {
    pub poll_interval_secs: u64,
}

impl Default for WaiterSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
        }
    }
}

impl WaiterSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerSettings {
    /// Automatic retries of a failed phase; 0 waits for an explicit retry
    pub auto_retry_limit: u32,
    pub resync_interval_secs: u64,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            auto_retry_limit: 0,
            resync_interval_secs: 30,
        }
    }
}

impl ReconcilerSettings {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmSettings {
    pub binary: PathBuf,
}

impl Default for HelmSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("helm"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSettings {
    pub id: u64,
    /// Also the kube context used to reach the cluster
    pub name: String,
    pub org_id: u64,
    pub uid: String,
    #[serde(default = "default_true")]
    pub ready: bool,
    #[serde(default)]
    pub rbac_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSettings {
    pub chart: String,
    #[serde(default)]
    pub repository: Option<String>,
    pub namespace: String,
    #[serde(default)]
    pub upgrade_paths: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationSettings {
    pub users: Vec<UserSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub name: String,
    pub org_id: u64,
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Parse and validate a settings file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let settings: Settings =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.waiter.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "waiter.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.reconciler.resync_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "reconciler.resync_interval_secs must be at least 1".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        for cluster in &self.clusters {
            if !ids.insert(cluster.id) {
                return Err(ConfigError::Invalid(format!(
                    "cluster id {} is defined more than once",
                    cluster.id
                )));
            }
        }

        for (name, service) in &self.services {
            if service.chart.is_empty() || service.namespace.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "service {} needs both chart and namespace",
                    name
                )));
            }
        }

        Ok(())
    }

    /// The configured state directory, or the platform default
    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dirs::data_local_dir()
                .ok_or(ConfigError::ConfigDirNotFound)?
                .join("cloudplane")),
        }
    }
}
