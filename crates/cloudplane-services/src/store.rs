//! Service instance persistence
//!
//! The store is the durable record of `status` and the source of truth for
//! `spec` at the start of every reconciliation step. `save_spec` and
//! `save_status` each replace one half of an existing row, so the API and
//! the reconciler never overwrite each other.

use crate::error::{Result, ServiceError};
use crate::model::{ServiceInstance, ServiceKey, ServiceSpec, ServiceStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};

const STORE_VERSION: u32 = 1;
const STORE_FILE: &str = "services.json";
const STORE_BACKUP: &str = "services.json.backup";
const LOCK_FILE: &str = "services.lock";

#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Load one instance
    async fn load(&self, cluster_id: u64, service_name: &str) -> Result<ServiceInstance>;

    /// Insert or replace a whole instance
    ///
    /// Only meant for rows that do not exist yet; updates go through
    /// `save_spec` or `save_status`.
    async fn save(&self, instance: &ServiceInstance) -> Result<()>;

    /// Replace only the spec and generation of an existing instance
    async fn save_spec(&self, key: &ServiceKey, spec: &ServiceSpec, generation: u64) -> Result<()>;

    /// Replace only the status of an existing instance
    async fn save_status(&self, key: &ServiceKey, status: &ServiceStatus) -> Result<()>;

    /// Keys of every stored instance
    async fn list(&self) -> Result<Vec<ServiceKey>>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    instances: RwLock<BTreeMap<ServiceKey, ServiceInstance>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn load(&self, cluster_id: u64, service_name: &str) -> Result<ServiceInstance> {
        let key = ServiceKey::new(cluster_id, service_name);
        self.instances
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or(ServiceError::InstanceNotFound(key))
    }

    async fn save(&self, instance: &ServiceInstance) -> Result<()> {
        self.instances
            .write()
            .await
            .insert(instance.key(), instance.clone());
        Ok(())
    }

    async fn save_spec(
        &self,
        key: &ServiceKey,
        spec: &ServiceSpec,
        generation: u64,
    ) -> Result<()> {
        let mut instances = self.instances.write().await;
        let instance = instances
            .get_mut(key)
            .ok_or_else(|| ServiceError::InstanceNotFound(key.clone()))?;
        instance.spec = spec.clone();
        instance.generation = generation;
        Ok(())
    }

    async fn save_status(&self, key: &ServiceKey, status: &ServiceStatus) -> Result<()> {
        let mut instances = self.instances.write().await;
        let instance = instances
            .get_mut(key)
            .ok_or_else(|| ServiceError::InstanceNotFound(key.clone()))?;
        instance.status = status.clone();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ServiceKey>> {
        Ok(self.instances.read().await.keys().cloned().collect())
    }
}

/// On-disk document holding every instance
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    updated_at: DateTime<Utc>,
    instances: Vec<ServiceInstance>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            updated_at: Utc::now(),
            instances: Vec::new(),
        }
    }
}

impl StoreDocument {
    fn find_mut(&mut self, key: &ServiceKey) -> Option<&mut ServiceInstance> {
        self.instances.iter_mut().find(|i| &i.key() == key)
    }
}

/// JSON file store under a state directory
///
/// Writes keep a backup of the previous file and hold a lock file so two
/// daemons never interleave read-modify-write cycles.
pub struct FileStore {
    state_dir: PathBuf,
    write_guard: Mutex<()>,
}

impl FileStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
            write_guard: Mutex::new(()),
        }
    }

    fn store_path(&self) -> PathBuf {
        self.state_dir.join(STORE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir.join(STORE_BACKUP)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE)
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        if !self.state_dir.exists() {
            fs::create_dir_all(&self.state_dir).await?;
            tracing::debug!("Created state directory: {}", self.state_dir.display());
        }
        Ok(())
    }

    /// Read the store file, falling back to the backup when it is missing
    /// or unreadable
    async fn read_document(&self) -> Result<StoreDocument> {
        let path = self.store_path();
        let backup = self.backup_path();

        if path.exists() {
            match parse_document(&path).await {
                Ok(document) => return Ok(document),
                Err(e @ (ServiceError::Json(_) | ServiceError::Io(_))) if backup.exists() => {
                    tracing::warn!("Store file unreadable ({}), reading backup", e);
                }
                Err(e) => return Err(e),
            }
        } else if backup.exists() {
            tracing::warn!("Store file missing, reading backup");
        } else {
            tracing::debug!("Store file not found, starting empty");
            return Ok(StoreDocument::default());
        }

        parse_document(&backup).await
    }

    /// Replace the store file atomically, keeping the previous one as backup
    async fn write_document(&self, document: &mut StoreDocument) -> Result<()> {
        self.ensure_state_dir().await?;
        document.updated_at = Utc::now();

        let path = self.store_path();
        if path.exists() {
            fs::copy(&path, self.backup_path()).await?;
        }

        let content = serde_json::to_string_pretty(document)?;
        let state_dir = self.state_dir.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut file = NamedTempFile::new_in(&state_dir)?;
            file.write_all(content.as_bytes())?;
            file.as_file().sync_all()?;
            file.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| ServiceError::Store(format!("store write task failed: {}", e)))??;

        tracing::debug!("Saved {} service instances", document.instances.len());
        Ok(())
    }

    /// Read, modify and write the document under the lock
    async fn modify<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut StoreDocument) -> Result<()> + Send,
    {
        let _guard = self.write_guard.lock().await;
        let lock = self.acquire_lock().await?;

        let result = async {
            let mut document = self.read_document().await?;
            f(&mut document)?;
            self.write_document(&mut document).await
        }
        .await;

        lock.release().await?;
        result
    }

    async fn acquire_lock(&self) -> Result<StoreLock> {
        self.ensure_state_dir().await?;
        let lock_path = self.lock_path();

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let lock_info: LockInfo = serde_json::from_str(&content)?;

            // Locks older than an hour are left over from a crashed process
            let age = Utc::now().signed_duration_since(lock_info.acquired_at);
            if age.num_hours() < 1 {
                return Err(ServiceError::LockError(format!(
                    "Store is locked by {} since {}",
                    lock_info.holder, lock_info.acquired_at
                )));
            }

            tracing::warn!("Removing stale store lock from {}", lock_info.holder);
        }

        let lock_info = LockInfo {
            holder: format!(
                "{}:{}",
                std::env::var("HOSTNAME")
                    .or_else(|_| std::env::var("HOST"))
                    .unwrap_or_else(|_| "unknown".to_string()),
                std::process::id()
            ),
            acquired_at: Utc::now(),
        };

        let content = serde_json::to_string_pretty(&lock_info)?;
        fs::write(&lock_path, content).await?;

        Ok(StoreLock {
            lock_path,
            released: false,
        })
    }
}

async fn parse_document(path: &Path) -> Result<StoreDocument> {
    let content = fs::read_to_string(path).await?;
    let document: StoreDocument = serde_json::from_str(&content)?;

    if document.version > STORE_VERSION {
        return Err(ServiceError::Store(format!(
            "Store file version {} is newer than supported version {}",
            document.version, STORE_VERSION
        )));
    }

    Ok(document)
}

#[async_trait]
impl InstanceStore for FileStore {
    async fn load(&self, cluster_id: u64, service_name: &str) -> Result<ServiceInstance> {
        let key = ServiceKey::new(cluster_id, service_name);
        self.read_document()
            .await?
            .instances
            .into_iter()
            .find(|i| i.key() == key)
            .ok_or(ServiceError::InstanceNotFound(key))
    }

    async fn save(&self, instance: &ServiceInstance) -> Result<()> {
        let instance = instance.clone();
        self.modify(move |document| {
            match document.find_mut(&instance.key()) {
                Some(existing) => *existing = instance,
                None => document.instances.push(instance),
            }
            Ok(())
        })
        .await
    }

    async fn save_spec(
        &self,
        key: &ServiceKey,
        spec: &ServiceSpec,
        generation: u64,
    ) -> Result<()> {
        let key = key.clone();
        let spec = spec.clone();
        self.modify(move |document| {
            let instance = document
                .find_mut(&key)
                .ok_or_else(|| ServiceError::InstanceNotFound(key.clone()))?;
            instance.spec = spec;
            instance.generation = generation;
            Ok(())
        })
        .await
    }

    async fn save_status(&self, key: &ServiceKey, status: &ServiceStatus) -> Result<()> {
        let key = key.clone();
        let status = status.clone();
        self.modify(move |document| {
            let instance = document
                .find_mut(&key)
                .ok_or_else(|| ServiceError::InstanceNotFound(key.clone()))?;
            instance.status = status;
            Ok(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<ServiceKey>> {
        Ok(self
            .read_document()
            .await?
            .instances
            .iter()
            .map(ServiceInstance::key)
            .collect())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// Guard for the store lock file
struct StoreLock {
    lock_path: PathBuf,
    released: bool,
}

impl StoreLock {
    async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Phase;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_store_save_load() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());

        let instance = ServiceInstance::new(1, ServiceSpec::new("monitoring", "2.1.0"));
        store.save(&instance).await.unwrap();

        let loaded = store.load(1, "monitoring").await.unwrap();
        assert_eq!(loaded, instance);
        assert_eq!(store.list().await.unwrap(), vec![instance.key()]);
        assert!(!temp_dir.path().join(LOCK_FILE).exists());
    }

    #[tokio::test]
    async fn test_save_status_keeps_spec() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());

        let instance = ServiceInstance::new(1, ServiceSpec::new("logging", "1.0"));
        store.save(&instance).await.unwrap();

        // The API layer changes the spec while the reconciler holds an old copy
        let spec = ServiceSpec::new("logging", "1.1");
        store.save_spec(&instance.key(), &spec, 2).await.unwrap();

        let mut status = instance.status.clone();
        status.phase = Some(Phase::Installing);
        store.save_status(&instance.key(), &status).await.unwrap();

        let loaded = store.load(1, "logging").await.unwrap();
        assert_eq!(loaded.spec.requested_version, "1.1");
        assert_eq!(loaded.generation, 2);
        assert_eq!(loaded.status.phase, Some(Phase::Installing));
        assert!(temp_dir.path().join(STORE_BACKUP).exists());
    }

    #[tokio::test]
    async fn test_missing_instance() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());

        assert!(matches!(
            store.load(9, "dns").await,
            Err(ServiceError::InstanceNotFound(_))
        ));
        assert!(matches!(
            store
                .save_status(&ServiceKey::new(9, "dns"), &ServiceStatus::default())
                .await,
            Err(ServiceError::InstanceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_held_lock_is_respected() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());

        let lock = LockInfo {
            holder: "other-host:42".to_string(),
            acquired_at: Utc::now(),
        };
        std::fs::write(
            temp_dir.path().join(LOCK_FILE),
            serde_json::to_string(&lock).unwrap(),
        )
        .unwrap();

        let instance = ServiceInstance::new(1, ServiceSpec::new("logging", "1.0"));
        assert!(matches!(
            store.save(&instance).await,
            Err(ServiceError::LockError(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        let instance = ServiceInstance::new(3, ServiceSpec::new("ingress", "0.9"));
        store.save(&instance).await.unwrap();

        let mut status = ServiceStatus::default();
        status.installed_version = Some("0.9".to_string());
        store.save_status(&instance.key(), &status).await.unwrap();

        let loaded = store.load(3, "ingress").await.unwrap();
        assert_eq!(loaded.status.installed_version.as_deref(), Some("0.9"));
    }

    #[tokio::test]
    async fn test_save_spec_keeps_status() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());

        let instance = ServiceInstance::new(1, ServiceSpec::new("logging", "1.0"));
        store.save(&instance).await.unwrap();

        let mut status = ServiceStatus::default();
        status.phase = Some(Phase::Installed);
        status.installed_version = Some("1.0".to_string());
        store.save_status(&instance.key(), &status).await.unwrap();

        store
            .save_spec(&instance.key(), &ServiceSpec::new("logging", "1.1"), 2)
            .await
            .unwrap();

        let loaded = store.load(1, "logging").await.unwrap();
        assert_eq!(loaded.status, status);
        assert_eq!(loaded.generation, 2);
        assert!(matches!(
            store
                .save_spec(&ServiceKey::new(1, "dns"), &ServiceSpec::new("dns", "1.0"), 1)
                .await,
            Err(ServiceError::InstanceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_writes_leave_only_store_and_backup() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());

        let instance = ServiceInstance::new(1, ServiceSpec::new("logging", "1.0"));
        store.save(&instance).await.unwrap();
        store
            .save_status(&instance.key(), &ServiceStatus::default())
            .await
            .unwrap();

        let mut names: Vec<String> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![STORE_FILE, STORE_BACKUP]);
    }

    #[tokio::test]
    async fn test_missing_store_file_reads_backup() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());

        let instance = ServiceInstance::new(1, ServiceSpec::new("logging", "1.0"));
        store.save(&instance).await.unwrap();
        store
            .save_spec(&instance.key(), &ServiceSpec::new("logging", "1.1"), 2)
            .await
            .unwrap();

        // Crash between writes: only the previous document survives
        std::fs::remove_file(temp_dir.path().join(STORE_FILE)).unwrap();

        let loaded = store.load(1, "logging").await.unwrap();
        assert_eq!(loaded, instance);
    }

    #[tokio::test]
    async fn test_corrupt_store_file_reads_backup() {
        let temp_dir = tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());

        let instance = ServiceInstance::new(1, ServiceSpec::new("logging", "1.0"));
        store.save(&instance).await.unwrap();
        store
            .save_spec(&instance.key(), &ServiceSpec::new("logging", "1.1"), 2)
            .await
            .unwrap();
        std::fs::write(temp_dir.path().join(STORE_FILE), "{\"version\": 1, \"upd").unwrap();

        assert_eq!(store.load(1, "logging").await.unwrap(), instance);

        // Without a backup the corruption is reported
        std::fs::remove_file(temp_dir.path().join(STORE_BACKUP)).unwrap();
        assert!(matches!(
            store.load(1, "logging").await,
            Err(ServiceError::Json(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_see_a_missing_instance_during_writes() {
        let temp_dir = tempdir().unwrap();
        let store = Arc::new(FileStore::new(temp_dir.path()));

        let instance = ServiceInstance::new(1, ServiceSpec::new("logging", "1.0"));
        store.save(&instance).await.unwrap();

        let writer = {
            let store = store.clone();
            let key = instance.key();
            tokio::spawn(async move {
                for attempt in 0..50u32 {
                    let mut status = ServiceStatus::default();
                    status.failure_count = attempt;
                    store.save_status(&key, &status).await.unwrap();
                }
            })
        };

        while !writer.is_finished() {
            store.load(1, "logging").await.unwrap();
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        assert_eq!(store.load(1, "logging").await.unwrap().status.failure_count, 49);
    }
}
