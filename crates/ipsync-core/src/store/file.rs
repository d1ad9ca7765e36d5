// # File IP Set Store
//
// JSON-file implementation of IpSetStore for local runs.
//
// ## Crash Recovery
//
// - Atomic writes: write-then-rename
// - Automatic backup: `.backup` keeps the previous good file
// - Recovery: a corrupted file falls back to the backup
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "ip_set": { "name": "allow", "scope": "regional", "family": "v4" },
//   "updated_at": "2025-01-09T12:00:00Z",
//   "description": "IP Address ranges for service CLOUDFRONT as of ..., syncToken=1700000000",
//   "addresses": ["13.32.0.0/15", "3.172.0.0/18"]
// }
// ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::LocalIpSet;
use crate::Error;
use crate::config::{StoreConfig, SyncConfig};
use crate::model::{IpRange, IpSetLimits, IpSetRef, IpSetState, SyncStamp};
use crate::reconciler::MutationKind;
use crate::traits::{IpSetStore, IpSetStoreFactory, MutationOutcome};

const FILE_VERSION: &str = "1.0";

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct IpSetFile {
    version: String,
    ip_set: IpSetRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(flatten)]
    set: LocalIpSet,
}

/// IP set persisted as a JSON file
///
/// Every mutation is written through before it returns. The file is the
/// only copy: `read` always goes back to disk so that edits made by other
/// processes are observed.
#[derive(Debug)]
pub struct FileIpSetStore {
    path: PathBuf,
    target: IpSetRef,
    limits: IpSetLimits,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileIpSetStore {
    /// Open (or prepare to create) the file at `path`
    pub async fn new<P: AsRef<Path>>(
        path: P,
        target: IpSetRef,
        limits: IpSetLimits,
    ) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create store directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let store = Self {
            path,
            target,
            limits,
            write_lock: Mutex::new(()),
        };

        let set = store.load_with_recovery().await?;
        tracing::debug!(
            "Opened IP set file {}: {} ranges",
            store.path.display(),
            set.addresses.len()
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the set, falling back to the backup on corruption
    async fn load_with_recovery(&self) -> Result<LocalIpSet, Error> {
        match Self::load(&self.path, &self.target).await {
            Ok(set) => Ok(set),
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "IP set file {} appears corrupted: {}. Attempting recovery from backup.",
                    self.path.display(),
                    e
                );

                let backup_path = Self::backup_path(&self.path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with an empty set.");
                    return Ok(LocalIpSet::default());
                }

                match Self::load(&backup_path, &self.target).await {
                    Ok(set) => {
                        tracing::info!("Recovered IP set from backup: {} ranges", set.addresses.len());
                        if let Err(e) = fs::copy(&backup_path, &self.path).await {
                            tracing::error!("Failed to restore IP set file from backup: {}", e);
                        }
                        Ok(set)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also corrupted: {}. Starting with an empty set.",
                            backup_err
                        );
                        Ok(LocalIpSet::default())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn load(path: &Path, target: &IpSetRef) -> Result<LocalIpSet, Error> {
        if !path.exists() {
            return Ok(LocalIpSet::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::store(format!("Failed to read IP set file {}: {}", path.display(), e))
        })?;
        let file: IpSetFile = serde_json::from_str(&content)?;

        if file.version != FILE_VERSION {
            tracing::warn!(
                "IP set file version mismatch: expected {}, got {}. Attempting to load anyway.",
                FILE_VERSION,
                file.version
            );
        }
        if file.ip_set.name != target.name {
            return Err(Error::store(format!(
                "IP set file {} holds '{}', expected '{}'",
                path.display(),
                file.ip_set.name,
                target.name
            )));
        }

        Ok(file.set)
    }

    /// Write the set atomically, keeping the previous file as backup
    async fn write(&self, set: &LocalIpSet) -> Result<(), Error> {
        let file = IpSetFile {
            version: FILE_VERSION.to_string(),
            ip_set: self.target.clone(),
            updated_at: Some(chrono::Utc::now()),
            set: set.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let temp_path = self.temp_path();
        {
            let mut f = fs::File::create(&temp_path).await.map_err(|e| {
                Error::store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            f.write_all(json.as_bytes()).await?;
            f.flush().await?;
        }

        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, Self::backup_path(&self.path)).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("IP set written to {}", self.path.display());
        Ok(())
    }

    async fn mutate(
        &self,
        kind: MutationKind,
        ranges: &[IpRange],
        stamp: &SyncStamp,
    ) -> Result<MutationOutcome, Error> {
        let _guard = self.write_lock.lock().await;
        let mut set = self.load_with_recovery().await?;
        let outcome = set.apply(kind, ranges, stamp, self.limits)?;
        self.write(&set).await?;
        Ok(outcome)
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl IpSetStore for FileIpSetStore {
    async fn read(&self) -> Result<IpSetState, Error> {
        Ok(self.load_with_recovery().await?.state())
    }

    async fn add(&self, ranges: &[IpRange], stamp: &SyncStamp) -> Result<MutationOutcome, Error> {
        self.mutate(MutationKind::Add, ranges, stamp).await
    }

    async fn remove(
        &self,
        ranges: &[IpRange],
        stamp: &SyncStamp,
    ) -> Result<MutationOutcome, Error> {
        self.mutate(MutationKind::Remove, ranges, stamp).await
    }

    fn target(&self) -> &IpSetRef {
        &self.target
    }

    fn limits(&self) -> IpSetLimits {
        self.limits
    }

    fn store_name(&self) -> &'static str {
        "file"
    }
}

/// Factory for file-backed stores
pub struct FileIpSetStoreFactory;

#[async_trait]
impl IpSetStoreFactory for FileIpSetStoreFactory {
    async fn create(&self, config: &SyncConfig) -> Result<Box<dyn IpSetStore>, Error> {
        match &config.store {
            StoreConfig::File { path } => Ok(Box::new(
                FileIpSetStore::new(path, config.ip_set.to_ref(), config.ip_set.limits).await?,
            )),
            other => Err(Error::config(format!(
                "File store factory cannot build a '{}' store",
                other.type_name()
            ))),
        }
    }
}
