//! Sync executor
//!
//! Applies a [`DiffPlan`] against the object store: uploads first, then
//! deletes, so a renamed file never has a window where neither key exists.
//!
//! Operations are dispatched on a `JoinSet` bounded by a semaphore. Each
//! one is retried on its own with the injected [`RetryPolicy`]; a failure
//! does not stop the others. The resulting [`SyncReport`] says exactly which
//! keys were applied, and [`SyncReport::next_applied_hashes`] derives the
//! hashes to persist from it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::config::SyncSettings;
use crate::diff::DiffPlan;
use crate::error::{Error, PartialFailure, Result};
use crate::fingerprint::{Digest, LocalTree};
use crate::retry::{RetryPolicy, with_backoff};
use crate::traits::{ObjectStore, ObjectUpload};

/// Outcome of applying one plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Uploaded keys with the digest written
    pub uploaded: BTreeMap<String, Digest>,
    /// Deleted keys (including keys that were already gone)
    pub deleted: BTreeSet<String>,
    /// Failed keys with the error message
    pub failed: BTreeMap<String, String>,
}

impl SyncReport {
    /// Whether every operation succeeded
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of write operations that reached the store successfully
    pub fn applied_count(&self) -> usize {
        self.uploaded.len() + self.deleted.len()
    }

    /// Hashes to record after this sync
    ///
    /// Every local key maps to its local digest, except keys whose upload
    /// failed: those keep their previous record (or stay absent), so the next
    /// diff retries them. Keys whose delete failed keep their record too.
    pub fn next_applied_hashes(
        &self,
        local: &LocalTree,
        previous: &BTreeMap<String, Digest>,
    ) -> BTreeMap<String, Digest> {
        let mut next = BTreeMap::new();

        for (key, entry) in local {
            if self.failed.contains_key(key) {
                if let Some(old) = previous.get(key) {
                    next.insert(key.clone(), *old);
                }
            } else {
                next.insert(key.clone(), entry.content_hash);
            }
        }

        for key in self.failed.keys().filter(|key| !local.contains_key(*key)) {
            if let Some(old) = previous.get(key) {
                next.insert(key.clone(), *old);
            }
        }

        next
    }

    /// Convert into a partial-failure error
    pub fn into_partial_failure(self) -> PartialFailure {
        let mut succeeded: Vec<String> = self.uploaded.into_keys().collect();
        succeeded.extend(self.deleted);
        PartialFailure {
            succeeded,
            failed: self.failed,
            state: None,
        }
    }
}

/// Applies plans against one object store
pub struct SyncExecutor {
    store: Arc<dyn ObjectStore>,
    settings: SyncSettings,
    retry: RetryPolicy,
}

impl SyncExecutor {
    /// Create an executor
    pub fn new(store: Arc<dyn ObjectStore>, settings: SyncSettings, retry: RetryPolicy) -> Self {
        Self {
            store,
            settings,
            retry,
        }
    }

    /// Apply `plan` to `container`
    ///
    /// Never fails as a whole: per-key failures are collected in the report.
    pub async fn apply(&self, container: &str, plan: &DiffPlan) -> SyncReport {
        let mut report = SyncReport::default();
        if plan.is_empty() {
            debug!("Nothing to sync for {}", container);
            return report;
        }

        info!(
            "Syncing {}: {} upload(s), {} delete(s)",
            container,
            plan.to_upload.len(),
            plan.to_delete.len()
        );

        let uploads = plan
            .to_upload
            .iter()
            .map(|entry| ObjectUpload {
                key: entry.relative_key.clone(),
                source_path: entry.source_path.clone(),
                content_type: entry.content_type.clone(),
                cache_control: self
                    .settings
                    .cache_control
                    .for_key(&entry.relative_key, &entry.content_type)
                    .to_string(),
                content_hash: entry.content_hash,
            })
            .collect();
        self.run_uploads(container, uploads, &mut report).await;

        // Only after every upload has settled
        self.run_deletes(container, &plan.to_delete, &mut report).await;

        if report.is_success() {
            info!("Synced {}: {} operation(s)", container, report.applied_count());
        } else {
            error!(
                "Sync of {} finished with {} failure(s)",
                container,
                report.failed.len()
            );
        }
        report
    }

    async fn run_uploads(
        &self,
        container: &str,
        uploads: Vec<ObjectUpload>,
        report: &mut SyncReport,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.settings.upload_concurrency.max(1)));
        let mut pending: BTreeSet<String> = BTreeSet::new();
        let mut join_set: JoinSet<(String, Digest, Result<()>)> = JoinSet::new();

        for upload in uploads {
            pending.insert(upload.key.clone());
            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&semaphore);
            let retry = self.retry.clone();
            let container = container.to_string();

            join_set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        let name = format!("upload {}", upload.key);
                        with_backoff(&retry, &name, || store.put_object(&container, &upload)).await
                    }
                    Err(_) => Err(Error::Other("upload semaphore closed".to_string())),
                };
                (upload.key, upload.content_hash, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((key, digest, Ok(()))) => {
                    debug!("Uploaded {}", key);
                    pending.remove(&key);
                    report.uploaded.insert(key, digest);
                }
                Ok((key, _, Err(e))) => {
                    error!("Upload of {} failed: {}", key, e);
                    pending.remove(&key);
                    report.failed.insert(key, e.to_string());
                }
                Err(e) => error!("Upload task aborted: {}", e),
            }
        }

        // Tasks that panicked never reported their key
        for key in pending {
            report
                .failed
                .insert(key, "upload task aborted".to_string());
        }
    }

    async fn run_deletes(&self, container: &str, keys: &BTreeSet<String>, report: &mut SyncReport) {
        let semaphore = Arc::new(Semaphore::new(self.settings.upload_concurrency.max(1)));
        let mut pending: BTreeSet<String> = BTreeSet::new();
        let mut join_set: JoinSet<(String, Result<()>)> = JoinSet::new();

        for key in keys {
            pending.insert(key.clone());
            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&semaphore);
            let retry = self.retry.clone();
            let container = container.to_string();
            let key = key.clone();

            join_set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        let name = format!("delete {}", key);
                        match with_backoff(&retry, &name, || store.delete_object(&container, &key))
                            .await
                        {
                            Err(e) if e.is_not_found() => Ok(()),
                            other => other,
                        }
                    }
                    Err(_) => Err(Error::Other("delete semaphore closed".to_string())),
                };
                (key, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((key, Ok(()))) => {
                    debug!("Deleted {}", key);
                    pending.remove(&key);
                    report.deleted.insert(key);
                }
                Ok((key, Err(e))) => {
                    error!("Delete of {} failed: {}", key, e);
                    pending.remove(&key);
                    report.failed.insert(key, e.to_string());
                }
                Err(e) => error!("Delete task aborted: {}", e),
            }
        }

        for key in pending {
            report
                .failed
                .insert(key, "delete task aborted".to_string());
        }
    }
}
