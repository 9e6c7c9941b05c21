//! Resource lifecycle adapter
//!
//! [`StaticSiteProvider`] implements the five operations a declarative
//! infrastructure host drives: `create`, `diff`, `update`, `delete` and
//! `read`. It composes the other components:
//!
//! ```text
//!            ┌──────────────────────┐
//!  host ───▶ │  StaticSiteProvider  │ ───▶ host (outputs, SiteState)
//!            └──────────────────────┘
//!                 │            │
//!      ┌──────────┴──┐    ┌────┴──────────┐
//!      ▼             ▼    ▼               ▼
//! fingerprint   snapshot  diff ──▶ sync ──▶ distribution
//! ```
//!
//! ## State machine
//!
//! `Absent → Creating → Ready → Updating → Ready → Deleting → Absent`, with
//! `Failed` reachable from `Creating`, `Updating` and `Deleting`. A failed
//! resource may be created, updated or deleted again: convergence is forward
//! only, nothing is rolled back.
//!
//! ## Persistence
//!
//! The provider never persists anything. Every call takes the previous
//! [`SiteState`] and returns the next one; a [`crate::Error::SyncPartialFailure`]
//! carries the state of the subset that was applied. A create that fails once
//! its container exists returns [`crate::Error::Incomplete`] with a state whose
//! distribution id is empty, and a later `update` finishes the setup.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{DesiredSite, PruneScope, ProviderSettings};
use crate::diff::{DiffPlan, compute_plan};
use crate::distribution::{
    DistributionManager, InvalidationOutcome, distribution_spec, resolve_site_url,
};
use crate::error::{Error, PartialFailure, Result};
use crate::fingerprint::{Digest, LocalTree, fingerprint_directory};
use crate::retry::with_backoff;
use crate::snapshot::{RemoteSnapshot, fetch_snapshot};
use crate::state::SiteState;
use crate::sync::{SyncExecutor, SyncReport};
use crate::traits::{ContentDelivery, DistributionInfo, ObjectStore};

/// Lifecycle status of one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Nothing provisioned
    Absent,
    /// Create in progress
    Creating,
    /// Provisioned and in sync as of the last call
    Ready,
    /// Update in progress
    Updating,
    /// Delete in progress
    Deleting,
    /// Last lifecycle call failed
    Failed,
}

impl ResourceStatus {
    /// Whether the state machine allows `self → next`
    pub fn can_transition_to(self, next: ResourceStatus) -> bool {
        use ResourceStatus::*;
        matches!(
            (self, next),
            (Absent, Creating)
                | (Creating, Ready)
                | (Creating, Failed)
                | (Ready, Updating)
                | (Ready, Deleting)
                | (Updating, Ready)
                | (Updating, Failed)
                | (Deleting, Absent)
                | (Deleting, Failed)
                | (Failed, Creating)
                | (Failed, Updating)
                | (Failed, Deleting)
        )
    }

    /// Validated transition
    pub fn transition(self, next: ResourceStatus) -> Result<ResourceStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceStatus::Absent => "absent",
            ResourceStatus::Creating => "creating",
            ResourceStatus::Ready => "ready",
            ResourceStatus::Updating => "updating",
            ResourceStatus::Deleting => "deleting",
            ResourceStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Events emitted by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// Resource changed status
    StatusChanged {
        id: String,
        from: ResourceStatus,
        to: ResourceStatus,
    },

    /// Diff plan computed, before any write
    PlanComputed {
        id: String,
        uploads: usize,
        deletes: usize,
        content_changed: bool,
    },

    /// Object written
    ObjectUploaded { id: String, key: String },

    /// Object removed
    ObjectDeleted { id: String, key: String },

    /// Object operation failed after retries
    ObjectFailed {
        id: String,
        key: String,
        error: String,
    },

    /// Cache invalidation accepted
    InvalidationIssued { id: String, invalidation_id: String },

    /// Content unchanged, no invalidation
    InvalidationSkipped { id: String },

    /// Cache invalidation failed
    InvalidationFailed { id: String, error: String },
}

/// Outputs returned to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteOutputs {
    /// Publicly reachable site URL
    pub url: String,
    /// Storage container id
    pub bucket: String,
    /// Non-fatal problems of the last apply
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Answer of [`StaticSiteProvider::diff`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResult {
    /// Whether an update is needed
    pub changes: bool,
    /// Whether the resource must be replaced instead of updated
    pub replace: bool,
    /// Input fields that differ, plus `content` when local files changed
    pub changed_fields: Vec<String>,
}

/// Static website resource provider
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use sitesync_core::backend::{MemoryContentDelivery, MemoryObjectStore};
/// use sitesync_core::{DesiredSite, ProviderSettings, StaticSiteProvider};
///
/// # async fn example() -> sitesync_core::Result<()> {
/// let (provider, _events) = StaticSiteProvider::new(
///     Arc::new(MemoryObjectStore::new()),
///     Arc::new(MemoryContentDelivery::new()),
///     ProviderSettings::default(),
/// )?;
///
/// let (id, outputs, state) = provider.create(DesiredSite::new("./www")).await?;
/// println!("{} is live at {}", id, outputs.url);
/// # let _ = state;
/// # Ok(())
/// # }
/// ```
pub struct StaticSiteProvider {
    store: Arc<dyn ObjectStore>,
    sync: SyncExecutor,
    distributions: DistributionManager,
    settings: ProviderSettings,
    statuses: Mutex<HashMap<String, ResourceStatus>>,
    event_tx: mpsc::Sender<ProviderEvent>,
}

impl StaticSiteProvider {
    /// Create a provider
    ///
    /// # Returns
    ///
    /// A tuple of (provider, event_receiver) where event_receiver yields provider events
    pub fn new(
        store: Arc<dyn ObjectStore>,
        cdn: Arc<dyn ContentDelivery>,
        settings: ProviderSettings,
    ) -> Result<(Self, mpsc::Receiver<ProviderEvent>)> {
        settings.validate()?;

        let (tx, rx) = mpsc::channel(settings.event_channel_capacity);

        let provider = Self {
            sync: SyncExecutor::new(
                Arc::clone(&store),
                settings.sync.clone(),
                settings.retry.clone(),
            ),
            distributions: DistributionManager::new(cdn, settings.retry.clone()),
            store,
            settings,
            statuses: Mutex::new(HashMap::new()),
            event_tx: tx,
        };

        Ok((provider, rx))
    }

    /// Last known status of a resource
    ///
    /// Only resources touched by this provider instance are known; any
    /// other id reports `Absent`.
    pub fn status(&self, id: &str) -> ResourceStatus {
        self.lock_statuses()
            .get(id)
            .copied()
            .unwrap_or(ResourceStatus::Absent)
    }

    /// Provision container and distribution, then upload every file
    pub async fn create(&self, desired: DesiredSite) -> Result<(String, SiteOutputs, SiteState)> {
        desired.validate()?;

        let bucket = match desired.bucket_name {
            Some(ref name) => name.clone(),
            None => generate_bucket_name(&self.settings.bucket_prefix),
        };

        self.transition(&bucket, ResourceStatus::Absent, ResourceStatus::Creating)?;
        info!("Creating static website {}", bucket);

        match self.apply_create(&bucket, desired).await {
            Ok((outputs, state)) => {
                self.transition(&bucket, ResourceStatus::Creating, ResourceStatus::Ready)?;
                info!("Created static website {} at {}", bucket, outputs.url);
                Ok((bucket, outputs, state))
            }
            Err(e) => {
                self.fail(&bucket, ResourceStatus::Creating, &e);
                Err(e)
            }
        }
    }

    /// Whether `news` differs from what `olds` was applied from
    ///
    /// Reads local files, never the backends.
    pub async fn diff(&self, id: &str, olds: &SiteState, news: &DesiredSite) -> Result<DiffResult> {
        news.validate()?;

        let previous = &olds.inputs;
        let mut changed_fields = Vec::new();
        if previous.static_directory != news.static_directory {
            changed_fields.push("staticDirectory".to_string());
        }
        if previous.index_document != news.index_document {
            changed_fields.push("indexDocument".to_string());
        }
        if previous.error_document != news.error_document {
            changed_fields.push("errorDocument".to_string());
        }
        if previous.custom_domain != news.custom_domain {
            changed_fields.push("customDomain".to_string());
        }
        if previous.bucket_name != news.bucket_name {
            changed_fields.push("bucketName".to_string());
        }
        if previous.included_files != news.included_files {
            changed_fields.push("includedFiles".to_string());
        }

        let local = fingerprint(news).await?;
        if !olds.content_matches(&local) {
            changed_fields.push("content".to_string());
        }
        if olds.distribution_id.is_empty() {
            changed_fields.push("distribution".to_string());
        }

        let replace = matches!(news.bucket_name, Some(ref name) if *name != olds.bucket_id);
        let result = DiffResult {
            changes: !changed_fields.is_empty(),
            replace,
            changed_fields,
        };

        debug!(
            "Diff of {}: changes={}, replace={}, fields={:?}",
            id, result.changes, result.replace, result.changed_fields
        );
        Ok(result)
    }

    /// Sync an existing site to `news`
    pub async fn update(
        &self,
        id: &str,
        olds: &SiteState,
        news: DesiredSite,
    ) -> Result<(SiteOutputs, SiteState)> {
        news.validate()?;
        if let Some(ref name) = news.bucket_name
            && *name != olds.bucket_id
        {
            return Err(Error::config(format!(
                "bucketName changed from {} to {}; the resource must be replaced",
                olds.bucket_id, name
            )));
        }

        let from = self.current_or_ready(id);
        self.transition(id, from, ResourceStatus::Updating)?;
        info!("Updating static website {}", id);

        match self.apply_update(id, olds, news).await {
            Ok((outputs, state)) => {
                self.transition(id, ResourceStatus::Updating, ResourceStatus::Ready)?;
                info!("Updated static website {}", id);
                Ok((outputs, state))
            }
            Err(e) => {
                self.fail(id, ResourceStatus::Updating, &e);
                Err(e)
            }
        }
    }

    /// Empty and remove the container, then the distribution
    pub async fn delete(&self, id: &str, olds: &SiteState) -> Result<()> {
        let from = self.current_or_ready(id);
        self.transition(id, from, ResourceStatus::Deleting)?;
        info!("Deleting static website {}", id);

        match self.apply_delete(id, olds).await {
            Ok(()) => {
                self.transition(id, ResourceStatus::Deleting, ResourceStatus::Absent)?;
                info!("Deleted static website {}", id);
                Ok(())
            }
            Err(e) => {
                self.fail(id, ResourceStatus::Deleting, &e);
                Err(e)
            }
        }
    }

    /// Outputs derived from the persisted state alone
    pub fn read(&self, id: &str, state: &SiteState) -> SiteOutputs {
        debug!("Reading outputs of {}", id);
        SiteOutputs {
            url: resolve_site_url(
                state.inputs.custom_domain.as_deref(),
                Some(state.distribution_domain.as_str()),
                &self.store.website_endpoint(&state.bucket_id),
            ),
            bucket: state.bucket_id.clone(),
            warnings: Vec::new(),
        }
    }

    async fn apply_create(&self, bucket: &str, desired: DesiredSite) -> Result<(SiteOutputs, SiteState)> {
        let local = fingerprint(&desired).await?;

        with_backoff(&self.settings.retry, "create container", || {
            self.store.create_container(bucket)
        })
        .await?;

        // From here on the container exists and every failure must record it
        let previous = BTreeMap::new();
        let website = desired.website_settings();
        if let Err(e) = with_backoff(&self.settings.retry, "configure website", || {
            self.store.configure_website(bucket, &website)
        })
        .await
        {
            return Err(self.incomplete(bucket, &desired, previous, e));
        }

        let remote = match fetch_snapshot(self.store.as_ref(), bucket, &self.settings.retry).await {
            Ok(remote) => remote,
            Err(e) => return Err(self.incomplete(bucket, &desired, previous, e)),
        };

        // A declared container may already hold objects this resource never wrote
        let prune = if desired.bucket_name.is_some() {
            PruneScope::Tracked
        } else {
            self.settings.sync.prune
        };
        let plan = self.plan(bucket, &local, &remote, &previous, prune);
        let report = self.sync_and_report(bucket, bucket, &plan).await;

        let endpoint = self.store.website_endpoint(bucket);
        let spec = distribution_spec(&desired, bucket, &endpoint);
        let distribution = match self.distributions.create(&spec).await {
            Ok(distribution) => distribution,
            Err(e) => {
                let applied = report.next_applied_hashes(&local, &previous);
                return Err(self.incomplete(bucket, &desired, applied, e));
            }
        };

        self.finish(bucket, bucket, desired, &local, &previous, &plan, report, distribution)
            .await
    }

    /// State of a create that stopped after its container was made
    ///
    /// The distribution id stays empty; `diff` reports it and `update`
    /// finishes the setup.
    fn incomplete(
        &self,
        bucket: &str,
        desired: &DesiredSite,
        applied: BTreeMap<String, Digest>,
        source: Error,
    ) -> Error {
        warn!("Create of {} stopped after its container was made", bucket);
        let state = SiteState {
            bucket_id: bucket.to_string(),
            distribution_id: String::new(),
            distribution_domain: String::new(),
            last_applied_file_hashes: applied,
            site_url: self.store.website_endpoint(bucket),
            inputs: desired.clone(),
            last_updated: chrono::Utc::now(),
        };
        Error::incomplete(state, source)
    }

    async fn apply_update(
        &self,
        id: &str,
        olds: &SiteState,
        news: DesiredSite,
    ) -> Result<(SiteOutputs, SiteState)> {
        let bucket = olds.bucket_id.as_str();
        let local = fingerprint(&news).await?;

        let website = news.website_settings();
        let unfinished = olds.distribution_id.is_empty();
        if unfinished || olds.inputs.website_settings() != website {
            with_backoff(&self.settings.retry, "configure website", || {
                self.store.configure_website(bucket, &website)
            })
            .await?;
        }

        let remote = fetch_snapshot(self.store.as_ref(), bucket, &self.settings.retry).await?;
        let plan = self.plan(
            id,
            &local,
            &remote,
            &olds.last_applied_file_hashes,
            self.settings.sync.prune,
        );
        let report = self.sync_and_report(id, bucket, &plan).await;

        let endpoint = self.store.website_endpoint(bucket);
        let desired = distribution_spec(&news, bucket, &endpoint);
        let distribution = if unfinished {
            match self.distributions.create(&desired).await {
                Ok(distribution) => distribution,
                Err(e) => {
                    let applied = report.next_applied_hashes(&local, &olds.last_applied_file_hashes);
                    return Err(self.incomplete(bucket, &news, applied, e));
                }
            }
        } else {
            let current = DistributionInfo {
                id: olds.distribution_id.clone(),
                domain_name: olds.distribution_domain.clone(),
            };
            self.distributions
                .reconcile(
                    current,
                    &distribution_spec(&olds.inputs, bucket, &endpoint),
                    &desired,
                )
                .await?
                .0
        };

        self.finish(
            id,
            bucket,
            news,
            &local,
            &olds.last_applied_file_hashes,
            &plan,
            report,
            distribution,
        )
        .await
    }

    async fn apply_delete(&self, id: &str, olds: &SiteState) -> Result<()> {
        let bucket = olds.bucket_id.as_str();

        let remote = match fetch_snapshot(self.store.as_ref(), bucket, &self.settings.retry).await {
            Ok(remote) => Some(remote),
            Err(e) if e.is_not_found() => {
                debug!("Container {} already gone", bucket);
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(remote) = remote {
            // A non-empty container cannot be removed, so every key goes
            let plan = DiffPlan {
                to_upload: Vec::new(),
                to_delete: remote.into_keys().collect(),
                content_changed: false,
            };
            let report = self.sync_and_report(id, bucket, &plan).await;
            if !report.is_success() {
                let remaining = report.next_applied_hashes(&LocalTree::new(), &olds.last_applied_file_hashes);
                let mut failure = report.into_partial_failure();
                failure.state = Some(SiteState {
                    last_applied_file_hashes: remaining,
                    last_updated: chrono::Utc::now(),
                    ..olds.clone()
                });
                return Err(Error::SyncPartialFailure(Box::new(failure)));
            }

            match with_backoff(&self.settings.retry, "delete container", || {
                self.store.delete_container(bucket)
            })
            .await
            {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        if !olds.distribution_id.is_empty() {
            self.distributions.delete(&olds.distribution_id).await?;
        }

        Ok(())
    }

    fn plan(
        &self,
        id: &str,
        local: &LocalTree,
        remote: &RemoteSnapshot,
        last_applied: &BTreeMap<String, Digest>,
        prune: PruneScope,
    ) -> DiffPlan {
        let mut plan = compute_plan(local, remote, last_applied);
        if prune == PruneScope::Tracked {
            plan = plan.restrict_to_tracked(last_applied);
        }

        debug!(
            "Plan for {}: upload {:?}, delete {:?}",
            id,
            plan.upload_keys(),
            plan.to_delete
        );
        self.emit_event(ProviderEvent::PlanComputed {
            id: id.to_string(),
            uploads: plan.to_upload.len(),
            deletes: plan.to_delete.len(),
            content_changed: plan.content_changed,
        });
        plan
    }

    async fn sync_and_report(&self, id: &str, container: &str, plan: &DiffPlan) -> SyncReport {
        let report = self.sync.apply(container, plan).await;

        for key in report.uploaded.keys() {
            self.emit_event(ProviderEvent::ObjectUploaded {
                id: id.to_string(),
                key: key.clone(),
            });
        }
        for key in &report.deleted {
            self.emit_event(ProviderEvent::ObjectDeleted {
                id: id.to_string(),
                key: key.clone(),
            });
        }
        for (key, error) in &report.failed {
            self.emit_event(ProviderEvent::ObjectFailed {
                id: id.to_string(),
                key: key.clone(),
                error: error.clone(),
            });
        }
        report
    }

    /// Invalidate, build outputs and the next state
    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        id: &str,
        bucket: &str,
        inputs: DesiredSite,
        local: &LocalTree,
        previous: &BTreeMap<String, Digest>,
        plan: &DiffPlan,
        report: SyncReport,
        distribution: DistributionInfo,
    ) -> Result<(SiteOutputs, SiteState)> {
        // Invalidate whatever reached the container, even on partial failure
        let changed = plan.content_changed && report.applied_count() > 0;
        let outcome = self.distributions.invalidate(&distribution.id, changed).await;
        match outcome {
            InvalidationOutcome::Skipped => self.emit_event(ProviderEvent::InvalidationSkipped {
                id: id.to_string(),
            }),
            InvalidationOutcome::Issued(ref invalidation_id) => {
                self.emit_event(ProviderEvent::InvalidationIssued {
                    id: id.to_string(),
                    invalidation_id: invalidation_id.clone(),
                })
            }
            InvalidationOutcome::Failed(ref error) => {
                self.emit_event(ProviderEvent::InvalidationFailed {
                    id: id.to_string(),
                    error: error.clone(),
                })
            }
        }

        let site_url = resolve_site_url(
            inputs.custom_domain.as_deref(),
            Some(distribution.domain_name.as_str()),
            &self.store.website_endpoint(bucket),
        );

        let state = SiteState {
            bucket_id: bucket.to_string(),
            distribution_id: distribution.id,
            distribution_domain: distribution.domain_name,
            last_applied_file_hashes: report.next_applied_hashes(local, previous),
            site_url: site_url.clone(),
            inputs,
            last_updated: chrono::Utc::now(),
        };

        if !report.is_success() {
            let mut failure: PartialFailure = report.into_partial_failure();
            failure.state = Some(state);
            return Err(Error::SyncPartialFailure(Box::new(failure)));
        }

        let outputs = SiteOutputs {
            url: site_url,
            bucket: bucket.to_string(),
            warnings: outcome.warning().into_iter().collect(),
        };
        Ok((outputs, state))
    }

    fn current_or_ready(&self, id: &str) -> ResourceStatus {
        // A state handed in by the host means the resource exists
        self.lock_statuses()
            .get(id)
            .copied()
            .unwrap_or(ResourceStatus::Ready)
    }

    fn transition(&self, id: &str, from: ResourceStatus, to: ResourceStatus) -> Result<()> {
        let mut statuses = self.lock_statuses();
        let current = statuses.get(id).copied().unwrap_or(from);
        let next = current.transition(to)?;
        statuses.insert(id.to_string(), next);
        drop(statuses);

        self.emit_event(ProviderEvent::StatusChanged {
            id: id.to_string(),
            from: current,
            to: next,
        });
        Ok(())
    }

    fn fail(&self, id: &str, from: ResourceStatus, err: &Error) {
        error!("Lifecycle call on {} failed: {}", id, err);
        if let Err(e) = self.transition(id, from, ResourceStatus::Failed) {
            warn!("Could not mark {} as failed: {}", id, e);
        }
    }

    fn lock_statuses(&self) -> std::sync::MutexGuard<'_, HashMap<String, ResourceStatus>> {
        self.statuses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Emit a provider event
    fn emit_event(&self, event: ProviderEvent) {
        // Full channel: drop the event rather than block the reconciliation
        if self.event_tx.try_send(event).is_err() {
            warn!(
                "Event channel full, dropping event. Consider increasing event_channel_capacity."
            );
        }
    }
}

fn generate_bucket_name(prefix: &str) -> String {
    format!("{}-{:08x}", prefix, rand::random::<u32>())
}

/// Fingerprint the declared directory off the async runtime
async fn fingerprint(site: &DesiredSite) -> Result<LocalTree> {
    let root: PathBuf = site.static_directory.clone();
    let patterns = site.included_files.clone();

    tokio::task::spawn_blocking(move || fingerprint_directory(&root, &patterns))
        .await
        .map_err(|e| Error::Other(format!("Fingerprint task failed: {}", e)))?
}
