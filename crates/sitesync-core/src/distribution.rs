//! Distribution manager
//!
//! Create-or-update of the distribution fronting the storage container, and
//! cache invalidation gated on the content-changed flag.
//!
//! Provisioning failures are errors (after retries). Invalidation failures
//! are not: the content is already uploaded, so the manager reports them as
//! a warning the lifecycle adapter attaches to its outputs.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::DesiredSite;
use crate::error::Result;
use crate::retry::{RetryPolicy, with_backoff};
use crate::traits::{ContentDelivery, DistributionInfo, DistributionSpec};

/// Paths invalidated when content changed
pub const INVALIDATE_ALL: &str = "/*";

/// What happened to the cache after a sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationOutcome {
    /// Content unchanged, nothing issued
    Skipped,
    /// Invalidation accepted, with its id
    Issued(String),
    /// Invalidation failed after retries
    Failed(String),
}

impl InvalidationOutcome {
    /// Warning text to surface, if any
    pub fn warning(&self) -> Option<String> {
        match self {
            InvalidationOutcome::Failed(e) => Some(format!("cache invalidation failed: {}", e)),
            _ => None,
        }
    }
}

/// Build the distribution configuration for a site
///
/// The caller reference is derived from the container so repeated creates
/// for the same site converge on one distribution.
pub fn distribution_spec(site: &DesiredSite, container: &str, website_endpoint: &str) -> DistributionSpec {
    let origin_domain = website_endpoint
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string();

    DistributionSpec {
        caller_reference: format!("sitesync-{}", container),
        origin_domain,
        index_document: site.index_document.clone(),
        error_document: site.error_document.clone(),
        custom_domain: site.custom_domain.clone(),
    }
}

/// Public URL of a site
///
/// The custom domain wins, then the distribution domain, then the raw
/// storage website endpoint.
pub fn resolve_site_url(
    custom_domain: Option<&str>,
    distribution_domain: Option<&str>,
    website_endpoint: &str,
) -> String {
    match (custom_domain, distribution_domain) {
        (Some(domain), _) => format!("https://{}", domain),
        (None, Some(domain)) if !domain.is_empty() => format!("https://{}", domain),
        _ => website_endpoint.to_string(),
    }
}

/// Manages one content delivery backend
pub struct DistributionManager {
    cdn: Arc<dyn ContentDelivery>,
    retry: RetryPolicy,
}

impl DistributionManager {
    /// Create a manager
    pub fn new(cdn: Arc<dyn ContentDelivery>, retry: RetryPolicy) -> Self {
        Self { cdn, retry }
    }

    /// Create a distribution for `spec`
    pub async fn create(&self, spec: &DistributionSpec) -> Result<DistributionInfo> {
        let info = with_backoff(&self.retry, "create distribution", || {
            self.cdn.create_distribution(spec)
        })
        .await?;

        info!("Distribution {} serving {}", info.id, info.domain_name);
        Ok(info)
    }

    /// Bring an existing distribution to `desired`
    ///
    /// Issues no call when `desired` equals `previous`. Returns the
    /// distribution and whether it was updated.
    pub async fn reconcile(
        &self,
        current: DistributionInfo,
        previous: &DistributionSpec,
        desired: &DistributionSpec,
    ) -> Result<(DistributionInfo, bool)> {
        if previous == desired {
            debug!("Distribution {} unchanged", current.id);
            return Ok((current, false));
        }

        let id = current.id.as_str();
        let info = with_backoff(&self.retry, "update distribution", || {
            self.cdn.update_distribution(id, desired)
        })
        .await?;

        info!("Updated distribution {}", info.id);
        Ok((info, true))
    }

    /// Invalidate every cached path when `content_changed` is set
    pub async fn invalidate(&self, id: &str, content_changed: bool) -> InvalidationOutcome {
        if !content_changed {
            debug!("Content unchanged, skipping invalidation of {}", id);
            return InvalidationOutcome::Skipped;
        }

        let paths = vec![INVALIDATE_ALL.to_string()];
        match with_backoff(&self.retry, "create invalidation", || {
            self.cdn.create_invalidation(id, &paths)
        })
        .await
        {
            Ok(invalidation_id) => {
                info!("Invalidation {} issued for {}", invalidation_id, id);
                InvalidationOutcome::Issued(invalidation_id)
            }
            Err(e) => {
                warn!("Invalidation of {} failed: {}", id, e);
                InvalidationOutcome::Failed(e.to_string())
            }
        }
    }

    /// Delete a distribution; an already absent one counts as deleted
    pub async fn delete(&self, id: &str) -> Result<()> {
        match with_backoff(&self.retry, "delete distribution", || {
            self.cdn.delete_distribution(id)
        })
        .await
        {
            Ok(()) => {
                info!("Deleted distribution {}", id);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("Distribution {} already gone", id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
