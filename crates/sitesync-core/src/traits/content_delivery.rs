// # Content Delivery Trait
//
// Defines the interface to the CDN that fronts the storage container.
//
// ## Implementations
//
// - Amazon CloudFront: `sitesync-provider-aws` crate
// - In-memory: `sitesync_core::backend::MemoryContentDelivery`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Desired configuration of a distribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionSpec {
    /// Idempotency token; identical tokens never create two distributions
    pub caller_reference: String,
    /// Host name of the origin (the container's website endpoint, no scheme)
    pub origin_domain: String,
    /// Root object served for `/`
    pub index_document: String,
    /// Page served for 404 responses
    pub error_document: Option<String>,
    /// Alias attached to the distribution
    pub custom_domain: Option<String>,
}

/// Identity of a provisioned distribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionInfo {
    /// Backend distribution id
    pub id: String,
    /// Host name the distribution serves on
    pub domain_name: String,
}

/// Trait for content delivery backends
///
/// Same single-shot contract as [`super::ObjectStore`]: no retries, no
/// sleeping, failures classified for the engine.
#[async_trait]
pub trait ContentDelivery: Send + Sync {
    /// Create a distribution pointing at the origin
    async fn create_distribution(
        &self,
        spec: &DistributionSpec,
    ) -> Result<DistributionInfo, crate::Error>;

    /// Replace the configuration of an existing distribution
    async fn update_distribution(
        &self,
        id: &str,
        spec: &DistributionSpec,
    ) -> Result<DistributionInfo, crate::Error>;

    /// Invalidate cached paths; returns the invalidation id
    async fn create_invalidation(&self, id: &str, paths: &[String])
    -> Result<String, crate::Error>;

    /// Remove a distribution
    async fn delete_distribution(&self, id: &str) -> Result<(), crate::Error>;

    /// Backend name (for logging/errors)
    fn backend_name(&self) -> &'static str;
}
