// # State Store Trait
//
// Defines the interface for persisting `SiteState` between reconciliations.
//
// ## Purpose
//
// The lifecycle adapter never persists anything itself: every call takes the
// previous state as input and returns the new one. A host that drives the
// adapter (the bundled `sitesync` binary, or an embedding application) keeps
// the state in a store keyed by resource name.
//
// ## Implementations
//
// - File-based: versioned JSON with atomic writes and backup recovery
// - In-memory: tests and one-shot runs

use async_trait::async_trait;

use crate::state::SiteState;

/// Trait for state store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
///
/// ## Implementation Guidelines
///
/// - **Async I/O only**: Use async file/database operations, never blocking I/O
/// - **Explicit flush**: `flush()` must persist all pending changes
/// - **No business logic**: the store never decides what to reconcile
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get the state of a resource
    ///
    /// # Returns
    ///
    /// - `Ok(Some(SiteState))`: The stored state
    /// - `Ok(None)`: The resource has never been applied (or was deleted)
    /// - `Err(Error)`: Storage error
    async fn get_state(&self, resource_name: &str) -> Result<Option<SiteState>, crate::Error>;

    /// Create or replace the state of a resource
    async fn set_state(&self, resource_name: &str, state: &SiteState)
    -> Result<(), crate::Error>;

    /// Delete the state of a resource
    ///
    /// Succeeds when no state exists.
    async fn delete_state(&self, resource_name: &str) -> Result<(), crate::Error>;

    /// List all resource names in the store
    async fn list_resources(&self) -> Result<Vec<String>, crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}
