// # Site State
//
// The record bridging reconciliations, and the stores that persist it.
//
// `SiteState` is threaded explicitly through every lifecycle call: the host
// hands in the previous value and persists the returned one. Nothing in the
// engine keeps it in a global.

pub mod file;
pub mod memory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::DesiredSite;
use crate::fingerprint::{Digest, LocalTree};

/// Persisted state of one static website resource
///
/// Invariant: after a successful apply, `last_applied_file_hashes` equals
/// the digests of the remote object set. After a partial failure it holds
/// exactly the subset that was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteState {
    /// Storage container id
    pub bucket_id: String,
    /// Distribution id
    pub distribution_id: String,
    /// Host name the distribution serves on
    pub distribution_domain: String,
    /// Key → digest of every object this provider last wrote
    pub last_applied_file_hashes: BTreeMap<String, Digest>,
    /// Public URL of the site
    pub site_url: String,
    /// Inputs the state was applied from
    pub inputs: DesiredSite,
    /// Timestamp of the last apply
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

impl SiteState {
    /// Whether the local tree matches what was last applied, key for key
    pub fn content_matches(&self, local: &LocalTree) -> bool {
        self.last_applied_file_hashes.len() == local.len()
            && local.iter().all(|(key, entry)| {
                self.last_applied_file_hashes.get(key) == Some(&entry.content_hash)
            })
    }

    /// Check if the state is older than the given duration
    pub fn is_stale(&self, max_age: chrono::Duration) -> bool {
        chrono::Utc::now().signed_duration_since(self.last_updated) > max_age
    }
}
