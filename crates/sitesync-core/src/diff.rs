//! Diff engine
//!
//! Compares the local tree against the remote snapshot and the hashes
//! recorded by the previous apply, and produces the [`DiffPlan`] the sync
//! executor consumes.
//!
//! ## Rules
//!
//! 1. A local key is uploaded when the remote side does not have it, or when
//!    the remote digest differs from the local one.
//! 2. When the backend cannot report a digest (opaque tags only), the local
//!    digest is compared against `last_applied` instead. A match means the
//!    object is assumed consistent and skipped.
//! 3. A remote key absent locally is deleted.
//! 4. `content_changed` is true iff anything is uploaded or deleted.
//!
//! The computation is pure: no I/O, no clock, no randomness.

use std::collections::{BTreeMap, BTreeSet};

use crate::fingerprint::{Digest, LocalFileEntry, LocalTree};
use crate::snapshot::RemoteSnapshot;

/// Object-level operations for one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffPlan {
    /// Files to write, non-HTML assets first, then HTML documents
    pub to_upload: Vec<LocalFileEntry>,
    /// Remote keys to remove
    pub to_delete: BTreeSet<String>,
    /// Whether the published content changes
    pub content_changed: bool,
}

impl DiffPlan {
    /// Whether the plan has no work
    pub fn is_empty(&self) -> bool {
        self.to_upload.is_empty() && self.to_delete.is_empty()
    }

    /// Keys scheduled for upload, in upload order
    pub fn upload_keys(&self) -> Vec<&str> {
        self.to_upload
            .iter()
            .map(|entry| entry.relative_key.as_str())
            .collect()
    }

    /// Keep only deletions of keys this provider recorded as written
    ///
    /// Objects placed in the container by anyone else survive the sync.
    #[must_use]
    pub fn restrict_to_tracked(mut self, last_applied: &BTreeMap<String, Digest>) -> Self {
        self.to_delete.retain(|key| last_applied.contains_key(key));
        self.content_changed = !self.is_empty();
        self
    }
}

/// Compute the plan turning `remote` into a copy of `local`
pub fn compute_plan(
    local: &LocalTree,
    remote: &RemoteSnapshot,
    last_applied: &BTreeMap<String, Digest>,
) -> DiffPlan {
    let mut to_upload: Vec<LocalFileEntry> = local
        .iter()
        .filter(|(key, entry)| needs_upload(key, entry, remote, last_applied))
        .map(|(_, entry)| entry.clone())
        .collect();

    // Publish pages after the assets they reference
    to_upload.sort_by(|a, b| {
        is_html(a)
            .cmp(&is_html(b))
            .then_with(|| a.relative_key.cmp(&b.relative_key))
    });

    let to_delete: BTreeSet<String> = remote
        .keys()
        .filter(|key| !local.contains_key(*key))
        .cloned()
        .collect();

    let content_changed = !to_upload.is_empty() || !to_delete.is_empty();

    DiffPlan {
        to_upload,
        to_delete,
        content_changed,
    }
}

fn needs_upload(
    key: &str,
    entry: &LocalFileEntry,
    remote: &RemoteSnapshot,
    last_applied: &BTreeMap<String, Digest>,
) -> bool {
    let Some(remote_entry) = remote.get(key) else {
        return true;
    };

    match remote_entry.content_hash {
        Some(remote_hash) => remote_hash != entry.content_hash,
        // Opaque tag: trust what we last wrote
        None => last_applied.get(key) != Some(&entry.content_hash),
    }
}

fn is_html(entry: &LocalFileEntry) -> bool {
    entry.content_type.starts_with("text/html")
}
