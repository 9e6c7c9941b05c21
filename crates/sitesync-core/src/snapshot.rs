//! Remote state snapshot
//!
//! Lists every object in the storage container, draining pagination before
//! returning. Each page request is retried on its own with the injected
//! policy. Nothing is cached: every reconciliation lists afresh.
//!
//! Backends that cannot report a content digest (S3 only exposes ETags,
//! which are not content hashes for multipart uploads) yield entries with
//! `content_hash: None`. The diff engine then trusts the hashes recorded by
//! the last apply for those keys, so an object modified out of band with the
//! same key may go undetected until its local content changes.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{Error, Result};
use crate::retry::{RetryPolicy, with_backoff};
use crate::traits::{ObjectStore, RemoteObjectEntry};

/// Remote objects keyed by key
pub type RemoteSnapshot = BTreeMap<String, RemoteObjectEntry>;

/// Upper bound on pages, guards against a backend echoing the same token
const MAX_PAGES: usize = 100_000;

/// Fetch the complete object listing of a container
pub async fn fetch_snapshot(
    store: &dyn ObjectStore,
    container: &str,
    policy: &RetryPolicy,
) -> Result<RemoteSnapshot> {
    let mut snapshot = RemoteSnapshot::new();
    let mut continuation: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let token = continuation.as_deref();
        let page = with_backoff(policy, "list objects", || {
            store.list_objects(container, token)
        })
        .await?;

        pages += 1;
        for object in page.objects {
            snapshot.insert(object.key.clone(), object);
        }

        match page.next_continuation {
            Some(next) if continuation.as_deref() == Some(next.as_str()) => {
                return Err(Error::backend(
                    store.backend_name(),
                    crate::error::BackendErrorKind::Rejected,
                    format!("listing of {} repeated continuation token", container),
                ));
            }
            Some(_) if pages >= MAX_PAGES => {
                return Err(Error::backend(
                    store.backend_name(),
                    crate::error::BackendErrorKind::Rejected,
                    format!("listing of {} exceeded {} pages", container, MAX_PAGES),
                ));
            }
            Some(next) => continuation = Some(next),
            None => break,
        }
    }

    debug!(
        "Listed {} object(s) in {} page(s) from {}",
        snapshot.len(),
        pages,
        container
    );
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryObjectStore;
    use crate::fingerprint::Digest;
    use crate::traits::ObjectUpload;

    async fn seeded(store: &MemoryObjectStore, keys: &[&str]) {
        store.create_container("site").await.unwrap();
        for key in keys {
            store
                .put_object(
                    "site",
                    &ObjectUpload {
                        key: key.to_string(),
                        source_path: std::path::PathBuf::new(),
                        content_type: "text/plain".to_string(),
                        cache_control: "public, max-age=3600".to_string(),
                        content_hash: Digest::of_bytes(key.as_bytes()),
                    },
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn drains_every_page() {
        let store = MemoryObjectStore::new().with_page_size(2);
        seeded(&store, &["a", "b", "c", "d", "e"]).await;

        let snapshot = fetch_snapshot(&store, "site", &RetryPolicy::immediate(1))
            .await
            .unwrap();

        assert_eq!(snapshot.len(), 5);
        assert_eq!(store.list_calls(), 3);
        assert_eq!(snapshot["c"].content_hash, Some(Digest::of_bytes(b"c")));
    }

    #[tokio::test]
    async fn transient_listing_failures_are_retried() {
        let store = MemoryObjectStore::new();
        seeded(&store, &["index.html"]).await;
        store.fail_next_lists(2);

        let snapshot = fetch_snapshot(&store, "site", &RetryPolicy::immediate(3))
            .await
            .unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.list_calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_snapshot() {
        let store = MemoryObjectStore::new();
        seeded(&store, &["index.html"]).await;
        store.fail_next_lists(5);

        let err = fetch_snapshot(&store, "site", &RetryPolicy::immediate(2))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn opaque_store_reports_no_hashes() {
        let store = MemoryObjectStore::new().with_opaque_hashes();
        seeded(&store, &["index.html"]).await;

        let snapshot = fetch_snapshot(&store, "site", &RetryPolicy::none())
            .await
            .unwrap();

        assert_eq!(snapshot["index.html"].content_hash, None);
        assert!(!snapshot["index.html"].etag.is_empty());
    }
}
