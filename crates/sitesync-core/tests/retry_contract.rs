//! Contract Test: Retry Architecture
//!
//! Constraints verified:
//! - Transient backend failures are retried with the injected policy
//! - Permanent failures are never retried
//! - Exhausted retries fail the reconciliation without recording bogus state
//!
//! If this test fails, backends are hammered or flakes become outages.

mod common;

use common::*;
use sitesync_core::{Error, RetryPolicy, ResourceStatus};

#[tokio::test]
async fn transient_listing_failures_are_absorbed() {
    let site = SiteDir::with_files(&[("index.html", "v1")]);
    let h = Harness::new();
    let (id, _, state) = h.provider.create(site.desired()).await.unwrap();

    h.store.reset_counters();
    h.store.fail_next_lists(2);
    site.write("index.html", "v2");

    h.provider.update(&id, &state, site.desired()).await.unwrap();
    assert_eq!(h.store.list_calls(), 3);
}

#[tokio::test]
async fn transient_upload_failures_are_absorbed() {
    let site = SiteDir::with_files(&[("index.html", "v1")]);
    let h = Harness::new();
    h.store.fail_next_puts(2);

    let (id, _, _) = h.provider.create(site.desired()).await.unwrap();

    assert_eq!(h.store.put_calls(), 3);
    assert_eq!(h.store.keys(&id), vec!["index.html"]);
}

#[tokio::test]
async fn transient_distribution_failures_are_absorbed() {
    let site = SiteDir::with_files(&[("index.html", "v1")]);
    let h = Harness::new();
    h.cdn.fail_next_creates(2);

    h.provider.create(site.desired()).await.unwrap();

    assert_eq!(h.cdn.create_calls(), 3);
    assert_eq!(h.cdn.distribution_count(), 1);
}

#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let site = SiteDir::with_files(&[("index.html", "v1")]);
    let h = Harness::new();
    h.store.reject_key("index.html");

    let err = h
        .provider
        .create(site.desired().with_bucket_name("rejecting-site"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SyncPartialFailure(_)));
    assert_eq!(h.store.put_calls(), 1);
}

#[tokio::test]
async fn exhausted_retries_fail_the_update() {
    let site = SiteDir::with_files(&[("index.html", "v1")]);
    let mut settings = test_settings();
    settings.retry = RetryPolicy::immediate(2);
    let h = Harness::with(sitesync_core::backend::MemoryObjectStore::new(), settings);
    let (id, _, state) = h.provider.create(site.desired()).await.unwrap();

    h.store.reset_counters();
    h.store.fail_next_lists(5);
    let err = h
        .provider
        .update(&id, &state, site.desired())
        .await
        .unwrap_err();

    assert!(err.is_retryable(), "the last transient error surfaces verbatim");
    assert!(err.partial_state().is_none());
    assert_eq!(h.store.list_calls(), 2);
    assert_eq!(h.store.write_calls(), 0);
    assert_eq!(h.provider.status(&id), ResourceStatus::Failed);
}
