//! Contract Test: Idempotence
//!
//! Constraints verified:
//! - Re-applying unchanged inputs over an unchanged directory plans nothing
//! - Such an update issues zero backend writes beyond the listing
//! - `diff` reports no changes and touches no backend
//!
//! If this test fails, repeated reconciliations are doing needless work.

mod common;

use common::*;

#[tokio::test]
async fn unchanged_update_issues_no_writes() {
    let site = SiteDir::with_files(&[
        ("index.html", "<h1>home</h1>"),
        ("css/site.css", "body{}"),
        ("img/logo.png", "png"),
    ]);
    let mut h = Harness::new();

    let (id, _, state) = h.provider.create(site.desired()).await.expect("create succeeds");
    h.drain_events();
    h.store.reset_counters();
    let invalidations_before = h.cdn.invalidations().len();

    let (_, next) = h
        .provider
        .update(&id, &state, site.desired())
        .await
        .expect("update succeeds");

    assert_eq!(h.last_plan(), Some((0, 0, false)), "plan must be empty");
    assert_eq!(h.store.write_calls(), 0, "no writes beyond the listing");
    assert_eq!(h.store.list_calls(), 1);
    assert_eq!(h.cdn.update_calls(), 0);
    assert_eq!(h.cdn.invalidations().len(), invalidations_before);
    assert_eq!(next.last_applied_file_hashes, state.last_applied_file_hashes);
}

#[tokio::test]
async fn unchanged_update_is_idempotent_with_opaque_listing() {
    // Backends exposing only opaque tags rely on the recorded hashes
    let site = SiteDir::with_files(&[("index.html", "v1"), ("app.js", "js")]);
    let mut h = Harness::with(
        sitesync_core::backend::MemoryObjectStore::new().with_opaque_hashes(),
        test_settings(),
    );

    let (id, _, state) = h.provider.create(site.desired()).await.unwrap();
    h.drain_events();
    h.store.reset_counters();

    h.provider.update(&id, &state, site.desired()).await.unwrap();

    assert_eq!(h.last_plan(), Some((0, 0, false)));
    assert_eq!(h.store.write_calls(), 0);
}

#[tokio::test]
async fn diff_reports_no_changes_without_backend_calls() {
    let site = SiteDir::with_files(&[("index.html", "v1")]);
    let h = Harness::new();

    let (id, _, state) = h.provider.create(site.desired()).await.unwrap();
    h.store.reset_counters();

    let result = h.provider.diff(&id, &state, &site.desired()).await.unwrap();

    assert!(!result.changes);
    assert!(!result.replace);
    assert!(result.changed_fields.is_empty());
    assert_eq!(h.store.list_calls(), 0);
    assert_eq!(h.store.write_calls(), 0);
}

#[tokio::test]
async fn diff_detects_content_and_input_changes() {
    let site = SiteDir::with_files(&[("index.html", "v1")]);
    let h = Harness::new();
    let (id, _, state) = h.provider.create(site.desired()).await.unwrap();

    site.write("index.html", "v2");
    let result = h.provider.diff(&id, &state, &site.desired()).await.unwrap();
    assert!(result.changes);
    assert!(!result.replace);
    assert_eq!(result.changed_fields, vec!["content"]);

    let news = site.desired().with_error_document("404.html");
    let result = h.provider.diff(&id, &state, &news).await.unwrap();
    assert!(result.changed_fields.contains(&"errorDocument".to_string()));

    let news = site.desired().with_bucket_name("another-bucket");
    let result = h.provider.diff(&id, &state, &news).await.unwrap();
    assert!(result.replace, "a new bucket name requires replacement");
}
