//! Contract Test: Resource Lifecycle
//!
//! Constraints verified:
//! - Statuses follow Absent → Creating → Ready → Updating → Ready → Deleting → Absent
//! - Delete empties and removes the container, then the distribution
//! - Calls from a status that does not allow them are rejected
//! - Creating into a declared bucket never deletes what was already there
//! - The prune scope decides whether foreign objects survive an update
//!
//! If this test fails, the host can drive the resource into an undefined state.

mod common;

use common::*;
use sitesync_core::backend::MemoryObjectStore;
use sitesync_core::traits::{ContentDelivery, ObjectStore};
use sitesync_core::{Error, ProviderEvent, ProviderSettings, PruneScope, ResourceStatus};

fn status_changes(events: &[ProviderEvent]) -> Vec<(ResourceStatus, ResourceStatus)> {
    events
        .iter()
        .filter_map(|event| match event {
            ProviderEvent::StatusChanged { from, to, .. } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn full_lifecycle_walks_the_state_machine() {
    use ResourceStatus::*;

    let site = SiteDir::with_files(&[("index.html", "v1")]);
    let mut h = Harness::new();

    let (id, _, state) = h.provider.create(site.desired()).await.unwrap();
    assert_eq!(h.provider.status(&id), Ready);

    site.write("index.html", "v2");
    let (_, state) = h.provider.update(&id, &state, site.desired()).await.unwrap();
    h.provider.delete(&id, &state).await.unwrap();
    assert_eq!(h.provider.status(&id), Absent);

    assert_eq!(
        status_changes(&h.drain_events()),
        vec![
            (Absent, Creating),
            (Creating, Ready),
            (Ready, Updating),
            (Updating, Ready),
            (Ready, Deleting),
            (Deleting, Absent),
        ]
    );
}

#[tokio::test]
async fn delete_removes_everything() {
    let site = SiteDir::with_files(&[("index.html", "v1"), ("a/b.css", "b")]);
    let h = Harness::new();
    let (id, _, state) = h.provider.create(site.desired()).await.unwrap();

    // Content the provider never wrote goes too: a non-empty bucket cannot be removed
    h.store.insert_object(&id, "uploaded-by-hand.txt", b"x");

    h.provider.delete(&id, &state).await.unwrap();

    assert!(!h.store.has_container(&id));
    assert_eq!(h.cdn.distribution_count(), 0);
}

#[tokio::test]
async fn delete_tolerates_already_absent_resources() {
    let site = SiteDir::with_files(&[("index.html", "v1")]);
    let h = Harness::new();
    let (id, _, state) = h.provider.create(site.desired()).await.unwrap();

    h.store.delete_object(&id, "index.html").await.unwrap();
    h.store.delete_container(&id).await.unwrap();
    h.cdn.delete_distribution(&state.distribution_id).await.unwrap();

    h.provider
        .delete(&id, &state)
        .await
        .expect("absent targets count as deleted");
    assert_eq!(h.provider.status(&id), ResourceStatus::Absent);
}

#[tokio::test]
async fn update_after_delete_is_an_invalid_transition() {
    let site = SiteDir::with_files(&[("index.html", "v1")]);
    let h = Harness::new();
    let (id, _, state) = h.provider.create(site.desired()).await.unwrap();
    h.provider.delete(&id, &state).await.unwrap();

    let err = h
        .provider
        .update(&id, &state, site.desired())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: ResourceStatus::Absent,
            to: ResourceStatus::Updating,
        }
    ));
}

#[tokio::test]
async fn update_rejects_bucket_rename() {
    let site = SiteDir::with_files(&[("index.html", "v1")]);
    let h = Harness::new();
    let (id, _, state) = h.provider.create(site.desired()).await.unwrap();

    let news = site.desired().with_bucket_name("renamed-bucket");
    let err = h.provider.update(&id, &state, news).await.unwrap_err();

    assert!(matches!(err, Error::Configuration(_)));
    assert_eq!(h.provider.status(&id), ResourceStatus::Ready);
}

#[tokio::test]
async fn create_into_declared_bucket_keeps_existing_objects() {
    let site = SiteDir::with_files(&[("index.html", "v1")]);
    let store = MemoryObjectStore::new();
    store.insert_object("declared-bucket", "foreign.txt", b"x");
    store.insert_object("declared-bucket", "index.html", b"someone else's");
    let mut h = Harness::with(store, test_settings());

    let desired = site.desired().with_bucket_name("declared-bucket");
    let (id, _, state) = h.provider.create(desired).await.unwrap();

    assert_eq!(h.store.keys(&id), vec!["foreign.txt", "index.html"]);
    assert_eq!(h.store.hashes(&id)["index.html"], digest("v1"));
    assert_eq!(state.last_applied_file_hashes, hashes(&[("index.html", "v1")]));
    assert_eq!(h.last_plan(), Some((1, 0, true)));
}

#[tokio::test]
async fn prune_all_removes_foreign_objects_on_update() {
    let site = SiteDir::with_files(&[("index.html", "v1")]);
    let store = MemoryObjectStore::new();
    store.insert_object("declared-bucket", "foreign.txt", b"x");
    let h = Harness::with(store, test_settings());

    let desired = site.desired().with_bucket_name("declared-bucket");
    let (id, _, state) = h.provider.create(desired.clone()).await.unwrap();
    assert_eq!(h.store.keys(&id), vec!["foreign.txt", "index.html"]);

    h.provider.update(&id, &state, desired).await.unwrap();
    assert_eq!(h.store.keys(&id), vec!["index.html"]);
}

#[tokio::test]
async fn prune_tracked_keeps_foreign_objects() {
    let site = SiteDir::with_files(&[("index.html", "v1"), ("old.html", "old")]);
    let store = MemoryObjectStore::new();
    store.insert_object("declared-bucket", "foreign.txt", b"x");

    let mut settings = test_settings();
    settings.sync.prune = PruneScope::Tracked;
    let h = Harness::with(store, settings);

    let desired = site.desired().with_bucket_name("declared-bucket");
    let (id, _, state) = h.provider.create(desired.clone()).await.unwrap();
    assert_eq!(h.store.keys(&id), vec!["foreign.txt", "index.html", "old.html"]);
    assert!(!state.last_applied_file_hashes.contains_key("foreign.txt"));

    site.remove("old.html");
    h.provider.update(&id, &state, desired).await.unwrap();
    assert_eq!(h.store.keys(&id), vec!["foreign.txt", "index.html"]);
}

#[tokio::test]
async fn full_event_channel_never_blocks_reconciliation() {
    let site = SiteDir::with_files(&[("a.css", "a"), ("b.css", "b"), ("index.html", "v1")]);
    let settings = ProviderSettings {
        event_channel_capacity: 1,
        ..test_settings()
    };
    let mut h = Harness::with(MemoryObjectStore::new(), settings);

    h.provider.create(site.desired()).await.expect("create succeeds");

    assert_eq!(h.drain_events().len(), 1);
}
