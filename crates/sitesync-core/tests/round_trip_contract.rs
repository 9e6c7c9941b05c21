//! Contract Test: Round-Trip and Scenarios
//!
//! Constraints verified:
//! - After a successful apply the remote key set equals the local file set
//! - `lastAppliedFileHashes` equals the per-file content hashes
//! - Create, edit and removal scenarios plan exactly the expected work
//!
//! If this test fails, the remote site no longer mirrors the directory.

mod common;

use common::*;

#[tokio::test]
async fn create_single_page_site() {
    let site = SiteDir::with_files(&[("index.html", "H1")]);
    let mut h = Harness::new();

    let (id, outputs, state) = h.provider.create(site.desired()).await.expect("create succeeds");

    assert_eq!(h.last_plan(), Some((1, 0, true)));
    assert_eq!(h.store.hashes(&id), hashes(&[("index.html", "H1")]));
    assert!(!outputs.url.is_empty());
    assert!(outputs.url.starts_with("https://"));
    assert_eq!(outputs.bucket, id);
    assert_eq!(state.site_url, outputs.url);
    assert!(id.starts_with("static-website-"));
}

#[tokio::test]
async fn edited_file_is_reuploaded() {
    let site = SiteDir::with_files(&[("index.html", "H1")]);
    let mut h = Harness::new();
    let (id, _, state) = h.provider.create(site.desired()).await.unwrap();
    h.drain_events();

    site.write("index.html", "H2");
    let (_, state) = h.provider.update(&id, &state, site.desired()).await.unwrap();

    assert_eq!(h.last_plan(), Some((1, 0, true)));
    assert_eq!(h.store.hashes(&id), hashes(&[("index.html", "H2")]));
    assert_eq!(state.last_applied_file_hashes, hashes(&[("index.html", "H2")]));
}

#[tokio::test]
async fn removed_file_is_deleted() {
    let site = SiteDir::with_files(&[("index.html", "home"), ("old.html", "old")]);
    let mut h = Harness::new();
    let (id, _, state) = h.provider.create(site.desired()).await.unwrap();
    h.drain_events();

    site.remove("old.html");
    let (_, state) = h.provider.update(&id, &state, site.desired()).await.unwrap();

    assert_eq!(h.last_plan(), Some((0, 1, true)));
    assert_eq!(h.store.keys(&id), vec!["index.html"]);
    assert_eq!(state.last_applied_file_hashes, hashes(&[("index.html", "home")]));
}

#[tokio::test]
async fn remote_set_mirrors_nested_tree() {
    let files = [
        ("index.html", "home"),
        ("404.html", "missing"),
        ("blog/2024/post.html", "post"),
        ("assets/app.3f9a1c2b.js", "js"),
        ("assets/fonts/inter.woff2", "font"),
    ];
    let site = SiteDir::with_files(&files);
    let h = Harness::new();

    let desired = site.desired().with_error_document("404.html");
    let (id, _, state) = h.provider.create(desired).await.unwrap();

    assert_eq!(h.store.hashes(&id), hashes(&files));
    assert_eq!(state.last_applied_file_hashes, hashes(&files));

    let website = h.store.website(&id).expect("website configured");
    assert_eq!(website.index_document, "index.html");
    assert_eq!(website.error_document.as_deref(), Some("404.html"));

    let page = h.store.object(&id, "blog/2024/post.html").unwrap();
    assert_eq!(page.content_type, "text/html");
    assert_eq!(page.cache_control, "public, max-age=0, must-revalidate");
}

#[tokio::test]
async fn included_files_limit_what_is_published() {
    let site = SiteDir::with_files(&[
        ("index.html", "home"),
        ("notes.md", "draft"),
        ("css/site.css", "body{}"),
    ]);
    let h = Harness::new();

    let desired = site.desired().with_included_files(["*.html", "css/**"]);
    let (id, _, _) = h.provider.create(desired).await.unwrap();

    assert_eq!(h.store.keys(&id), vec!["css/site.css", "index.html"]);
}

#[tokio::test]
async fn read_returns_outputs_from_state_alone() {
    let site = SiteDir::with_files(&[("index.html", "home")]);
    let h = Harness::new();
    let (id, outputs, state) = h.provider.create(site.desired()).await.unwrap();
    h.store.reset_counters();

    let read = h.provider.read(&id, &state);

    assert_eq!(read.url, outputs.url);
    assert_eq!(read.bucket, outputs.bucket);
    assert_eq!(h.store.list_calls() + h.store.write_calls(), 0);
}

#[tokio::test]
async fn custom_domain_becomes_the_site_url() {
    let site = SiteDir::with_files(&[("index.html", "home")]);
    let h = Harness::new();

    let (id, outputs, state) = h.provider.create(site.desired()).await.unwrap();
    assert!(outputs.url.ends_with(".cdn.memory.local"));

    let news = site.desired().with_custom_domain("www.example.com");
    let (outputs, state) = h.provider.update(&id, &state, news).await.unwrap();

    assert_eq!(outputs.url, "https://www.example.com");
    assert_eq!(h.cdn.update_calls(), 1);
    let spec = h.cdn.distribution(&state.distribution_id).unwrap();
    assert_eq!(spec.custom_domain.as_deref(), Some("www.example.com"));
}
