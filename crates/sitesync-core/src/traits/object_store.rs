// # Object Store Trait
//
// Defines the interface to the object storage backend that hosts the site
// content.
//
// ## Implementations
//
// - Amazon S3: `sitesync-provider-aws` crate
// - In-memory: `sitesync_core::backend::MemoryObjectStore`
//
// ## Usage
//
// ```rust,ignore
// use sitesync_core::traits::ObjectStore;
//
// let store = /* ObjectStore implementation */;
// let mut continuation = None;
// loop {
//     let page = store.list_objects("my-bucket", continuation.as_deref()).await?;
//     // ...
//     match page.next_continuation {
//         Some(token) => continuation = Some(token),
//         None => break,
//     }
// }
// ```

use async_trait::async_trait;
use std::path::PathBuf;

use crate::fingerprint::Digest;

/// One remote object as reported by a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObjectEntry {
    /// Object key (case-sensitive exact string)
    pub key: String,
    /// Content digest, when the backend can report one
    ///
    /// `None` means the backend only exposes an opaque tag and the diff
    /// must fall back to the last applied hashes.
    pub content_hash: Option<Digest>,
    /// Backend entity tag
    pub etag: String,
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    /// Objects in this page
    pub objects: Vec<RemoteObjectEntry>,
    /// Token for the next page, `None` on the last page
    pub next_continuation: Option<String>,
}

/// A single object write
#[derive(Debug, Clone)]
pub struct ObjectUpload {
    /// Destination key
    pub key: String,
    /// Local file holding the bytes
    pub source_path: PathBuf,
    /// Content-Type header
    pub content_type: String,
    /// Cache-Control header
    pub cache_control: String,
    /// Digest recorded as object metadata
    pub content_hash: Digest,
}

/// Static website hosting settings of a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebsiteSettings {
    /// Document served for directory requests
    pub index_document: String,
    /// Document served for missing keys
    pub error_document: Option<String>,
}

/// Trait for object storage backends
///
/// # Contract
///
/// Implementations are single-shot: one call, one request (or one logical
/// request). They must not retry, sleep or cache listings; retries with
/// backoff are owned by the engine. Failures are reported as
/// [`crate::Error::BackendUnavailable`] with a [`crate::error::BackendErrorKind`]
/// the engine uses to decide whether to retry.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the container and prepare it for public website hosting
    ///
    /// Must succeed if the container already exists and is owned by the
    /// caller, so a retried create converges.
    async fn create_container(&self, container: &str) -> Result<(), crate::Error>;

    /// Apply index/error document settings
    async fn configure_website(
        &self,
        container: &str,
        settings: &WebsiteSettings,
    ) -> Result<(), crate::Error>;

    /// List one page of objects
    async fn list_objects(
        &self,
        container: &str,
        continuation: Option<&str>,
    ) -> Result<ObjectPage, crate::Error>;

    /// Write one object, publicly readable
    async fn put_object(&self, container: &str, upload: &ObjectUpload) -> Result<(), crate::Error>;

    /// Delete one object
    async fn delete_object(&self, container: &str, key: &str) -> Result<(), crate::Error>;

    /// Delete an empty container
    async fn delete_container(&self, container: &str) -> Result<(), crate::Error>;

    /// Public website endpoint of a container (including scheme)
    fn website_endpoint(&self, container: &str) -> String;

    /// Backend name (for logging/errors)
    fn backend_name(&self) -> &'static str;
}
