// # Memory Backends
//
// In-memory object store and content delivery network.
//
// Both keep their data behind a `std::sync::Mutex` (never held across an
// await) and count every call, so tests can assert how much work a
// reconciliation did. Fault injection hooks model throttling, permanent
// rejections and backends that only report opaque tags.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{BackendErrorKind, Error};
use crate::fingerprint::Digest;
use crate::traits::{
    ContentDelivery, DistributionInfo, DistributionSpec, ObjectPage, ObjectStore, ObjectUpload,
    RemoteObjectEntry, WebsiteSettings,
};

const BACKEND: &str = "memory";

/// One object held by [`MemoryObjectStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Digest recorded on upload
    pub content_hash: Digest,
    /// Content-Type header
    pub content_type: String,
    /// Cache-Control header
    pub cache_control: String,
}

#[derive(Debug, Default)]
struct Container {
    objects: BTreeMap<String, StoredObject>,
    website: Option<WebsiteSettings>,
}

/// In-memory object store
#[derive(Debug)]
pub struct MemoryObjectStore {
    containers: Mutex<HashMap<String, Container>>,
    page_size: usize,
    opaque_hashes: bool,

    list_calls: AtomicUsize,
    put_calls: AtomicUsize,
    write_calls: AtomicUsize,

    transient_list_failures: AtomicUsize,
    transient_put_failures: AtomicUsize,
    failing_keys: Mutex<HashSet<String>>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    /// Create an empty store with 1000-object pages
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            page_size: 1000,
            opaque_hashes: false,
            list_calls: AtomicUsize::new(0),
            put_calls: AtomicUsize::new(0),
            write_calls: AtomicUsize::new(0),
            transient_list_failures: AtomicUsize::new(0),
            transient_put_failures: AtomicUsize::new(0),
            failing_keys: Mutex::new(HashSet::new()),
        }
    }

    /// Limit the number of objects per listing page
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Report only opaque tags in listings, like S3 does
    #[must_use]
    pub fn with_opaque_hashes(mut self) -> Self {
        self.opaque_hashes = true;
        self
    }

    /// Fail the next `count` listing calls with a transient error
    pub fn fail_next_lists(&self, count: usize) {
        self.transient_list_failures.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` uploads with a transient error
    pub fn fail_next_puts(&self, count: usize) {
        self.transient_put_failures.store(count, Ordering::SeqCst);
    }

    /// Reject every upload and delete of `key`
    pub fn reject_key(&self, key: impl Into<String>) {
        self.lock_failing().insert(key.into());
    }

    /// Stop rejecting operations on any key
    pub fn clear_failures(&self) {
        self.lock_failing().clear();
        self.transient_list_failures.store(0, Ordering::SeqCst);
        self.transient_put_failures.store(0, Ordering::SeqCst);
    }

    /// Place an object directly, bypassing counters (seeding foreign content)
    pub fn insert_object(&self, container: &str, key: &str, bytes: &[u8]) {
        let mut containers = self.lock();
        let entry = containers.entry(container.to_string()).or_default();
        entry.objects.insert(
            key.to_string(),
            StoredObject {
                content_hash: Digest::of_bytes(bytes),
                content_type: crate::fingerprint::content_type_for(key),
                cache_control: String::new(),
            },
        );
    }

    /// Keys of a container, sorted
    pub fn keys(&self, container: &str) -> Vec<String> {
        self.lock()
            .get(container)
            .map(|c| c.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Key → digest of a container
    pub fn hashes(&self, container: &str) -> BTreeMap<String, Digest> {
        self.lock()
            .get(container)
            .map(|c| {
                c.objects
                    .iter()
                    .map(|(key, object)| (key.clone(), object.content_hash))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// One stored object
    pub fn object(&self, container: &str, key: &str) -> Option<StoredObject> {
        self.lock()
            .get(container)
            .and_then(|c| c.objects.get(key).cloned())
    }

    /// Website settings of a container
    pub fn website(&self, container: &str) -> Option<WebsiteSettings> {
        self.lock().get(container).and_then(|c| c.website.clone())
    }

    /// Whether a container exists
    pub fn has_container(&self, container: &str) -> bool {
        self.lock().contains_key(container)
    }

    /// Number of listing calls
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of upload calls, failed ones included
    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Number of mutating calls of any kind
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Reset all call counters
    pub fn reset_counters(&self) {
        self.list_calls.store(0, Ordering::SeqCst);
        self.put_calls.store(0, Ordering::SeqCst);
        self.write_calls.store(0, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Container>> {
        // A poisoned lock only means a test panicked mid-call
        self.containers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_failing(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.failing_keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_failing(&self, key: &str) -> bool {
        self.lock_failing().contains(key)
    }

    fn missing(container: &str) -> Error {
        Error::not_found(BACKEND, format!("NoSuchBucket: {}", container))
    }
}

/// Consume one unit of an injected failure budget
fn take_failure(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn etag_of(digest: &Digest) -> String {
    format!("\"{}\"", &digest.to_hex()[..32])
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn create_container(&self, container: &str) -> Result<(), Error> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        self.lock().entry(container.to_string()).or_default();
        Ok(())
    }

    async fn configure_website(
        &self,
        container: &str,
        settings: &WebsiteSettings,
    ) -> Result<(), Error> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let mut containers = self.lock();
        let entry = containers
            .get_mut(container)
            .ok_or_else(|| Self::missing(container))?;
        entry.website = Some(settings.clone());
        Ok(())
    }

    async fn list_objects(
        &self,
        container: &str,
        continuation: Option<&str>,
    ) -> Result<ObjectPage, Error> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.transient_list_failures) {
            return Err(Error::transient(BACKEND, "SlowDown: please reduce your request rate"));
        }

        let containers = self.lock();
        let entry = containers
            .get(container)
            .ok_or_else(|| Self::missing(container))?;

        let start = match continuation {
            Some(token) => Bound::Excluded(token.to_string()),
            None => Bound::Unbounded,
        };
        let mut range = entry
            .objects
            .range((start, Bound::Unbounded))
            .take(self.page_size + 1)
            .map(|(key, object)| RemoteObjectEntry {
                key: key.clone(),
                content_hash: (!self.opaque_hashes).then_some(object.content_hash),
                etag: etag_of(&object.content_hash),
            })
            .collect::<Vec<_>>();

        let next_continuation = if range.len() > self.page_size {
            range.truncate(self.page_size);
            range.last().map(|object| object.key.clone())
        } else {
            None
        };

        Ok(ObjectPage {
            objects: range,
            next_continuation,
        })
    }

    async fn put_object(&self, container: &str, upload: &ObjectUpload) -> Result<(), Error> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.write_calls.fetch_add(1, Ordering::SeqCst);

        if take_failure(&self.transient_put_failures) {
            return Err(Error::transient(BACKEND, "RequestTimeout"));
        }
        if self.is_failing(&upload.key) {
            return Err(Error::backend(
                BACKEND,
                BackendErrorKind::Rejected,
                format!("put of {} rejected", upload.key),
            ));
        }

        let mut containers = self.lock();
        let entry = containers
            .get_mut(container)
            .ok_or_else(|| Self::missing(container))?;
        entry.objects.insert(
            upload.key.clone(),
            StoredObject {
                content_hash: upload.content_hash,
                content_type: upload.content_type.clone(),
                cache_control: upload.cache_control.clone(),
            },
        );
        Ok(())
    }

    async fn delete_object(&self, container: &str, key: &str) -> Result<(), Error> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.is_failing(key) {
            return Err(Error::backend(
                BACKEND,
                BackendErrorKind::Rejected,
                format!("delete of {} rejected", key),
            ));
        }

        let mut containers = self.lock();
        let entry = containers
            .get_mut(container)
            .ok_or_else(|| Self::missing(container))?;
        // Deleting an absent key succeeds, as on S3
        entry.objects.remove(key);
        Ok(())
    }

    async fn delete_container(&self, container: &str) -> Result<(), Error> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let mut containers = self.lock();
        match containers.get(container) {
            None => Err(Self::missing(container)),
            Some(entry) if !entry.objects.is_empty() => Err(Error::backend(
                BACKEND,
                BackendErrorKind::Rejected,
                format!("BucketNotEmpty: {}", container),
            )),
            Some(_) => {
                containers.remove(container);
                Ok(())
            }
        }
    }

    fn website_endpoint(&self, container: &str) -> String {
        format!("http://{}.website.memory.local", container)
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}

#[derive(Debug, Clone)]
struct Distribution {
    spec: DistributionSpec,
    domain_name: String,
}

/// In-memory content delivery network
#[derive(Debug, Default)]
pub struct MemoryContentDelivery {
    distributions: Mutex<BTreeMap<String, Distribution>>,
    invalidations: Mutex<Vec<(String, Vec<String>)>>,
    next_id: AtomicUsize,

    create_calls: AtomicUsize,
    update_calls: AtomicUsize,
    delete_calls: AtomicUsize,

    transient_create_failures: AtomicUsize,
    reject_invalidations: AtomicUsize,
}

impl MemoryContentDelivery {
    /// Create an empty CDN
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` distribution creations with a transient error
    pub fn fail_next_creates(&self, count: usize) {
        self.transient_create_failures.store(count, Ordering::SeqCst);
    }

    /// Reject the next `count` invalidation requests
    pub fn reject_next_invalidations(&self, count: usize) {
        self.reject_invalidations.store(count, Ordering::SeqCst);
    }

    /// Current configuration of a distribution
    pub fn distribution(&self, id: &str) -> Option<DistributionSpec> {
        self.lock().get(id).map(|d| d.spec.clone())
    }

    /// Number of existing distributions
    pub fn distribution_count(&self) -> usize {
        self.lock().len()
    }

    /// Every invalidation issued so far, as (distribution id, paths)
    pub fn invalidations(&self) -> Vec<(String, Vec<String>)> {
        self.invalidations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of distribution creations, failed ones included
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of distribution updates
    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Number of distribution deletions
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Distribution>> {
        self.distributions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn missing(id: &str) -> Error {
        Error::not_found(BACKEND, format!("NoSuchDistribution: {}", id))
    }
}

#[async_trait]
impl ContentDelivery for MemoryContentDelivery {
    async fn create_distribution(
        &self,
        spec: &DistributionSpec,
    ) -> Result<DistributionInfo, Error> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.transient_create_failures) {
            return Err(Error::transient(BACKEND, "Throttling: rate exceeded"));
        }

        let mut distributions = self.lock();

        // Same caller reference, same distribution
        if let Some((id, existing)) = distributions
            .iter()
            .find(|(_, d)| d.spec.caller_reference == spec.caller_reference)
        {
            return Ok(DistributionInfo {
                id: id.clone(),
                domain_name: existing.domain_name.clone(),
            });
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("EMEM{:08X}", n);
        let domain_name = format!("d{:08x}.cdn.memory.local", n);
        distributions.insert(
            id.clone(),
            Distribution {
                spec: spec.clone(),
                domain_name: domain_name.clone(),
            },
        );

        Ok(DistributionInfo { id, domain_name })
    }

    async fn update_distribution(
        &self,
        id: &str,
        spec: &DistributionSpec,
    ) -> Result<DistributionInfo, Error> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut distributions = self.lock();
        let existing = distributions.get_mut(id).ok_or_else(|| Self::missing(id))?;
        existing.spec = spec.clone();
        Ok(DistributionInfo {
            id: id.to_string(),
            domain_name: existing.domain_name.clone(),
        })
    }

    async fn create_invalidation(&self, id: &str, paths: &[String]) -> Result<String, Error> {
        if take_failure(&self.reject_invalidations) {
            return Err(Error::backend(
                BACKEND,
                BackendErrorKind::Rejected,
                "TooManyInvalidationsInProgress",
            ));
        }
        if !self.lock().contains_key(id) {
            return Err(Self::missing(id));
        }

        let mut invalidations = self
            .invalidations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        invalidations.push((id.to_string(), paths.to_vec()));
        Ok(format!("IMEM{:08X}", invalidations.len()))
    }

    async fn delete_distribution(&self, id: &str) -> Result<(), Error> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Self::missing(id))
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}
