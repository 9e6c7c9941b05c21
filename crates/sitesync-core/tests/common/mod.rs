//! Fixtures and common utilities for contract tests
//!
//! Every test gets its own site directory and in-memory backends, with a
//! zero-delay retry policy so nothing sleeps.

#![allow(dead_code)]

use sitesync_core::backend::{MemoryContentDelivery, MemoryObjectStore};
use sitesync_core::traits::{ContentDelivery, ObjectStore};
use sitesync_core::{
    DesiredSite, Digest, ProviderEvent, ProviderSettings, RetryPolicy, StaticSiteProvider,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// A local site directory that tests can edit between reconciliations
pub struct SiteDir {
    dir: TempDir,
}

impl SiteDir {
    /// Create a directory holding the given files
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let site = Self {
            dir: tempfile::tempdir().expect("tempdir"),
        };
        for (key, content) in files {
            site.write(key, content);
        }
        site
    }

    /// Root path
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write (or overwrite) a file, creating parent directories
    pub fn write(&self, key: &str, content: &str) {
        let path = self.dir.path().join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, content).expect("write file");
    }

    /// Remove a file
    pub fn remove(&self, key: &str) {
        fs::remove_file(self.dir.path().join(key)).expect("remove file");
    }

    /// Declared inputs for this directory
    pub fn desired(&self) -> DesiredSite {
        DesiredSite::new(PathBuf::from(self.dir.path()))
    }
}

/// Digest of a string, as the fingerprinting computes it for file contents
pub fn digest(content: &str) -> Digest {
    Digest::of_bytes(content.as_bytes())
}

/// Key → digest map for expected state
pub fn hashes(files: &[(&str, &str)]) -> BTreeMap<String, Digest> {
    files
        .iter()
        .map(|(key, content)| (key.to_string(), digest(content)))
        .collect()
}

/// Provider settings with retries that never sleep
pub fn test_settings() -> ProviderSettings {
    ProviderSettings {
        retry: RetryPolicy::immediate(3),
        ..ProviderSettings::default()
    }
}

/// Provider wired to in-memory backends the test can inspect
pub struct Harness {
    pub store: Arc<MemoryObjectStore>,
    pub cdn: Arc<MemoryContentDelivery>,
    pub provider: StaticSiteProvider,
    pub events: mpsc::Receiver<ProviderEvent>,
}

impl Harness {
    /// Harness with default memory backends
    pub fn new() -> Self {
        Self::with(MemoryObjectStore::new(), test_settings())
    }

    /// Harness around a configured store and settings
    pub fn with(store: MemoryObjectStore, settings: ProviderSettings) -> Self {
        let store = Arc::new(store);
        let cdn = Arc::new(MemoryContentDelivery::new());
        let (provider, events) = StaticSiteProvider::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            Arc::clone(&cdn) as Arc<dyn ContentDelivery>,
            settings,
        )
        .expect("provider construction succeeds");

        Self {
            store,
            cdn,
            provider,
            events,
        }
    }

    /// Drain all events emitted so far
    pub fn drain_events(&mut self) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// The last plan event, as (uploads, deletes, content_changed)
    pub fn last_plan(&mut self) -> Option<(usize, usize, bool)> {
        self.drain_events()
            .into_iter()
            .filter_map(|event| match event {
                ProviderEvent::PlanComputed {
                    uploads,
                    deletes,
                    content_changed,
                    ..
                } => Some((uploads, deletes, content_changed)),
                _ => None,
            })
            .last()
    }
}
