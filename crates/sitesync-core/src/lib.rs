// # sitesync-core
//
// Core library for declaratively managed static websites.
//
// ## Architecture Overview
//
// This library reconciles a hosted static website with a local directory:
// - **Fingerprinting**: BLAKE3 digest per local file, independent of metadata
// - **Snapshot**: Fully drained listing of the storage container
// - **Diff**: Pure plan of uploads, deletes and the content-changed flag
// - **Sync**: Bounded-concurrency executor, uploads before deletes
// - **Distribution**: Create-or-update of the CDN, gated cache invalidation
// - **StaticSiteProvider**: create/diff/update/delete/read lifecycle adapter
//
// Backends sit behind the **ObjectStore** and **ContentDelivery** traits;
// the **StateStore** trait persists `SiteState` for hosts that need it.
//
// ## Design Principles
//
// 1. **Explicit state**: `SiteState` goes in and comes out of every call
// 2. **Single-shot backends**: Retry with backoff lives in the core only
// 3. **Forward-only convergence**: Partial failures record what was applied
// 4. **Library-First**: All core functionality can be used as a library

pub mod backend;
pub mod config;
pub mod diff;
pub mod distribution;
pub mod error;
pub mod fingerprint;
pub mod lifecycle;
pub mod retry;
pub mod snapshot;
pub mod state;
pub mod sync;
pub mod traits;

// Re-export core types for convenience
pub use config::{BackendConfig, DesiredSite, ProviderSettings, PruneScope, SyncSettings};
pub use diff::{DiffPlan, compute_plan};
pub use error::{BackendErrorKind, Error, PartialFailure, Result};
pub use fingerprint::{Digest, LocalFileEntry, LocalTree, fingerprint_directory};
pub use lifecycle::{DiffResult, ProviderEvent, ResourceStatus, SiteOutputs, StaticSiteProvider};
pub use retry::RetryPolicy;
pub use state::{FileStateStore, MemoryStateStore, SiteState};
pub use traits::{ContentDelivery, ObjectStore, StateStore};
