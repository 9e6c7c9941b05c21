//! Core traits for the reconciliation engine
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`ObjectStore`]: List, write and delete objects in the storage container
//! - [`ContentDelivery`]: Manage the distribution fronting the container
//! - [`StateStore`]: Persist `SiteState` between reconciliations (host side)

pub mod content_delivery;
pub mod object_store;
pub mod state_store;

pub use content_delivery::{ContentDelivery, DistributionInfo, DistributionSpec};
pub use object_store::{ObjectPage, ObjectStore, ObjectUpload, RemoteObjectEntry, WebsiteSettings};
pub use state_store::StateStore;
