//! In-process backends
//!
//! Implement [`crate::traits::ObjectStore`] and [`crate::traits::ContentDelivery`]
//! without leaving the machine. Used for previews, the test suite and as a
//! reference of the backend contract.

pub mod memory;

pub use memory::{MemoryContentDelivery, MemoryObjectStore, StoredObject};
