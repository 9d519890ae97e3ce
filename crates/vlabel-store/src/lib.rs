//! Relational datastore boundary for the VLabel core.
//!
//! The relational schema itself lives outside the core; this crate defines
//! the transactional CRUD surface the core consumes (`Datastore`) together
//! with an in-process implementation (`MemoryStore`) used by tests and
//! single-node deployments. The core never bypasses this boundary to touch
//! row storage directly.

pub mod datastore;
pub mod error;
pub mod memory;

pub use datastore::{Datastore, LabelCount};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
