//! Durable node-source records for the Meridian resource manager.
//!
//! A node source is a named grouping of compute nodes sharing one
//! provisioning strategy and one selection policy. This crate holds the one
//! row the resource manager persists per node source: the infrastructure and
//! policy identities, the infrastructure's durable variable map, and the
//! deploying/lost node URL sets used for crash recovery.
//!
//! Two backends are provided: [`MemoryStore`] for testing and
//! [`PostgresStore`] for production. Both implement [`NodeSourceStore`].
//!
//! Absence of a row is not an error anywhere in this API: a node source that
//! is still being constructed legitimately has no row yet.

#![forbid(unsafe_code)]

mod error;
mod memory;
mod postgres;
mod traits;
mod types;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use traits::NodeSourceStore;
pub use types::{NodeSourceData, SourceName};
