//! Meridian infrastructure managers.
//!
//! This crate is the core of the Meridian resource manager: it turns
//! infrastructure-specific provisioning actions (spawn a process, shell
//! into a host) into tracked nodes with a well-defined lifecycle.
//!
//! # Architecture
//!
//! The crate is organised around four pieces:
//!
//! - **Node tracker**: two URL-keyed maps (deploying, lost) plus their
//!   persisted-URL mirrors, guarded as one resource so cross-map
//!   precedence checks are always consistent
//! - **Variable store**: arbitrary named values an infrastructure keeps
//!   durable across restarts, mutated under an exclusive scope
//! - **Infrastructure manager**: the composition root owning both, plus
//!   the write-through persistence glue and crash recovery
//! - **Infrastructures**: concrete provisioning strategies behind the
//!   [`Infrastructure`] trait, owned by a [`NodeSource`]
//!
//! # Node lifecycle
//!
//! ```text
//! acquire ──▶ deploying ──▶ registered (acquired, leaves the tracker)
//!                │                    │
//!                ▼                    ▼
//!              lost ◀───────── detected down
//! ```
//!
//! A lost node is retained for operator visibility and reconciliation: a
//! redeploy under the same URL shadows the stale lost entry until one of
//! them registers.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use meridian_infra::{
//!     InfrastructureType, ManagerConfig, NodeSource, Parameters,
//! };
//! use meridian_store::{MemoryStore, SourceName};
//!
//! let store = Arc::new(MemoryStore::new());
//! let config = ManagerConfig::default();
//!
//! let source = NodeSource::create(
//!     store,
//!     &config,
//!     SourceName::new("compute-pool"),
//!     InfrastructureType::Local,
//!     &Parameters::new()
//!         .with("command_template", "worker --url {url}")
//!         .with("max_nodes", 8),
//!     "static",
//!     Parameters::new(),
//! )
//! .await?;
//!
//! source.acquire_node().await?;
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod infrastructure;
pub mod manager;
pub mod node;
pub mod schema;
pub mod source;
pub mod tracker;
pub mod variables;

// Re-export commonly used types at the crate root
pub use config::{DatabaseConfig, ManagerConfig, RecoveryConfig, RemovalConfig};
pub use error::{InfraError, InfraResult};
pub use infrastructure::{
    create_infrastructure, Infrastructure, InfrastructureType, LocalInfrastructure,
    MockInfrastructure, SshInfrastructure,
};
pub use manager::InfrastructureManager;
pub use node::{DeployingNode, NodeUrl};
pub use schema::{ParameterKind, ParameterSchema, ParameterSpec, Parameters};
pub use source::NodeSource;
pub use tracker::NodeTracker;
pub use variables::InfraVariables;
