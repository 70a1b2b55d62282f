//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use meridian_infra::{DeployingNode, InfrastructureManager};
use meridian_store::{MemoryStore, NodeSourceData, NodeSourceStore, SourceName};

/// Name used by every fixture node source.
pub const SOURCE: &str = "pool";

/// A manager past its bootstrap phase, backed by the given store.
pub fn manager(store: &Arc<MemoryStore>) -> InfrastructureManager {
    let manager = InfrastructureManager::new(
        SourceName::new(SOURCE),
        store.clone() as Arc<dyn NodeSourceStore>,
        true,
    );
    manager.finish_bootstrap();
    manager
}

/// A manager still in its bootstrap phase.
pub fn bootstrapping_manager(store: &Arc<MemoryStore>) -> InfrastructureManager {
    InfrastructureManager::new(
        SourceName::new(SOURCE),
        store.clone() as Arc<dyn NodeSourceStore>,
        true,
    )
}

/// Insert the durable row the fixture managers flush into.
pub async fn insert_row(store: &MemoryStore) -> NodeSourceData {
    let data = NodeSourceData::new(SourceName::new(SOURCE), "mock", "static", HashMap::new());
    store.insert(&data).await.expect("row insert failed");
    data
}

/// A deploying node of the fixture source.
pub fn deploying_node(name: &str, command: &str) -> DeployingNode {
    DeployingNode::new(name, SOURCE, command, "integration test node")
}

/// A lost node of the fixture source.
pub fn lost_node(name: &str, command: &str) -> DeployingNode {
    let mut node = deploying_node(name, command);
    node.mark_lost();
    node
}
