//! Tracker bookkeeping through the infrastructure manager.
//!
//! These tests pin the conflict-resolution contract between the deploying
//! and lost maps: deploying entries shadow lost ones on lookup, and the
//! same precedence chooses the replacement target on update.

mod common;

use std::sync::Arc;

use serde_json::Value;

use common::{bootstrapping_manager, deploying_node, insert_row, lost_node, manager};
use meridian_infra::NodeUrl;
use meridian_store::{MemoryStore, NodeSourceStore};

#[tokio::test]
async fn fresh_manager_knows_no_nodes() {
    let store = Arc::new(MemoryStore::new());
    let manager = manager(&store);

    assert!(manager.get_deploying_nodes_with_lock().is_empty());
    assert!(manager.get_persisted_deploying_nodes_url().is_empty());
    assert!(manager.get_lost_nodes_with_lock().is_empty());
    assert!(manager.get_persisted_lost_nodes_url().is_empty());

    let url = NodeUrl::deploying(common::SOURCE, "anywhere");
    assert!(manager.get_deploying_or_lost_node(&url).is_none());
}

#[tokio::test]
async fn added_deploying_node_is_found_and_persisted() {
    let store = Arc::new(MemoryStore::new());
    let row = insert_row(&store).await;
    let manager = manager(&store);

    let node = deploying_node("n1", "command");
    manager
        .add_deploying_node_with_lock_and_persist(node.url.clone(), node.clone())
        .await;

    assert_eq!(manager.get_deploying_nodes_with_lock().len(), 1);
    assert_eq!(manager.get_persisted_deploying_nodes_url().len(), 1);
    assert!(manager.get_lost_nodes_with_lock().is_empty());
    assert!(manager.get_persisted_lost_nodes_url().is_empty());

    let found = manager
        .get_deploying_or_lost_node(&node.url)
        .expect("node should be known");
    assert_eq!(found.url, node.url);
    assert_eq!(found.provisioning_command, "command");

    // The durable mirror followed the in-memory change.
    let stored = store.get(&row.name).await.unwrap().unwrap();
    assert_eq!(stored.deploying_urls, vec![node.url.as_str().to_owned()]);
}

#[tokio::test]
async fn lost_node_with_distinct_url_is_found() {
    let store = Arc::new(MemoryStore::new());
    let manager = manager(&store);

    let deploying = deploying_node("deploying", "command");
    manager
        .add_deploying_node_with_lock_and_persist(deploying.url.clone(), deploying.clone())
        .await;
    let lost = lost_node("lost", "command");
    manager
        .add_lost_node_with_lock_and_persist(lost.url.clone(), lost.clone())
        .await;

    assert_eq!(manager.get_deploying_nodes_with_lock().len(), 1);
    assert_eq!(manager.get_persisted_deploying_nodes_url().len(), 1);
    assert_eq!(manager.get_lost_nodes_with_lock().len(), 1);
    assert_eq!(manager.get_persisted_lost_nodes_url().len(), 1);

    let found = manager.get_deploying_or_lost_node(&lost.url).unwrap();
    assert!(found.is_lost());
    assert_eq!(found.url, lost.url);

    let found = manager.get_deploying_or_lost_node(&deploying.url).unwrap();
    assert!(!found.is_lost());
    assert_eq!(found.url, deploying.url);
}

#[tokio::test]
async fn deploying_entry_shadows_lost_entry_on_conflicting_url() {
    let store = Arc::new(MemoryStore::new());
    let manager = manager(&store);

    // Same node name on both sides: an old lost entry plus a fresh
    // redeploy under the same URL.
    let deploying = deploying_node("deploying", "fresh");
    manager
        .add_deploying_node_with_lock_and_persist(deploying.url.clone(), deploying.clone())
        .await;
    let lost = lost_node("deploying", "stale");
    manager
        .add_lost_node_with_lock_and_persist(lost.url.clone(), lost.clone())
        .await;

    assert_eq!(manager.get_deploying_nodes_with_lock().len(), 1);
    assert_eq!(manager.get_lost_nodes_with_lock().len(), 1);

    let found = manager.get_deploying_or_lost_node(&lost.url).unwrap();
    assert!(!found.is_lost());
    assert_eq!(found.provisioning_command, "fresh");
}

#[tokio::test]
async fn update_of_unknown_node_changes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let manager = manager(&store);

    let previous = manager.update(deploying_node("unknown", "command"));

    assert!(previous.is_none());
    assert!(manager.get_deploying_nodes_with_lock().is_empty());
    assert!(manager.get_persisted_deploying_nodes_url().is_empty());
    assert!(manager.get_lost_nodes_with_lock().is_empty());
    assert!(manager.get_persisted_lost_nodes_url().is_empty());
}

#[tokio::test]
async fn update_replaces_known_deploying_node() {
    let store = Arc::new(MemoryStore::new());
    let manager = manager(&store);

    let original = deploying_node("deploying", "command");
    manager
        .add_deploying_node_with_lock_and_persist(original.url.clone(), original.clone())
        .await;

    let previous = manager
        .update(deploying_node("deploying", "command2"))
        .expect("previous value expected");

    assert_eq!(previous.provisioning_command, "command");
    assert_eq!(manager.get_deploying_nodes_with_lock().len(), 1);
    assert_eq!(manager.get_persisted_deploying_nodes_url().len(), 1);
    assert_eq!(
        manager.get_deploying_nodes_with_lock()[0].provisioning_command,
        "command2"
    );
}

#[tokio::test]
async fn update_replaces_known_lost_node() {
    let store = Arc::new(MemoryStore::new());
    let manager = manager(&store);

    let deploying = deploying_node("deploying", "command");
    manager
        .add_deploying_node_with_lock_and_persist(deploying.url.clone(), deploying)
        .await;
    let lost = lost_node("lost", "command");
    manager
        .add_lost_node_with_lock_and_persist(lost.url.clone(), lost.clone())
        .await;

    let previous = manager
        .update(lost_node("lost", "command2"))
        .expect("previous value expected");

    assert!(previous.is_lost());
    assert_eq!(previous.provisioning_command, "command");
    assert_eq!(manager.get_deploying_nodes_with_lock().len(), 1);
    assert_eq!(manager.get_lost_nodes_with_lock().len(), 1);
    assert_eq!(
        manager.get_lost_nodes_with_lock()[0].provisioning_command,
        "command2"
    );
    assert!(manager
        .get_persisted_lost_nodes_url()
        .contains(&lost.url));
}

#[tokio::test]
async fn update_on_conflicting_url_replaces_only_the_deploying_entry() {
    let store = Arc::new(MemoryStore::new());
    let manager = manager(&store);

    let deploying = deploying_node("deploying", "fresh");
    manager
        .add_deploying_node_with_lock_and_persist(deploying.url.clone(), deploying.clone())
        .await;
    let lost = lost_node("deploying", "stale");
    manager
        .add_lost_node_with_lock_and_persist(lost.url.clone(), lost.clone())
        .await;

    let replacement = lost_node("deploying", "replacement");
    let previous = manager.update(replacement).expect("previous value expected");

    // The deploying entry was replaced, never the lost one.
    assert!(!previous.is_lost());
    assert_eq!(previous.provisioning_command, "fresh");

    assert_eq!(manager.get_deploying_nodes_with_lock().len(), 1);
    assert_eq!(manager.get_lost_nodes_with_lock().len(), 1);
    assert_eq!(
        manager.get_lost_nodes_with_lock()[0].provisioning_command,
        "stale"
    );
    assert!(manager.get_persisted_lost_nodes_url().contains(&lost.url));
    assert_eq!(manager.get_persisted_lost_nodes_url().len(), 1);
}

#[tokio::test]
async fn variables_persist_only_when_the_row_exists() {
    let store = Arc::new(MemoryStore::new());
    let row = insert_row(&store).await;
    let manager = manager(&store);

    manager
        .set_persisted_variable(|values| {
            values.insert("issued".to_owned(), Value::from(41));
            Ok(())
        })
        .await
        .unwrap();

    let stored = store.get(&row.name).await.unwrap().unwrap();
    assert_eq!(
        stored.infrastructure_variables.get("issued"),
        Some(&Value::from(41))
    );
}

#[tokio::test]
async fn variables_do_not_persist_without_a_row() {
    let store = Arc::new(MemoryStore::new());
    let manager = manager(&store);

    manager
        .set_persisted_variable(|values| {
            values.insert("issued".to_owned(), Value::from(41));
            Ok(())
        })
        .await
        .unwrap();

    // In-memory state is authoritative; nothing was written anywhere.
    assert_eq!(manager.variables().get("issued"), Some(Value::from(41)));
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn bootstrap_persistence_attempt_is_suppressed() {
    let store = Arc::new(MemoryStore::new());
    let row = insert_row(&store).await;
    let manager = bootstrapping_manager(&store);

    manager
        .set_persisted_variable(|values| {
            values.insert("too-early".to_owned(), Value::from(true));
            Ok(())
        })
        .await
        .unwrap();

    let stored = store.get(&row.name).await.unwrap().unwrap();
    assert!(stored.infrastructure_variables.is_empty());
}
