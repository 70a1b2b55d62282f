//! The infrastructure manager composition root.
//!
//! Owns the node tracker and the persisted variable store for one node
//! source, and orchestrates durable persistence around them. In-memory
//! mutations happen under the tracker guard; the durable write is ordered
//! after the corresponding in-memory change, runs outside that guard, and
//! is never retried on failure — in-memory state is authoritative until the
//! next successful flush.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use meridian_store::{NodeSourceData, NodeSourceStore, SourceName};

use crate::error::InfraResult;
use crate::node::{DeployingNode, NodeUrl};
use crate::tracker::NodeTracker;
use crate::variables::InfraVariables;

/// Shared state and persistence glue for one infrastructure instance.
///
/// Concrete infrastructures hold one of these and delegate all node
/// bookkeeping to it; the node source owns the infrastructure for its
/// lifetime.
pub struct InfrastructureManager {
    source_name: SourceName,
    store: Arc<dyn NodeSourceStore>,
    tracker: NodeTracker,
    variables: InfraVariables,
    nodes_recoverable: bool,
    /// True while the owning node source is still being registered. Durable
    /// writes are suppressed until the latch is lifted.
    bootstrapping: AtomicBool,
    /// Serialises flushes so a later snapshot cannot be overwritten by an
    /// earlier in-flight one.
    persist_gate: tokio::sync::Mutex<()>,
}

impl InfrastructureManager {
    /// Create a manager for a node source that is being registered.
    ///
    /// The bootstrap latch starts engaged; call [`finish_bootstrap`] once
    /// the durable row exists.
    ///
    /// [`finish_bootstrap`]: InfrastructureManager::finish_bootstrap
    #[must_use]
    pub fn new(
        source_name: SourceName,
        store: Arc<dyn NodeSourceStore>,
        nodes_recoverable: bool,
    ) -> Self {
        Self {
            source_name,
            store,
            tracker: NodeTracker::new(),
            variables: InfraVariables::new(),
            nodes_recoverable,
            bootstrapping: AtomicBool::new(true),
            persist_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Name of the owning node source.
    #[must_use]
    pub fn source_name(&self) -> &SourceName {
        &self.source_name
    }

    /// Whether persisted node URLs are reconciled after a restart.
    #[must_use]
    pub const fn nodes_recoverable(&self) -> bool {
        self.nodes_recoverable
    }

    /// The persisted variable store.
    #[must_use]
    pub fn variables(&self) -> &InfraVariables {
        &self.variables
    }

    /// Lift the bootstrap latch; durable writes are allowed from here on.
    pub fn finish_bootstrap(&self) {
        self.bootstrapping.store(false, Ordering::SeqCst);
    }

    /// Returns true while the owning node source is still being registered.
    #[must_use]
    pub fn is_bootstrapping(&self) -> bool {
        self.bootstrapping.load(Ordering::SeqCst)
    }

    // ---- tracker orchestration ------------------------------------------

    /// Register a deploying node and flush the persisted URL sets.
    pub async fn add_deploying_node_with_lock_and_persist(
        &self,
        url: NodeUrl,
        node: DeployingNode,
    ) {
        self.tracker.add_deploying(url, node);
        self.persist_infrastructure_variables().await;
    }

    /// Register a lost node and flush the persisted URL sets.
    pub async fn add_lost_node_with_lock_and_persist(&self, url: NodeUrl, node: DeployingNode) {
        self.tracker.add_lost(url, node);
        self.persist_infrastructure_variables().await;
    }

    /// Look up a URL, deploying entries shadowing lost ones.
    #[must_use]
    pub fn get_deploying_or_lost_node(&self, url: &NodeUrl) -> Option<DeployingNode> {
        self.tracker.get_deploying_or_lost(url)
    }

    /// Replace the stored value for a node's URL in the map that currently
    /// holds it, deploying map first. See [`NodeTracker::update`].
    pub fn update(&self, node: DeployingNode) -> Option<DeployingNode> {
        self.tracker.update(node)
    }

    /// Snapshot of the deploying nodes.
    #[must_use]
    pub fn get_deploying_nodes_with_lock(&self) -> Vec<DeployingNode> {
        self.tracker.deploying_nodes()
    }

    /// Snapshot of the lost nodes.
    #[must_use]
    pub fn get_lost_nodes_with_lock(&self) -> Vec<DeployingNode> {
        self.tracker.lost_nodes()
    }

    /// The persisted deploying-URL set.
    #[must_use]
    pub fn get_persisted_deploying_nodes_url(&self) -> Vec<NodeUrl> {
        self.tracker.deploying_urls().into_iter().collect()
    }

    /// The persisted lost-URL set.
    #[must_use]
    pub fn get_persisted_lost_nodes_url(&self) -> Vec<NodeUrl> {
        self.tracker.lost_urls().into_iter().collect()
    }

    /// A previously deploying or lost node completed registration: drop it
    /// from the tracker wherever it is found and flush.
    ///
    /// Idempotent — an unknown URL is a no-op, not an error. Returns the
    /// removed node (the deploying entry when the URL was in both maps) so
    /// the node source can take ownership.
    pub async fn notify_acquired_node(&self, url: &NodeUrl) -> Option<DeployingNode> {
        let removed = self.tracker.remove(url);
        match &removed {
            Some(node) => {
                debug!(node_url = %url, lost = node.is_lost(), "node acquired, dropped from tracker");
                self.persist_infrastructure_variables().await;
            }
            None => debug!(node_url = %url, "acquired node unknown to tracker, ignoring"),
        }
        removed
    }

    // ---- variable persistence -------------------------------------------

    /// Run a mutator against the variable store under exclusive access,
    /// then flush.
    ///
    /// A failing mutator leaves the store unchanged and nothing is flushed.
    pub async fn set_persisted_variable<R>(
        &self,
        mutator: impl FnOnce(&mut HashMap<String, Value>) -> InfraResult<R>,
    ) -> InfraResult<R> {
        let result = self.variables.set_scoped(mutator)?;
        self.persist_infrastructure_variables().await;
        Ok(result)
    }

    /// Snapshot the variable store and the tracker URL sets and write them
    /// through to the durable row — only if that row already exists.
    ///
    /// Absence of the row means the node source has not finished
    /// registering; the call silently returns without writing. During
    /// bootstrap the attempt is a programming error in the calling
    /// infrastructure: it is caught and logged here rather than propagated,
    /// so registration is never blocked by it. Store failures are logged
    /// and swallowed; the write is not retried.
    pub async fn persist_infrastructure_variables(&self) {
        if self.is_bootstrapping() {
            warn!(
                node_source = %self.source_name,
                "persistence attempted while the node source is still registering, suppressed"
            );
            return;
        }

        let _gate = self.persist_gate.lock().await;

        let row = match self.store.get(&self.source_name).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                debug!(node_source = %self.source_name, "no durable row yet, skipping flush");
                return;
            }
            Err(e) => {
                warn!(node_source = %self.source_name, error = %e, "failed to read durable row, skipping flush");
                return;
            }
        };

        let mut row = row;
        row.infrastructure_variables = self.variables.snapshot();
        row.deploying_urls = self
            .tracker
            .deploying_urls()
            .into_iter()
            .map(|u| u.as_str().to_owned())
            .collect();
        row.lost_urls = self
            .tracker
            .lost_urls()
            .into_iter()
            .map(|u| u.as_str().to_owned())
            .collect();

        match self.store.update(&row).await {
            Ok(true) => debug!(node_source = %self.source_name, "infrastructure state flushed"),
            Ok(false) => debug!(node_source = %self.source_name, "durable row vanished, flush skipped"),
            Err(e) => {
                warn!(node_source = %self.source_name, error = %e, "failed to flush infrastructure state");
            }
        }
    }

    // ---- recovery -------------------------------------------------------

    /// Reconcile persisted state from a recovered durable row.
    ///
    /// The variable store is restored as-is. When nodes are recoverable,
    /// every persisted URL is rematerialised as a *lost* entry: a node that
    /// was mid-deployment when the manager died cannot be assumed to still
    /// be coming up, and live re-registration clears the entry through
    /// [`notify_acquired_node`]. When nodes are not recoverable the URL
    /// sets are discarded.
    ///
    /// [`notify_acquired_node`]: InfrastructureManager::notify_acquired_node
    pub fn recover(&self, data: &NodeSourceData) {
        self.variables.restore(data.infrastructure_variables.clone());

        if !self.nodes_recoverable {
            debug!(
                node_source = %self.source_name,
                "nodes not recoverable, discarding persisted node URLs"
            );
            return;
        }

        for url in data.deploying_urls.iter().chain(data.lost_urls.iter()) {
            let node_url = NodeUrl::new(url.clone());
            let mut node =
                DeployingNode::recovered(node_url.clone(), self.source_name.as_str());
            node.mark_lost();
            self.tracker.add_lost(node_url, node);
        }

        debug!(
            node_source = %self.source_name,
            recovered = data.deploying_urls.len() + data.lost_urls.len(),
            "persisted node URLs rematerialised for reconciliation"
        );
    }
}

impl std::fmt::Debug for InfrastructureManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfrastructureManager")
            .field("source_name", &self.source_name)
            .field("nodes_recoverable", &self.nodes_recoverable)
            .finish_non_exhaustive()
    }
}
