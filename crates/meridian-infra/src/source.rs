//! The node source boundary.
//!
//! A node source binds one infrastructure to one selection policy and to
//! the durable [`NodeSourceData`] record. It is the only caller of the
//! infrastructure manager and the only place that constructs one.

use std::sync::Arc;

use tracing::{debug, info, warn};

use meridian_store::{NodeSourceData, NodeSourceStore, SourceName, StoreError};

use crate::config::ManagerConfig;
use crate::error::InfraResult;
use crate::infrastructure::{create_infrastructure, Infrastructure, InfrastructureType};
use crate::manager::InfrastructureManager;
use crate::node::{DeployingNode, NodeUrl};
use crate::schema::Parameters;

/// A named grouping of nodes sharing one provisioning strategy and one
/// selection policy.
///
/// The infrastructure is held through the [`Infrastructure`] trait, never a
/// concrete type. The policy identity is carried and persisted but not
/// interpreted here; node selection belongs to the scheduler.
pub struct NodeSource {
    name: SourceName,
    policy_type: String,
    policy_params: Parameters,
    infrastructure: Box<dyn Infrastructure>,
    store: Arc<dyn NodeSourceStore>,
}

impl NodeSource {
    /// Create a node source: the only entry point that constructs an
    /// infrastructure manager and drives `configure`.
    ///
    /// The manager starts with its bootstrap latch engaged, so a
    /// `configure` implementation that attempts durable persistence is
    /// caught and logged instead of failing registration. The durable row
    /// is created after `configure` succeeds; if a row already exists the
    /// node source is being recovered and, when the recovery flag allows,
    /// its persisted state is reconciled instead of discarded.
    pub async fn create(
        store: Arc<dyn NodeSourceStore>,
        config: &ManagerConfig,
        name: SourceName,
        infra_type: InfrastructureType,
        infra_params: &Parameters,
        policy_type: impl Into<String>,
        policy_params: Parameters,
    ) -> InfraResult<Self> {
        let policy_type = policy_type.into();

        let manager = Arc::new(InfrastructureManager::new(
            name.clone(),
            store.clone(),
            config.recovery.nodes_recoverable,
        ));

        let existing = store.get(&name).await?;
        if let Some(data) = &existing {
            info!(node_source = %name, "recovering node source from durable record");
            manager.recover(data);
        }

        let infrastructure = create_infrastructure(infra_type, manager.clone(), config)?;
        infrastructure.configure(infra_params).await?;

        if existing.is_none() {
            infrastructure.initialize_persisted_variables().await?;

            let data = NodeSourceData::new(
                name.clone(),
                infra_type.as_str(),
                policy_type.clone(),
                manager.variables().snapshot(),
            );
            store.insert(&data).await?;
            debug!(node_source = %name, "durable record created");
        }

        manager.finish_bootstrap();
        info!(node_source = %name, infrastructure = %infra_type, policy = %policy_type, "node source ready");

        Ok(Self {
            name,
            policy_type,
            policy_params,
            infrastructure,
            store,
        })
    }

    /// Node source name.
    #[must_use]
    pub fn name(&self) -> &SourceName {
        &self.name
    }

    /// Identity of the selection policy.
    #[must_use]
    pub fn policy_type(&self) -> &str {
        &self.policy_type
    }

    /// Parameters of the selection policy. Carried, never interpreted.
    #[must_use]
    pub fn policy_parameters(&self) -> &Parameters {
        &self.policy_params
    }

    /// The infrastructure, through its capability trait.
    #[must_use]
    pub fn infrastructure(&self) -> &dyn Infrastructure {
        self.infrastructure.as_ref()
    }

    /// The shared infrastructure manager.
    #[must_use]
    pub fn manager(&self) -> &InfrastructureManager {
        self.infrastructure.manager()
    }

    /// Whether persisted node URLs are reconciled after a restart.
    #[must_use]
    pub fn nodes_recoverable(&self) -> bool {
        self.manager().nodes_recoverable()
    }

    /// Update dynamic infrastructure parameters at runtime.
    pub async fn reconfigure(&self, params: &Parameters) -> InfraResult<()> {
        self.infrastructure.reconfigure(params).await
    }

    /// Provision one node.
    pub async fn acquire_node(&self) -> InfraResult<()> {
        self.infrastructure.acquire_node().await
    }

    /// Provision nodes up to the infrastructure's capacity.
    pub async fn acquire_all_nodes(&self) -> InfraResult<()> {
        self.infrastructure.acquire_all_nodes().await
    }

    /// A node completed registration with the platform; take ownership.
    pub async fn notify_acquired_node(&self, url: &NodeUrl) -> InfraResult<Option<DeployingNode>> {
        self.infrastructure.notify_acquired_node(url).await
    }

    /// A registered node was detected unresponsive.
    pub async fn notify_down_node(&self, node_name: &str, url: &NodeUrl) -> InfraResult<()> {
        self.infrastructure.notify_down_node(node_name, url).await
    }

    /// Release infrastructure resources for a node. Best-effort.
    pub async fn remove_node(&self, url: &NodeUrl) -> InfraResult<()> {
        self.infrastructure.remove_node(url).await
    }

    /// Remove the node source: release all tracked nodes best-effort and
    /// delete the durable record. The variable store dies with the manager.
    pub async fn remove(self) -> InfraResult<()> {
        let manager = self.infrastructure.manager();

        let urls: std::collections::HashSet<NodeUrl> = manager
            .get_deploying_nodes_with_lock()
            .into_iter()
            .chain(manager.get_lost_nodes_with_lock())
            .map(|node| node.url)
            .collect();

        for url in urls {
            if let Err(e) = self.infrastructure.remove_node(&url).await {
                warn!(node_url = %url, error = %e, "failed to release node during removal");
            }
        }

        match self.store.remove(&self.name).await {
            Ok(()) => info!(node_source = %self.name, "node source removed"),
            Err(StoreError::NodeSourceNotFound(_)) => {
                debug!(node_source = %self.name, "no durable record to remove");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }
}

impl std::fmt::Debug for NodeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSource")
            .field("name", &self.name)
            .field("policy_type", &self.policy_type)
            .finish_non_exhaustive()
    }
}
