//! Infrastructure implementations for node provisioning.
//!
//! An infrastructure turns an infrastructure-specific provisioning action
//! (spawn a process, shell into a host) into tracked deploying nodes. All
//! implementations share one [`InfrastructureManager`] per node source and
//! are held through the [`Infrastructure`] trait, never a concrete type.

mod local;
mod ssh;

pub use local::LocalInfrastructure;
pub use ssh::SshInfrastructure;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::config::ManagerConfig;
use crate::error::{InfraError, InfraResult};
use crate::manager::InfrastructureManager;
use crate::node::{DeployingNode, NodeUrl};
use crate::schema::{ParameterSchema, Parameters};

/// Counter variable used by infrastructures that issue sequential node
/// names; persisted so names stay unique across restarts.
pub(crate) const NODE_INDEX_VAR: &str = "node_index";

/// Issue the next node index from the persisted variable store.
pub(crate) async fn next_node_index(manager: &InfrastructureManager) -> InfraResult<u64> {
    manager
        .set_persisted_variable(|values| {
            let index = values
                .get(NODE_INDEX_VAR)
                .and_then(Value::as_u64)
                .unwrap_or(0);
            values.insert(NODE_INDEX_VAR.to_owned(), Value::from(index + 1));
            Ok(index + 1)
        })
        .await
}

/// Capability set of an infrastructure manager variant.
///
/// Concrete provisioning strategies implement the full interface; the node
/// source holds one instance through this trait.
#[async_trait]
pub trait Infrastructure: Send + Sync {
    /// Registry identity of this infrastructure (e.g. `"local"`).
    fn kind(&self) -> &'static str;

    /// Human-readable description.
    fn description(&self) -> String;

    /// The parameter declarations of this instance.
    fn schema(&self) -> &ParameterSchema;

    /// The shared manager owning the tracker and variable store.
    fn manager(&self) -> &InfrastructureManager;

    /// One-time setup while the owning node source is still registering.
    ///
    /// Must not attempt durable persistence; the manager's bootstrap latch
    /// catches and suppresses any attempt so registration is never blocked.
    async fn configure(&self, params: &Parameters) -> InfraResult<()>;

    /// Runtime update restricted to dynamic-tagged parameters.
    ///
    /// A static-tagged name fails the whole call with no partial effect.
    /// On success the infrastructure variables are persisted.
    async fn reconfigure(&self, params: &Parameters) -> InfraResult<()>;

    /// Provision one node. Each successful attempt registers a deploying
    /// node with the manager; failures surface to the caller and are not
    /// retried here.
    async fn acquire_node(&self) -> InfraResult<()>;

    /// Provision nodes up to this infrastructure's capacity.
    async fn acquire_all_nodes(&self) -> InfraResult<()>;

    /// Release infrastructure resources for a node. Best-effort: failures
    /// are logged and never escalate past this call.
    async fn remove_node(&self, url: &NodeUrl) -> InfraResult<()>;

    /// A previously deploying or lost node completed registration.
    ///
    /// Idempotent; returns the node dropped from the tracker, if any, so
    /// the node source can take ownership.
    async fn notify_acquired_node(&self, url: &NodeUrl) -> InfraResult<Option<DeployingNode>>;

    /// A registered node was detected unresponsive; remediate.
    async fn notify_down_node(&self, node_name: &str, url: &NodeUrl) -> InfraResult<()>;

    /// Bootstrap the persisted variable store from scratch.
    async fn initialize_persisted_variables(&self) -> InfraResult<()>;
}

/// Known infrastructure implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfrastructureType {
    /// Local process spawning.
    Local,
    /// Remote-shell launch over SSH.
    Ssh,
    /// Mock infrastructure for testing.
    Mock,
}

impl InfrastructureType {
    /// Get the type name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Ssh => "ssh",
            Self::Mock => "mock",
        }
    }
}

impl fmt::Display for InfrastructureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InfrastructureType {
    type Err = InfraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "ssh" => Ok(Self::Ssh),
            "mock" => Ok(Self::Mock),
            other => Err(InfraError::UnknownInfrastructure(other.to_owned())),
        }
    }
}

/// Create an infrastructure from its type identity.
pub fn create_infrastructure(
    infra_type: InfrastructureType,
    manager: Arc<InfrastructureManager>,
    config: &ManagerConfig,
) -> InfraResult<Box<dyn Infrastructure>> {
    let grace = std::time::Duration::from_secs(config.removal.grace_secs);

    match infra_type {
        InfrastructureType::Local => Ok(Box::new(LocalInfrastructure::new(manager, grace))),
        InfrastructureType::Ssh => Ok(Box::new(SshInfrastructure::new(manager, grace))),
        InfrastructureType::Mock => Ok(Box::new(MockInfrastructure::new(manager))),
    }
}

#[derive(Debug, Clone)]
struct MockSettings {
    label: String,
    max_nodes: u32,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            label: "mock".to_owned(),
            max_nodes: 2,
        }
    }
}

/// Mock infrastructure for testing.
///
/// Registers deploying nodes without launching anything and records removal
/// requests for inspection.
pub struct MockInfrastructure {
    manager: Arc<InfrastructureManager>,
    schema: ParameterSchema,
    settings: RwLock<MockSettings>,
    removed: RwLock<Vec<NodeUrl>>,
}

impl MockInfrastructure {
    /// Create a new mock infrastructure.
    #[must_use]
    pub fn new(manager: Arc<InfrastructureManager>) -> Self {
        let schema = ParameterSchema::builder()
            .static_param("label", "label stamped on provisioned node descriptions")
            .dynamic_param("max_nodes", "maximum number of deploying nodes")
            .build();

        Self {
            manager,
            schema,
            settings: RwLock::new(MockSettings::default()),
            removed: RwLock::new(Vec::new()),
        }
    }

    /// The current label value.
    pub fn label(&self) -> InfraResult<String> {
        Ok(self.read_settings()?.label)
    }

    /// The current node cap.
    pub fn max_nodes(&self) -> InfraResult<u32> {
        Ok(self.read_settings()?.max_nodes)
    }

    /// URLs passed to `remove_node`, in call order.
    pub fn removed_urls(&self) -> InfraResult<Vec<NodeUrl>> {
        Ok(self
            .removed
            .read()
            .map_err(|_| InfraError::internal("lock poisoned"))?
            .clone())
    }

    fn read_settings(&self) -> InfraResult<MockSettings> {
        Ok(self
            .settings
            .read()
            .map_err(|_| InfraError::internal("lock poisoned"))?
            .clone())
    }

    fn apply(&self, name: &str, value: &Value) -> InfraResult<()> {
        let mut settings = self
            .settings
            .write()
            .map_err(|_| InfraError::internal("lock poisoned"))?;

        match name {
            "label" => {
                settings.label = value
                    .as_str()
                    .ok_or_else(|| InfraError::configuration("label must be a string"))?
                    .to_owned();
            }
            "max_nodes" => {
                settings.max_nodes = serde_json::from_value(value.clone())
                    .map_err(|e| InfraError::configuration(format!("invalid max_nodes: {e}")))?;
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl Infrastructure for MockInfrastructure {
    fn kind(&self) -> &'static str {
        InfrastructureType::Mock.as_str()
    }

    fn description(&self) -> String {
        "mock infrastructure".to_owned()
    }

    fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    fn manager(&self) -> &InfrastructureManager {
        &self.manager
    }

    async fn configure(&self, params: &Parameters) -> InfraResult<()> {
        self.schema.check_configure(params)?;
        self.schema
            .apply(params, |name, value| self.apply(name, value))
    }

    async fn reconfigure(&self, params: &Parameters) -> InfraResult<()> {
        self.schema.check_reconfigure(params)?;
        self.schema
            .apply(params, |name, value| self.apply(name, value))?;
        self.manager.persist_infrastructure_variables().await;
        Ok(())
    }

    async fn acquire_node(&self) -> InfraResult<()> {
        let settings = self.read_settings()?;

        let deploying = self.manager.get_deploying_nodes_with_lock().len();
        if deploying >= settings.max_nodes as usize {
            return Err(InfraError::provisioning(format!(
                "node cap reached: {deploying} deploying, max {}",
                settings.max_nodes
            )));
        }

        let index = next_node_index(&self.manager).await?;
        let node = DeployingNode::new(
            &format!("mock-{index}"),
            self.manager.source_name().as_str(),
            "mock",
            format!("{} node #{index}", settings.label),
        );

        debug!(node_url = %node.url, "mock node deploying");
        self.manager
            .add_deploying_node_with_lock_and_persist(node.url.clone(), node)
            .await;
        Ok(())
    }

    async fn acquire_all_nodes(&self) -> InfraResult<()> {
        let max = self.read_settings()?.max_nodes as usize;
        while self.manager.get_deploying_nodes_with_lock().len() < max {
            self.acquire_node().await?;
        }
        Ok(())
    }

    async fn remove_node(&self, url: &NodeUrl) -> InfraResult<()> {
        self.removed
            .write()
            .map_err(|_| InfraError::internal("lock poisoned"))?
            .push(url.clone());
        Ok(())
    }

    async fn notify_acquired_node(&self, url: &NodeUrl) -> InfraResult<Option<DeployingNode>> {
        Ok(self.manager.notify_acquired_node(url).await)
    }

    async fn notify_down_node(&self, node_name: &str, url: &NodeUrl) -> InfraResult<()> {
        let mut node = DeployingNode::from_url(
            url.clone(),
            self.manager.source_name().as_str(),
            format!("{node_name} detected down"),
        );
        node.mark_lost();
        self.manager
            .add_lost_node_with_lock_and_persist(url.clone(), node)
            .await;
        Ok(())
    }

    async fn initialize_persisted_variables(&self) -> InfraResult<()> {
        // Runs during bootstrap, before the durable row exists; only the
        // in-memory store is touched.
        self.manager.variables().set_scoped(|values| {
            values.insert(NODE_INDEX_VAR.to_owned(), Value::from(0));
            Ok(())
        })
    }
}

impl fmt::Debug for MockInfrastructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockInfrastructure").finish_non_exhaustive()
    }
}

/// Decode a comma-separated or JSON-array host list.
pub(crate) fn decode_host_list(value: &Value) -> InfraResult<Vec<String>> {
    match value {
        Value::String(s) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(ToOwned::to_owned)
            .collect()),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(ToOwned::to_owned)
                    .ok_or_else(|| InfraError::configuration("hosts must be strings"))
            })
            .collect(),
        _ => Err(InfraError::configuration(
            "hosts must be a string or an array of strings",
        )),
    }
}
