//! Local process-spawning infrastructure.

use std::collections::HashMap;
use std::fmt;
use std::process::Stdio;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{InfraError, InfraResult};
use crate::infrastructure::{next_node_index, Infrastructure, InfrastructureType};
use crate::manager::InfrastructureManager;
use crate::node::{DeployingNode, NodeUrl};
use crate::schema::{ParameterSchema, Parameters};

#[derive(Debug, Clone)]
struct LocalSettings {
    command_template: String,
    max_nodes: u32,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            command_template: String::new(),
            max_nodes: 4,
        }
    }
}

/// Infrastructure that launches worker nodes as local processes.
///
/// The provisioning command is a whitespace-split template; `{url}` and
/// `{name}` placeholders are substituted per node.
pub struct LocalInfrastructure {
    manager: Arc<InfrastructureManager>,
    schema: ParameterSchema,
    settings: RwLock<LocalSettings>,
    children: tokio::sync::Mutex<HashMap<NodeUrl, Child>>,
    grace: Duration,
}

impl LocalInfrastructure {
    /// Create a new local infrastructure.
    #[must_use]
    pub fn new(manager: Arc<InfrastructureManager>, grace: Duration) -> Self {
        let schema = ParameterSchema::builder()
            .static_param(
                "command_template",
                "command launching one worker process; {url} and {name} are substituted",
            )
            .dynamic_param("max_nodes", "maximum number of tracked worker processes")
            .build();

        Self {
            manager,
            schema,
            settings: RwLock::new(LocalSettings::default()),
            children: tokio::sync::Mutex::new(HashMap::new()),
            grace,
        }
    }

    fn read_settings(&self) -> InfraResult<LocalSettings> {
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
            "command_template" => {
                settings.command_template = value
                    .as_str()
                    .ok_or_else(|| {
                        InfraError::configuration("command_template must be a string")
                    })?
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

    fn render_command(template: &str, node: &DeployingNode, node_name: &str) -> Vec<String> {
        template
            .split_whitespace()
            .map(|part| {
                part.replace("{url}", node.url.as_str())
                    .replace("{name}", node_name)
            })
            .collect()
    }

    /// Spawn the worker process. Runs outside any tracker lock.
    fn spawn_worker(command: &[String]) -> InfraResult<Child> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| InfraError::configuration("command_template is empty"))?;

        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| InfraError::provisioning(format!("failed to spawn {program}: {e}")))
    }

    async fn kill_with_grace(&self, url: &NodeUrl, mut child: Child) {
        if let Err(e) = child.start_kill() {
            warn!(node_url = %url, error = %e, "failed to signal worker process");
            return;
        }

        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(Ok(status)) => debug!(node_url = %url, %status, "worker process exited"),
            Ok(Err(e)) => warn!(node_url = %url, error = %e, "failed to reap worker process"),
            Err(_) => warn!(
                node_url = %url,
                grace = ?self.grace,
                "worker process did not exit within grace delay"
            ),
        }
    }
}

#[async_trait]
impl Infrastructure for LocalInfrastructure {
    fn kind(&self) -> &'static str {
        InfrastructureType::Local.as_str()
    }

    fn description(&self) -> String {
        "launches worker nodes as local processes".to_owned()
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
            .apply(params, |name, value| self.apply(name, value))?;

        if self.read_settings()?.command_template.is_empty() {
            return Err(InfraError::configuration(
                "command_template is required for the local infrastructure",
            ));
        }
        Ok(())
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

        {
            let children = self.children.lock().await;
            if children.len() >= settings.max_nodes as usize {
                return Err(InfraError::provisioning(format!(
                    "node cap reached: {} running, max {}",
                    children.len(),
                    settings.max_nodes
                )));
            }
        }

        let index = next_node_index(&self.manager).await?;
        let node_name = format!("local-{index}");
        let mut node = DeployingNode::new(
            &node_name,
            self.manager.source_name().as_str(),
            &settings.command_template,
            "local process worker",
        );

        let command = Self::render_command(&settings.command_template, &node, &node_name);
        node.provisioning_command = command.join(" ");

        // The spawn happens outside any lock; a failed attempt never touches
        // the tracker.
        let child = Self::spawn_worker(&command)?;

        info!(node_url = %node.url, command = %node.provisioning_command, "worker process spawned");

        self.children.lock().await.insert(node.url.clone(), child);
        self.manager
            .add_deploying_node_with_lock_and_persist(node.url.clone(), node)
            .await;
        Ok(())
    }

    async fn acquire_all_nodes(&self) -> InfraResult<()> {
        loop {
            let max = self.read_settings()?.max_nodes as usize;
            if self.children.lock().await.len() >= max {
                return Ok(());
            }
            self.acquire_node().await?;
        }
    }

    async fn remove_node(&self, url: &NodeUrl) -> InfraResult<()> {
        let child = self.children.lock().await.remove(url);

        match child {
            Some(child) => {
                info!(node_url = %url, "removing worker process");
                self.kill_with_grace(url, child).await;
            }
            None => debug!(node_url = %url, "no worker process for node, nothing to remove"),
        }
        Ok(())
    }

    async fn notify_acquired_node(&self, url: &NodeUrl) -> InfraResult<Option<DeployingNode>> {
        Ok(self.manager.notify_acquired_node(url).await)
    }

    async fn notify_down_node(&self, node_name: &str, url: &NodeUrl) -> InfraResult<()> {
        info!(node = %node_name, node_url = %url, "node down, marking lost for redeploy");

        if let Some(child) = self.children.lock().await.remove(url) {
            self.kill_with_grace(url, child).await;
        }

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
        self.manager.variables().set_scoped(|values| {
            values.insert(super::NODE_INDEX_VAR.to_owned(), Value::from(0));
            Ok(())
        })
    }
}

impl fmt::Debug for LocalInfrastructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalInfrastructure")
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}
