//! Remote-shell infrastructure.
//!
//! Launches worker nodes by shelling into remote hosts. Each acquisition
//! picks the host with the fewest tracked workers that is still under the
//! per-host cap.

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
use crate::infrastructure::{decode_host_list, next_node_index, Infrastructure, InfrastructureType};
use crate::manager::InfrastructureManager;
use crate::node::{DeployingNode, NodeUrl};
use crate::schema::{ParameterSchema, Parameters};

#[derive(Debug, Clone, Default)]
struct SshSettings {
    hosts: Vec<String>,
    ssh_options: Vec<String>,
    command_template: String,
    max_nodes_per_host: u32,
}

struct RemoteWorker {
    host: String,
    child: Child,
}

/// Infrastructure that launches worker nodes over SSH.
pub struct SshInfrastructure {
    manager: Arc<InfrastructureManager>,
    schema: ParameterSchema,
    settings: RwLock<SshSettings>,
    workers: tokio::sync::Mutex<HashMap<NodeUrl, RemoteWorker>>,
    grace: Duration,
}

impl SshInfrastructure {
    /// Create a new SSH infrastructure.
    #[must_use]
    pub fn new(manager: Arc<InfrastructureManager>, grace: Duration) -> Self {
        let schema = ParameterSchema::builder()
            .static_param("hosts", "hosts to launch workers on")
            .static_param("ssh_options", "extra options passed to ssh")
            .static_param(
                "command_template",
                "remote command launching one worker; {url} and {name} are substituted",
            )
            .dynamic_param("max_nodes_per_host", "worker cap per host")
            .build();

        Self {
            manager,
            schema,
            settings: RwLock::new(SshSettings {
                max_nodes_per_host: 1,
                ..SshSettings::default()
            }),
            workers: tokio::sync::Mutex::new(HashMap::new()),
            grace,
        }
    }

    fn read_settings(&self) -> InfraResult<SshSettings> {
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
            "hosts" => settings.hosts = decode_host_list(value)?,
            "ssh_options" => {
                settings.ssh_options = value
                    .as_str()
                    .ok_or_else(|| InfraError::configuration("ssh_options must be a string"))?
                    .split_whitespace()
                    .map(ToOwned::to_owned)
                    .collect();
            }
            "command_template" => {
                settings.command_template = value
                    .as_str()
                    .ok_or_else(|| {
                        InfraError::configuration("command_template must be a string")
                    })?
                    .to_owned();
            }
            "max_nodes_per_host" => {
                settings.max_nodes_per_host = serde_json::from_value(value.clone()).map_err(|e| {
                    InfraError::configuration(format!("invalid max_nodes_per_host: {e}"))
                })?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Pick the least-loaded host still under the per-host cap.
    async fn pick_host(&self, settings: &SshSettings) -> InfraResult<String> {
        let workers = self.workers.lock().await;

        let mut counts: HashMap<&str, u32> = HashMap::new();
        for worker in workers.values() {
            *counts.entry(worker.host.as_str()).or_default() += 1;
        }

        settings
            .hosts
            .iter()
            .map(|host| (host, counts.get(host.as_str()).copied().unwrap_or(0)))
            .filter(|(_, count)| *count < settings.max_nodes_per_host)
            .min_by_key(|(_, count)| *count)
            .map(|(host, _)| host.clone())
            .ok_or_else(|| {
                InfraError::provisioning(format!(
                    "all {} hosts are at the per-host cap of {}",
                    settings.hosts.len(),
                    settings.max_nodes_per_host
                ))
            })
    }

    fn spawn_remote(
        settings: &SshSettings,
        host: &str,
        node: &DeployingNode,
        node_name: &str,
    ) -> InfraResult<Child> {
        let remote_command = settings
            .command_template
            .replace("{url}", node.url.as_str())
            .replace("{name}", node_name);

        Command::new("ssh")
            .args(&settings.ssh_options)
            .arg(host)
            .arg(remote_command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| InfraError::provisioning(format!("failed to spawn ssh to {host}: {e}")))
    }

    async fn kill_with_grace(&self, url: &NodeUrl, mut worker: RemoteWorker) {
        if let Err(e) = worker.child.start_kill() {
            warn!(node_url = %url, host = %worker.host, error = %e, "failed to signal ssh session");
            return;
        }

        match tokio::time::timeout(self.grace, worker.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(node_url = %url, host = %worker.host, %status, "ssh session exited");
            }
            Ok(Err(e)) => warn!(node_url = %url, error = %e, "failed to reap ssh session"),
            Err(_) => warn!(
                node_url = %url,
                grace = ?self.grace,
                "ssh session did not exit within grace delay"
            ),
        }
    }

    fn total_capacity(settings: &SshSettings) -> usize {
        settings.hosts.len() * settings.max_nodes_per_host as usize
    }
}

#[async_trait]
impl Infrastructure for SshInfrastructure {
    fn kind(&self) -> &'static str {
        InfrastructureType::Ssh.as_str()
    }

    fn description(&self) -> String {
        "launches worker nodes over SSH".to_owned()
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

        let settings = self.read_settings()?;
        if settings.hosts.is_empty() {
            return Err(InfraError::configuration(
                "at least one host is required for the ssh infrastructure",
            ));
        }
        if settings.command_template.is_empty() {
            return Err(InfraError::configuration(
                "command_template is required for the ssh infrastructure",
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
        let host = self.pick_host(&settings).await?;

        let index = next_node_index(&self.manager).await?;
        let node_name = format!("ssh-{index}");
        let mut node = DeployingNode::new(
            &node_name,
            self.manager.source_name().as_str(),
            &settings.command_template,
            format!("remote worker on {host}"),
        );

        // The spawn happens outside any lock; a failed attempt never touches
        // the tracker.
        let child = Self::spawn_remote(&settings, &host, &node, &node_name)?;
        node.provisioning_command = format!("ssh {host} {}", settings.command_template);

        info!(node_url = %node.url, host = %host, "remote worker launched");

        self.workers
            .lock()
            .await
            .insert(node.url.clone(), RemoteWorker { host, child });
        self.manager
            .add_deploying_node_with_lock_and_persist(node.url.clone(), node)
            .await;
        Ok(())
    }

    async fn acquire_all_nodes(&self) -> InfraResult<()> {
        loop {
            let settings = self.read_settings()?;
            if self.workers.lock().await.len() >= Self::total_capacity(&settings) {
                return Ok(());
            }
            self.acquire_node().await?;
        }
    }

    async fn remove_node(&self, url: &NodeUrl) -> InfraResult<()> {
        let worker = self.workers.lock().await.remove(url);

        match worker {
            Some(worker) => {
                info!(node_url = %url, host = %worker.host, "removing remote worker");
                self.kill_with_grace(url, worker).await;
            }
            None => debug!(node_url = %url, "no ssh session for node, nothing to remove"),
        }
        Ok(())
    }

    async fn notify_acquired_node(&self, url: &NodeUrl) -> InfraResult<Option<DeployingNode>> {
        Ok(self.manager.notify_acquired_node(url).await)
    }

    async fn notify_down_node(&self, node_name: &str, url: &NodeUrl) -> InfraResult<()> {
        info!(node = %node_name, node_url = %url, "node down, marking lost for redeploy");

        if let Some(worker) = self.workers.lock().await.remove(url) {
            self.kill_with_grace(url, worker).await;
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

impl fmt::Debug for SshInfrastructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshInfrastructure")
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}
