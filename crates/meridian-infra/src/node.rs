//! Deploying-node types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique URL of a node within one tracker instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeUrl(String);

impl NodeUrl {
    /// Create a node URL from its string form.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// Derive the URL for a deploying node of a given source.
    #[must_use]
    pub fn deploying(source: &str, node_name: &str) -> Self {
        Self(format!("deploying://{source}/{node_name}"))
    }

    /// Get the URL as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NodeUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeUrl {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

/// A node that has been asked for but has not completed registration, or
/// whose registration has been lost.
///
/// A node with `lost == true` is stored only in the tracker's lost map,
/// `lost == false` only in the deploying map. The same URL string may appear
/// as a key in both maps at once (a stale lost entry plus a fresh redeploy)
/// until reconciled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployingNode {
    /// Unique node URL.
    pub url: NodeUrl,
    /// Name of the owning node source. Display and logging only.
    pub node_source: String,
    /// Opaque description of how the node was launched.
    pub provisioning_command: String,
    /// Human-readable description.
    pub description: String,
    /// When the node was requested.
    pub created_at: DateTime<Utc>,
    /// Whether registration for this node has been lost.
    pub lost: bool,
}

impl DeployingNode {
    /// Create a new deploying node. The URL is derived from the node source
    /// name and the node name.
    #[must_use]
    pub fn new(
        node_name: &str,
        node_source: impl Into<String>,
        provisioning_command: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let node_source = node_source.into();
        Self {
            url: NodeUrl::deploying(&node_source, node_name),
            node_source,
            provisioning_command: provisioning_command.into(),
            description: description.into(),
            created_at: Utc::now(),
            lost: false,
        }
    }

    /// Create a node from an already-known URL, as happens when remediating
    /// a down node or reconciling persisted URL sets after a restart.
    #[must_use]
    pub fn from_url(
        url: NodeUrl,
        node_source: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            url,
            node_source: node_source.into(),
            provisioning_command: String::new(),
            description: description.into(),
            created_at: Utc::now(),
            lost: false,
        }
    }

    /// Recreate a node from a persisted URL after a restart.
    #[must_use]
    pub fn recovered(url: NodeUrl, node_source: impl Into<String>) -> Self {
        Self::from_url(url, node_source, "recovered from persisted state")
    }

    /// Mark this node as lost.
    pub fn mark_lost(&mut self) {
        self.lost = true;
    }

    /// Returns true if registration for this node has been lost.
    #[must_use]
    pub const fn is_lost(&self) -> bool {
        self.lost
    }
}
