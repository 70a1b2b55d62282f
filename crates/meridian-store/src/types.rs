//! Core types for meridian-store.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique name of a node source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceName(String);

impl SourceName {
    /// Create a new source name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SourceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SourceName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// The durable record kept for one node source.
///
/// The infrastructure manager is the only writer for its own row. The row
/// does not exist while the node source is still being registered; readers
/// treat absence as "not yet registered", never as an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSourceData {
    /// Node source name (primary key).
    pub name: SourceName,
    /// Identity of the infrastructure implementation (e.g. `"local"`).
    pub infrastructure_type: String,
    /// Identity of the node-selection policy. Carried, never interpreted.
    pub policy_type: String,
    /// The infrastructure's durable variable map.
    pub infrastructure_variables: HashMap<String, serde_json::Value>,
    /// URLs of nodes that were deploying at the last flush.
    pub deploying_urls: Vec<String>,
    /// URLs of nodes that were lost at the last flush.
    pub lost_urls: Vec<String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl NodeSourceData {
    /// Create a new record with empty URL sets.
    #[must_use]
    pub fn new(
        name: SourceName,
        infrastructure_type: impl Into<String>,
        policy_type: impl Into<String>,
        infrastructure_variables: HashMap<String, serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name,
            infrastructure_type: infrastructure_type.into(),
            policy_type: policy_type.into(),
            infrastructure_variables,
            deploying_urls: Vec::new(),
            lost_urls: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
