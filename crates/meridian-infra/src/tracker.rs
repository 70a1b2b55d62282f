//! Deploying/lost node bookkeeping.
//!
//! Tracks nodes between "requested" and "fully registered". Two URL-keyed
//! maps (deploying, lost) and their persisted-URL mirror sets form one
//! jointly guarded resource: every operation holds the guard for its full
//! duration, including the cross-map precedence checks, so no caller ever
//! observes a half-applied insert. Durable flushing of the mirror sets is
//! the manager's concern and happens after the in-memory change, outside
//! this guard.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::node::{DeployingNode, NodeUrl};

#[derive(Debug, Default)]
struct TrackerState {
    deploying: HashMap<NodeUrl, DeployingNode>,
    lost: HashMap<NodeUrl, DeployingNode>,
    deploying_urls: HashSet<NodeUrl>,
    lost_urls: HashSet<NodeUrl>,
}

/// Guarded deploying/lost node maps with persisted URL mirrors.
#[derive(Debug, Default)]
pub struct NodeTracker {
    state: Mutex<TrackerState>,
}

impl NodeTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, TrackerState> {
        // Map operations cannot panic mid-mutation; a poisoned guard still
        // holds consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a node into the deploying map and its mirror set.
    ///
    /// Last write wins when the URL is already present. Returns the
    /// replaced value, if any.
    pub fn add_deploying(&self, url: NodeUrl, node: DeployingNode) -> Option<DeployingNode> {
        let mut state = self.guard();
        state.deploying_urls.insert(url.clone());
        state.deploying.insert(url, node)
    }

    /// Insert a node into the lost map and its mirror set.
    pub fn add_lost(&self, url: NodeUrl, node: DeployingNode) -> Option<DeployingNode> {
        let mut state = self.guard();
        state.lost_urls.insert(url.clone());
        state.lost.insert(url, node)
    }

    /// Look up a URL, deploying entries first.
    ///
    /// When the same URL is present in both maps the deploying entry wins:
    /// it models a node marked lost and since redeployed under the same
    /// identifier, and the fresh attempt takes precedence.
    #[must_use]
    pub fn get_deploying_or_lost(&self, url: &NodeUrl) -> Option<DeployingNode> {
        let state = self.guard();
        state
            .deploying
            .get(url)
            .or_else(|| state.lost.get(url))
            .cloned()
    }

    /// Replace the stored value for the node's URL in whichever map holds
    /// it, checking the deploying map first.
    ///
    /// Entries never move between maps. When the URL is present in both
    /// maps only the deploying entry is replaced and the lost entry is left
    /// untouched; the replacement target is chosen by the same precedence as
    /// lookup. Mirror sets are unaffected (the key set does not change).
    /// Returns the previous value, or `None` when the URL is unknown to
    /// both maps.
    pub fn update(&self, node: DeployingNode) -> Option<DeployingNode> {
        let mut state = self.guard();
        let url = node.url.clone();

        if state.deploying.contains_key(&url) {
            state.deploying.insert(url, node)
        } else if state.lost.contains_key(&url) {
            state.lost.insert(url, node)
        } else {
            None
        }
    }

    /// Remove a URL from both maps and both mirror sets.
    ///
    /// Returns the removed node, preferring the deploying entry when the
    /// URL was present in both maps. Unknown URLs yield `None`.
    pub fn remove(&self, url: &NodeUrl) -> Option<DeployingNode> {
        let mut state = self.guard();
        state.deploying_urls.remove(url);
        state.lost_urls.remove(url);
        let deploying = state.deploying.remove(url);
        let lost = state.lost.remove(url);
        deploying.or(lost)
    }

    /// Snapshot of the deploying-map values.
    #[must_use]
    pub fn deploying_nodes(&self) -> Vec<DeployingNode> {
        self.guard().deploying.values().cloned().collect()
    }

    /// Snapshot of the lost-map values.
    #[must_use]
    pub fn lost_nodes(&self) -> Vec<DeployingNode> {
        self.guard().lost.values().cloned().collect()
    }

    /// Snapshot of the persisted deploying-URL mirror.
    #[must_use]
    pub fn deploying_urls(&self) -> HashSet<NodeUrl> {
        self.guard().deploying_urls.clone()
    }

    /// Snapshot of the persisted lost-URL mirror.
    #[must_use]
    pub fn lost_urls(&self) -> HashSet<NodeUrl> {
        self.guard().lost_urls.clone()
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, command: &str) -> DeployingNode {
        DeployingNode::new(name, "pool", command, "test node")
    }

    fn lost_node(name: &str, command: &str) -> DeployingNode {
        let mut node = node(name, command);
        node.mark_lost();
        node
    }

    #[test]
    fn fresh_tracker_is_empty() {
        let tracker = NodeTracker::new();
        assert!(tracker.deploying_nodes().is_empty());
        assert!(tracker.lost_nodes().is_empty());
        assert!(tracker.deploying_urls().is_empty());
        assert!(tracker.lost_urls().is_empty());

        let url = NodeUrl::deploying("pool", "nowhere");
        assert!(tracker.get_deploying_or_lost(&url).is_none());
    }

    #[test]
    fn add_deploying_updates_map_and_mirror() {
        let tracker = NodeTracker::new();
        let n = node("n1", "cmd");

        tracker.add_deploying(n.url.clone(), n.clone());

        assert_eq!(tracker.deploying_nodes().len(), 1);
        assert_eq!(tracker.deploying_urls().len(), 1);
        assert!(tracker.deploying_urls().contains(&n.url));

        let found = tracker.get_deploying_or_lost(&n.url).unwrap();
        assert_eq!(found.provisioning_command, "cmd");
    }

    #[test]
    fn add_deploying_last_write_wins() {
        let tracker = NodeTracker::new();
        let first = node("n1", "first");
        let second = node("n1", "second");

        tracker.add_deploying(first.url.clone(), first.clone());
        let replaced = tracker.add_deploying(second.url.clone(), second);

        assert_eq!(replaced.unwrap().provisioning_command, "first");
        assert_eq!(tracker.deploying_nodes().len(), 1);
        assert_eq!(tracker.deploying_urls().len(), 1);
        assert_eq!(
            tracker
                .get_deploying_or_lost(&first.url)
                .unwrap()
                .provisioning_command,
            "second"
        );
    }

    #[test]
    fn deploying_shadows_lost_on_shared_url() {
        let tracker = NodeTracker::new();
        let deploying = node("n1", "fresh");
        let lost = lost_node("n1", "stale");

        tracker.add_deploying(deploying.url.clone(), deploying.clone());
        tracker.add_lost(lost.url.clone(), lost);

        assert_eq!(tracker.deploying_nodes().len(), 1);
        assert_eq!(tracker.lost_nodes().len(), 1);

        let found = tracker.get_deploying_or_lost(&deploying.url).unwrap();
        assert!(!found.is_lost());
        assert_eq!(found.provisioning_command, "fresh");
    }

    #[test]
    fn update_unknown_url_is_none() {
        let tracker = NodeTracker::new();

        let previous = tracker.update(node("n1", "cmd"));

        assert!(previous.is_none());
        assert!(tracker.deploying_nodes().is_empty());
        assert!(tracker.lost_nodes().is_empty());
    }

    #[test]
    fn update_replaces_deploying_entry_in_place() {
        let tracker = NodeTracker::new();
        let original = node("n1", "cmd");
        tracker.add_deploying(original.url.clone(), original.clone());

        let previous = tracker.update(node("n1", "cmd2")).unwrap();

        assert_eq!(previous.provisioning_command, "cmd");
        assert_eq!(tracker.deploying_nodes().len(), 1);
        assert_eq!(tracker.deploying_urls().len(), 1);
        assert_eq!(
            tracker
                .get_deploying_or_lost(&original.url)
                .unwrap()
                .provisioning_command,
            "cmd2"
        );
    }

    #[test]
    fn update_replaces_lost_entry_when_only_lost_holds_url() {
        let tracker = NodeTracker::new();
        let deploying = node("other", "cmd");
        tracker.add_deploying(deploying.url.clone(), deploying);

        let lost = lost_node("n1", "cmd");
        tracker.add_lost(lost.url.clone(), lost.clone());

        let previous = tracker.update(lost_node("n1", "cmd2")).unwrap();

        assert_eq!(previous.provisioning_command, "cmd");
        assert!(previous.is_lost());
        assert_eq!(tracker.lost_nodes().len(), 1);
        assert!(tracker.lost_urls().contains(&lost.url));
    }

    #[test]
    fn update_on_shared_url_touches_only_the_deploying_entry() {
        let tracker = NodeTracker::new();
        let deploying = node("n1", "fresh");
        let lost = lost_node("n1", "stale");

        tracker.add_deploying(deploying.url.clone(), deploying.clone());
        tracker.add_lost(lost.url.clone(), lost.clone());

        let mut replacement = node("n1", "replacement");
        replacement.mark_lost();
        let previous = tracker.update(replacement).unwrap();

        // Replacement target follows lookup precedence: the deploying entry
        // is replaced even though the replacement carries the lost flag.
        assert!(!previous.is_lost());
        assert_eq!(previous.provisioning_command, "fresh");

        assert_eq!(tracker.deploying_nodes().len(), 1);
        assert_eq!(tracker.lost_nodes().len(), 1);
        let untouched = &tracker.lost_nodes()[0];
        assert_eq!(untouched.provisioning_command, "stale");
        assert!(tracker.lost_urls().contains(&lost.url));
    }

    #[test]
    fn remove_clears_both_maps_and_mirrors() {
        let tracker = NodeTracker::new();
        let deploying = node("n1", "fresh");
        let lost = lost_node("n1", "stale");

        tracker.add_deploying(deploying.url.clone(), deploying.clone());
        tracker.add_lost(lost.url.clone(), lost);

        let removed = tracker.remove(&deploying.url).unwrap();
        assert!(!removed.is_lost());

        assert!(tracker.deploying_nodes().is_empty());
        assert!(tracker.lost_nodes().is_empty());
        assert!(tracker.deploying_urls().is_empty());
        assert!(tracker.lost_urls().is_empty());
        assert!(tracker.remove(&deploying.url).is_none());
    }
}
