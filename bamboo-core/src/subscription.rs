//! Per-peer topic-membership tables for publish/subscribe.
//!
//! Exact-topic matching, not prefix matching: a peer is subscribed to a
//! topic string or it isn't.

use dashmap::{DashMap, DashSet};

use crate::envelope::PeerId;

/// `local_subs`: topics this node wishes to receive.
/// `remote_subs[peer]`: topics each known peer declared.
#[derive(Default)]
pub struct SubscriptionTable {
    local_subs: DashSet<String>,
    remote_subs: DashMap<PeerId, DashSet<String>>,
}

impl SubscriptionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_locally_subscribed(&self, topic: &str) -> bool {
        self.local_subs.contains(topic)
    }

    #[must_use]
    pub fn local_topics(&self) -> Vec<String> {
        self.local_subs.iter().map(|t| t.clone()).collect()
    }

    /// Add `topic` to the local set. Returns `true` if it was newly added.
    pub fn add_local(&self, topic: &str) -> bool {
        self.local_subs.insert(topic.to_string())
    }

    /// Remove `topic` from the local set. Returns `true` if it was present.
    pub fn remove_local(&self, topic: &str) -> bool {
        self.local_subs.remove(topic).is_some()
    }

    /// Apply additions/removals to a remote peer's declared subscriptions.
    pub fn apply_remote(&self, peer: PeerId, add: &[String], remove: &[String]) {
        let entry = self.remote_subs.entry(peer).or_default();
        for topic in add {
            entry.insert(topic.clone());
        }
        for topic in remove {
            entry.remove(topic);
        }
    }

    /// Replace a peer's declared subscriptions wholesale, e.g. from a HELLO.
    pub fn set_remote(&self, peer: PeerId, topics: impl IntoIterator<Item = String>) {
        let set = DashSet::new();
        for topic in topics {
            set.insert(topic);
        }
        self.remote_subs.insert(peer, set);
    }

    /// Peers that have declared a subscription to `topic`.
    #[must_use]
    pub fn subscribers_of(&self, topic: &str) -> Vec<PeerId> {
        self.remote_subs
            .iter()
            .filter(|entry| entry.value().contains(topic))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Drop all record of a peer, e.g. once it's pruned as stale.
    pub fn remove_peer(&self, peer: &PeerId) {
        self.remote_subs.remove(peer);
    }
}
