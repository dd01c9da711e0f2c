//! Key/capability registry with revision-based staleness guarding.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::{DashMap, DashSet};
use serde_json::{Map, Value};

use crate::envelope::PeerId;

/// Local-served-keys, local capabilities, and per-peer remote metadata.
///
/// `local`/`local_caps` mutation bumps `rev` monotonically; `remote*` tables
/// are keyed by [`PeerId`] and guarded against out-of-order HELLO delivery
/// via `remote_rev`.
pub struct KeyRegistry {
    local: DashSet<String>,
    local_caps: DashSet<String>,
    remote: DashMap<PeerId, HashSet<String>>,
    remote_caps: DashMap<PeerId, HashSet<String>>,
    remote_rev: DashMap<PeerId, u64>,
    last_seen: DashMap<PeerId, f64>,
    rev: AtomicU64,
}

impl Default for KeyRegistry {
    fn default() -> Self {
        let local_caps = DashSet::new();
        // The codec a node advertises is part of the ambient contract, so
        // the default capability set is never empty.
        local_caps.insert("json".to_string());

        Self {
            local: DashSet::new(),
            local_caps,
            remote: DashMap::new(),
            remote_caps: DashMap::new(),
            remote_rev: DashMap::new(),
            last_seen: DashMap::new(),
            rev: AtomicU64::new(0),
        }
    }
}

impl KeyRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register keys this node serves. Registering a handler for `k` should
    /// always be paired with adding `k` here so `local` and the handler
    /// table stay in lockstep.
    pub fn add<I: IntoIterator<Item = String>>(&self, keys: I) {
        for key in keys {
            self.local.insert(key);
        }
        self.bump_rev();
    }

    pub fn remove<I: IntoIterator<Item = String>>(&self, keys: I) {
        for key in keys {
            self.local.remove(&key);
        }
        self.bump_rev();
    }

    pub fn set_caps<I: IntoIterator<Item = String>>(&self, caps: I) {
        self.local_caps.clear();
        for cap in caps {
            self.local_caps.insert(cap);
        }
        self.bump_rev();
    }

    #[must_use]
    pub fn is_local(&self, key: &str) -> bool {
        self.local.contains(key)
    }

    /// Snapshot `{keys, caps, rev, ts}`, sorted and deterministic.
    #[must_use]
    pub fn advertise(&self) -> Map<String, Value> {
        let mut out = Map::new();
        out.insert("keys".to_string(), sorted_array(self.local.iter().map(|k| k.clone())));
        out.insert("caps".to_string(), sorted_array(self.local_caps.iter().map(|k| k.clone())));
        out.insert("rev".to_string(), Value::from(self.rev.load(Ordering::SeqCst)));
        out.insert("ts".to_string(), Value::from(now_unix()));
        out
    }

    #[must_use]
    pub fn local_keys(&self) -> Vec<String> {
        self.local.iter().map(|k| k.clone()).collect()
    }

    #[must_use]
    pub fn local_caps(&self) -> Vec<String> {
        self.local_caps.iter().map(|k| k.clone()).collect()
    }

    #[must_use]
    pub fn rev(&self) -> u64 {
        self.rev.load(Ordering::SeqCst)
    }

    /// Learn a peer's advertised keys/caps/rev.
    ///
    /// If `rev` is provided and is older than the last recorded
    /// `remote_rev` for that peer, `remote`/`remote_caps` are left
    /// untouched but `last_seen` is still refreshed — a stale HELLO still
    /// proves the peer is alive.
    pub fn learn(
        &self,
        peer: PeerId,
        keys: impl IntoIterator<Item = String>,
        caps: Option<Vec<String>>,
        rev: Option<u64>,
        ts: Option<f64>,
        replace: bool,
    ) {
        if let Some(rev) = rev {
            if let Some(existing) = self.remote_rev.get(&peer) {
                if rev < *existing {
                    self.last_seen.insert(peer, ts.unwrap_or_else(now_unix));
                    return;
                }
            }
        }

        let new_keys: HashSet<String> = keys.into_iter().collect();
        if replace {
            self.remote.insert(peer.clone(), new_keys);
        } else {
            self.remote.entry(peer.clone()).or_default().extend(new_keys);
        }

        if let Some(caps) = caps {
            self.remote_caps.insert(peer.clone(), caps.into_iter().collect());
        }
        if let Some(rev) = rev {
            self.remote_rev.insert(peer.clone(), rev);
        }

        self.last_seen.insert(peer, ts.unwrap_or_else(now_unix));
    }

    #[must_use]
    pub fn peer_supports(&self, peer: &PeerId, key: &str) -> bool {
        self.remote.get(peer).map_or(false, |keys| keys.contains(key))
    }

    /// Whether this peer has ever been learned about, i.e. whether the
    /// sender-side key gate has anything to check against.
    #[must_use]
    pub fn peer_is_known(&self, peer: &PeerId) -> bool {
        self.remote.contains_key(peer)
    }

    #[must_use]
    pub fn peers_supporting(&self, key: &str) -> Vec<PeerId> {
        self.remote
            .iter()
            .filter(|entry| entry.value().contains(key))
            .map(|entry| entry.key().clone())
            .collect()
    }

    #[must_use]
    pub fn get_peer_caps(&self, peer: &PeerId) -> Vec<String> {
        self.remote_caps.get(peer).map(|c| c.iter().cloned().collect()).unwrap_or_default()
    }

    /// Remove any peer whose `last_seen` is older than `stale_after_s`,
    /// returning the removed peer ids.
    pub fn prune(&self, stale_after_s: f64) -> Vec<PeerId> {
        let cutoff = now_unix() - stale_after_s.max(0.0);
        let stale: Vec<PeerId> = self
            .last_seen
            .iter()
            .filter(|entry| *entry.value() < cutoff)
            .map(|entry| entry.key().clone())
            .collect();

        for peer in &stale {
            self.last_seen.remove(peer);
            self.remote.remove(peer);
            self.remote_caps.remove(peer);
            self.remote_rev.remove(peer);
        }

        stale
    }

    fn bump_rev(&self) {
        self.rev.fetch_add(1, Ordering::SeqCst);
    }
}

fn sorted_array(items: impl Iterator<Item = String>) -> Value {
    let mut sorted: Vec<String> = items.collect();
    sorted.sort();
    sorted.dedup();
    Value::Array(sorted.into_iter().map(Value::String).collect())
}

fn now_unix() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_local_caps_is_json() {
        let reg = KeyRegistry::default();
        assert_eq!(reg.local_caps(), vec!["json".to_string()]);
    }

    #[test]
    fn add_bumps_rev_and_advertises_key() {
        let reg = KeyRegistry::default();
        reg.add(["perf.echo".to_string()]);
        assert!(reg.is_local("perf.echo"));
        assert!(reg.rev() > 0);
        let advertised = reg.advertise();
        let keys = advertised.get("keys").unwrap().as_array().unwrap();
        assert!(keys.contains(&Value::String("perf.echo".to_string())));
    }

    #[test]
    fn stale_rev_does_not_overwrite_but_refreshes_last_seen() {
        let reg = KeyRegistry::default();
        let peer = PeerId::from("p");
        reg.learn(peer.clone(), vec!["a".to_string()], None, Some(5), Some(100.0), true);
        reg.learn(peer.clone(), vec![], None, Some(3), Some(200.0), true);

        assert!(reg.peer_supports(&peer, "a"));
        assert_eq!(*reg.last_seen.get(&peer).unwrap(), 200.0);
    }

    #[test]
    fn prune_removes_only_stale_peers() {
        let reg = KeyRegistry::default();
        let stale = PeerId::from("stale");
        let fresh = PeerId::from("fresh");
        reg.last_seen.insert(stale.clone(), 0.0);
        reg.last_seen.insert(fresh.clone(), now_unix());
        reg.remote.insert(stale.clone(), HashSet::new());

        let removed = reg.prune(1.0);
        assert_eq!(removed, vec![stale.clone()]);
        assert!(reg.remote.get(&stale).is_none());
        assert!(reg.last_seen.get(&fresh).is_some());
    }
}
