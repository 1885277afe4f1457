use std::{
    collections::{BTreeMap, HashMap},
    sync::RwLock,
};

use serde::{Deserialize, Serialize};

use crate::raft::group::GroupIdentity;
use crate::raft::types::{NodeId, PeerNode};

/// Published peer configuration for one group, consumed by clients and the
/// RPC layer for request routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub group_id: String,
    pub members: BTreeMap<NodeId, PeerNode>,
}

/// group id -> current peer configuration.
///
/// Every group publishes here at start and republishes on membership change.
/// Keyed by the routing-format group id so lookups stay valid when shards are
/// added later.
#[derive(Debug, Default)]
pub struct RouteTable {
    entries: RwLock<HashMap<String, RouteEntry>>,
}

impl RouteTable {
    pub fn publish(&self, identity: &GroupIdentity, members: BTreeMap<NodeId, PeerNode>) {
        let group_id = identity.to_string();
        let entry = RouteEntry {
            group_id: group_id.clone(),
            members,
        };
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(group_id, entry);
    }

    pub fn lookup(&self, group_id: &str) -> Option<RouteEntry> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(group_id)
            .cloned()
    }

    /// All entries, sorted by group id.
    pub fn snapshot(&self) -> Vec<RouteEntry> {
        let mut entries: Vec<RouteEntry> = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.group_id.cmp(&b.group_id));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
