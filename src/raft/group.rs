use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use crate::error::MetaError;
use crate::raft::processor::StateProcessor;
use crate::raft::types::TypeConfig;

/// Canonical separator between category and shard index in a group id.
///
/// The category namespace rejects this character at registration, so
/// formatting and parsing always round-trip to the same (category, shard).
pub const GROUP_ID_SEPARATOR: char = '%';

/// Reject category names that would break group-id parsing or on-disk layout.
pub fn validate_category(category: &str) -> Result<(), MetaError> {
    let ok = !category.is_empty()
        && category
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(MetaError::InvalidConfig {
            message: format!(
                "category {category:?} must be non-empty [a-zA-Z0-9_-]"
            ),
        })
    }
}

/// Identity of one consensus group: one shard of one category.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupIdentity {
    pub category: String,
    pub shard: u32,
}

impl GroupIdentity {
    pub fn new(category: impl Into<String>, shard: u32) -> Self {
        Self {
            category: category.into(),
            shard,
        }
    }

    /// Parse `<category>%<shard>`.
    pub fn parse(group_id: &str) -> Result<Self, MetaError> {
        let malformed = || MetaError::MalformedGroupId {
            group_id: group_id.to_string(),
        };
        let (category, shard) = group_id
            .split_once(GROUP_ID_SEPARATOR)
            .ok_or_else(malformed)?;
        // Digits only: u32 parsing accepts a leading `+`, which would let two
        // distinct id strings alias the same shard.
        if category.is_empty() || shard.is_empty() || !shard.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let shard: u32 = shard.parse().map_err(|_| malformed())?;
        Ok(Self::new(category, shard))
    }
}

impl std::fmt::Display for GroupIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.category, GROUP_ID_SEPARATOR, self.shard)
    }
}

/// One running consensus group: engine handle plus the processor instance its
/// adapter is bound to. The binding is fixed for the holder's lifetime.
#[derive(Clone)]
pub struct GroupHolder {
    identity: GroupIdentity,
    raft: openraft::Raft<TypeConfig>,
    processor: Arc<Mutex<Box<dyn StateProcessor>>>,
}

impl GroupHolder {
    pub fn new(
        identity: GroupIdentity,
        raft: openraft::Raft<TypeConfig>,
        processor: Arc<Mutex<Box<dyn StateProcessor>>>,
    ) -> Self {
        Self {
            identity,
            raft,
            processor,
        }
    }

    pub fn identity(&self) -> &GroupIdentity {
        &self.identity
    }

    pub fn raft(&self) -> &openraft::Raft<TypeConfig> {
        &self.raft
    }

    /// Shared handle to the shard's processor. Reads taken through this lock
    /// see locally-applied state; linearizable reads go through the front
    /// end's read path, which fences on leadership first.
    pub fn processor(&self) -> &Arc<Mutex<Box<dyn StateProcessor>>> {
        &self.processor
    }
}

impl std::fmt::Debug for GroupHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupHolder")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// category -> shards, insertion order = shard index.
///
/// Populated once during `start()` and structurally immutable afterwards, so
/// steady-state lookups take no lock.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: HashMap<String, Vec<GroupHolder>>,
}

impl GroupRegistry {
    pub fn insert_category(&mut self, category: String, holders: Vec<GroupHolder>) {
        self.groups.insert(category, holders);
    }

    /// Resolve a routing-format group id to its holder.
    pub fn resolve(&self, group_id: &str) -> Result<&GroupHolder, MetaError> {
        let identity = GroupIdentity::parse(group_id)?;
        self.get(&identity.category, identity.shard)
    }

    pub fn get(&self, category: &str, shard: u32) -> Result<&GroupHolder, MetaError> {
        let holders = self
            .groups
            .get(category)
            .ok_or_else(|| MetaError::UnknownCategory {
                category: category.to_string(),
            })?;
        holders
            .get(shard as usize)
            .ok_or_else(|| MetaError::ShardOutOfRange {
                category: category.to_string(),
                shard,
                shards: holders.len() as u32,
            })
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn shard_count(&self, category: &str) -> Option<u32> {
        self.groups.get(category).map(|h| h.len() as u32)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GroupHolder> {
        self.groups.values().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_round_trips_through_display() {
        for (category, shard) in [("counter", 0), ("subscription", 41), ("a_b-c", 7)] {
            let identity = GroupIdentity::new(category, shard);
            let parsed = GroupIdentity::parse(&identity.to_string()).unwrap();
            assert_eq!(parsed, identity);
        }
    }

    #[test]
    fn parse_rejects_missing_separator() {
        let err = GroupIdentity::parse("cat0").unwrap_err();
        assert!(matches!(err, MetaError::MalformedGroupId { .. }));
    }

    #[test]
    fn parse_rejects_non_numeric_shard() {
        for group_id in ["cat%one", "cat%-1", "cat%", "cat% 5"] {
            let err = GroupIdentity::parse(group_id).unwrap_err();
            assert!(matches!(err, MetaError::MalformedGroupId { .. }), "{group_id}");
        }
    }

    #[test]
    fn parse_rejects_signed_shard_alias() {
        // "cat%+5" must not resolve to the same shard as "cat%5".
        let err = GroupIdentity::parse("cat%+5").unwrap_err();
        assert!(matches!(err, MetaError::MalformedGroupId { .. }));
    }

    #[test]
    fn parse_rejects_empty_category() {
        let err = GroupIdentity::parse("%3").unwrap_err();
        assert!(matches!(err, MetaError::MalformedGroupId { .. }));
    }

    #[test]
    fn category_validation() {
        assert!(validate_category("counter").is_ok());
        assert!(validate_category("will_message").is_ok());
        assert!(validate_category("").is_err());
        assert!(validate_category("bad%name").is_err());
        assert!(validate_category("no/slash").is_err());
    }

    #[test]
    fn empty_registry_reports_unknown_category() {
        let registry = GroupRegistry::default();
        let err = registry.resolve("counter%0").unwrap_err();
        assert!(matches!(err, MetaError::UnknownCategory { .. }));
    }
}
