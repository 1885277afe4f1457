use serde::{Deserialize, Serialize};

use crate::raft::types::NodeId;

/// Failures surfaced by the coordination layer.
///
/// Per-operation failures (`SubmissionRejected`, `NotLeader`, `ApplyFailure`)
/// travel through the operation closure, never as synchronous errors from
/// `apply_operation`. Structural failures (group-id lookups, registration,
/// startup) are returned at the call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaError {
    /// The engine refused the submission (shutting down or in-flight budget
    /// exhausted). The caller may retry after backing off.
    SubmissionRejected {
        reason: String,
    },
    /// The targeted node is not the shard leader. `leader` carries a hint
    /// when one is known; leader discovery and retry are RPC-layer concerns.
    NotLeader {
        leader: Option<NodeId>,
    },
    /// The group id string does not parse as `<category>%<shard>`.
    MalformedGroupId {
        group_id: String,
    },
    /// The category was never registered.
    UnknownCategory {
        category: String,
    },
    /// The shard index is past the configured shard count.
    ShardOutOfRange {
        category: String,
        shard: u32,
        shards: u32,
    },
    /// A second factory was registered for an already-claimed category.
    DuplicateCategory {
        category: String,
    },
    /// The bound processor rejected a committed entry. Delivered through the
    /// closure; the shard keeps applying subsequent entries.
    ApplyFailure {
        message: String,
    },
    /// A group or listener failed to initialize. Fatal at startup.
    Startup {
        message: String,
    },
    InvalidConfig {
        message: String,
    },
}

impl MetaError {
    /// Stable wire code used in RPC error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SubmissionRejected { .. } => "submission_rejected",
            Self::NotLeader { .. } => "not_leader",
            Self::MalformedGroupId { .. } => "malformed_group_id",
            Self::UnknownCategory { .. } => "unknown_group",
            Self::ShardOutOfRange { .. } => "unknown_group",
            Self::DuplicateCategory { .. } => "duplicate_category",
            Self::ApplyFailure { .. } => "apply_failure",
            Self::Startup { .. } => "startup_failure",
            Self::InvalidConfig { .. } => "invalid_config",
        }
    }
}

impl std::fmt::Display for MetaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SubmissionRejected { reason } => {
                write!(f, "submission rejected: {reason}")
            }
            Self::NotLeader { leader: Some(id) } => {
                write!(f, "not leader, current leader is node {id}")
            }
            Self::NotLeader { leader: None } => {
                write!(f, "not leader, no leader known")
            }
            Self::MalformedGroupId { group_id } => {
                write!(f, "malformed group id {group_id:?}, expected <category>%<shard>")
            }
            Self::UnknownCategory { category } => {
                write!(f, "unknown group category {category:?}")
            }
            Self::ShardOutOfRange {
                category,
                shard,
                shards,
            } => {
                write!(
                    f,
                    "shard {shard} out of range for category {category:?} ({shards} shards)"
                )
            }
            Self::DuplicateCategory { category } => {
                write!(f, "category {category:?} is already registered")
            }
            Self::ApplyFailure { message } => write!(f, "apply failure: {message}"),
            Self::Startup { message } => write!(f, "startup failure: {message}"),
            Self::InvalidConfig { message } => write!(f, "invalid config: {message}"),
        }
    }
}

impl std::error::Error for MetaError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            MetaError::MalformedGroupId {
                group_id: "cat0".into()
            }
            .code(),
            "malformed_group_id"
        );
        assert_eq!(
            MetaError::UnknownCategory {
                category: "x".into()
            }
            .code(),
            "unknown_group"
        );
        assert_eq!(
            MetaError::ShardOutOfRange {
                category: "x".into(),
                shard: 99,
                shards: 3
            }
            .code(),
            "unknown_group"
        );
        assert_eq!(MetaError::NotLeader { leader: None }.code(), "not_leader");
    }

    #[test]
    fn display_includes_group_id() {
        let err = MetaError::MalformedGroupId {
            group_id: "counter".into(),
        };
        assert!(err.to_string().contains("counter"));
    }
}
