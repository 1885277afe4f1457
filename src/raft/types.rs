use std::io::Cursor;

use serde::{Deserialize, Serialize};

use crate::error::MetaError;

/// Raft node identifier shared by every consensus group on a node.
pub type NodeId = u64;

/// Node metadata stored in each group's membership config and published to
/// the route table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerNode {
    /// A human-friendly node name.
    pub name: String,

    /// Base URL for the write/read front end (clients, follower forwarding).
    pub api_base_url: String,

    /// Base URL for engine RPC (append/vote/snapshot). Currently the same
    /// listener as `api_base_url`.
    pub raft_endpoint: String,
}

impl PeerNode {
    pub fn new(name: String, base_url: String) -> Self {
        Self {
            name,
            api_base_url: base_url.clone(),
            raft_endpoint: base_url,
        }
    }
}

/// A replicated log entry payload: opaque bytes for the bound processor.
///
/// The coordination layer never interprets `payload`; only the processor that
/// owns the group's category does, deterministically, once per commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub payload: Vec<u8>,
}

/// Outcome of applying one committed entry.
///
/// Processor-level failures are data, not engine errors: they replicate like
/// any other response so every replica agrees on the outcome, and the shard
/// keeps applying subsequent entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationResponse {
    Ok { payload: Vec<u8> },
    Err { code: String, message: String },
}

impl OperationResponse {
    pub fn into_result(self) -> Result<Vec<u8>, MetaError> {
        match self {
            Self::Ok { payload } => Ok(payload),
            Self::Err { message, .. } => Err(MetaError::ApplyFailure { message }),
        }
    }
}

/// OpenRaft type configuration, shared by all groups.
///
/// Storage v2 separates `RaftLogStorage` and `RaftStateMachine`, which is
/// exactly the per-group split here: a file-backed log plus a state-machine
/// adapter bound to one processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TypeConfig;

impl openraft::RaftTypeConfig for TypeConfig {
    type D = OperationRequest;
    type R = OperationResponse;

    type NodeId = NodeId;
    type Node = PeerNode;

    type Entry = openraft::impls::Entry<TypeConfig>;
    type Responder = openraft::impls::OneshotResponder<TypeConfig>;
    type AsyncRuntime = openraft::impls::TokioRuntime;

    // Requires tokio `io-util` for AsyncRead/Write/Seek impls on Cursor.
    type SnapshotData = Cursor<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_maps_to_apply_failure() {
        let resp = OperationResponse::Err {
            code: "apply_failure".to_string(),
            message: "bad payload".to_string(),
        };
        let err = resp.into_result().unwrap_err();
        assert!(matches!(err, MetaError::ApplyFailure { .. }));
    }
}
