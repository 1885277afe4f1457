//! Multi-group consensus coordination.
//!
//! Each registered state category is partitioned into a fixed number of
//! shards; every (category, shard) pair runs its own consensus group with its
//! own log, elections, and snapshots. The modules here wire the engine to
//! pluggable processors and give callers one async apply/lookup surface.

pub mod adapter;
pub mod closure;
pub mod coordinator;
pub mod group;
pub mod network;
pub mod processor;
pub mod route;
pub mod rpc;
pub mod storage;
pub mod types;

pub use closure::{OperationClosure, OperationResult};
pub use coordinator::{MetaRaftHandle, MetaRaftServer};
pub use group::{GroupHolder, GroupIdentity, GroupRegistry};
pub use processor::{ProcessorError, StateProcessor, StateProcessorFactory};
pub use types::{NodeId, PeerNode, TypeConfig};
