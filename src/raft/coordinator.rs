//! Top-level coordinator: owns cluster configuration, partitions each
//! registered category into shards, and exposes the apply/lookup API.
//!
//! Lifecycle is two-phase. [`MetaRaftServer`] is the registration phase: a
//! plain mutable factory list, nothing running. [`start`] consumes it,
//! creates every group eagerly, and returns a [`MetaRaftHandle`] whose
//! registry is structurally immutable, so steady-state lookups take no lock.
//! All pools and engines are scoped to the handle; independent instances can
//! coexist in one process.
//!
//! [`start`]: MetaRaftServer::start

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

use crate::config::MetaConf;
use crate::error::MetaError;
use crate::raft::adapter::GroupStateMachine;
use crate::raft::closure::OperationClosure;
use crate::raft::group::{GroupHolder, GroupIdentity, GroupRegistry, validate_category};
use crate::raft::network::GroupNetworkFactory;
use crate::raft::processor::StateProcessorFactory;
use crate::raft::route::RouteTable;
use crate::raft::storage::GroupLogStore;
use crate::raft::types::{NodeId, OperationRequest, PeerNode, TypeConfig};

/// Registration-phase coordinator. Register every processor factory, then
/// call [`start`](Self::start); there is no registration after start.
pub struct MetaRaftServer {
    conf: MetaConf,
    members: BTreeMap<NodeId, PeerNode>,
    factories: Vec<Box<dyn StateProcessorFactory>>,
}

impl MetaRaftServer {
    pub fn new(conf: MetaConf) -> Result<Self, MetaError> {
        let members = conf.parse_members()?;
        Ok(Self {
            conf,
            members,
            factories: Vec::new(),
        })
    }

    /// Claim a category. Registering the same category twice fails fast.
    pub fn register_state_processor(
        &mut self,
        factory: Box<dyn StateProcessorFactory>,
    ) -> Result<(), MetaError> {
        let category = factory.group_category();
        validate_category(category)?;
        if self.factories.iter().any(|f| f.group_category() == category) {
            return Err(MetaError::DuplicateCategory {
                category: category.to_string(),
            });
        }
        self.factories.push(factory);
        Ok(())
    }

    /// Create and start every shard of every registered category.
    ///
    /// This is the only phase that mutates the registry. Any group failing to
    /// initialize aborts startup.
    pub async fn start(self) -> Result<MetaRaftHandle, MetaError> {
        let startup = |context: &str, e: &dyn std::fmt::Display| MetaError::Startup {
            message: format!("{context}: {e}"),
        };

        let client = reqwest::Client::new();
        let mut registry = GroupRegistry::default();
        let route_table = RouteTable::default();
        let single_node = self.members.len() == 1;

        for factory in &self.factories {
            let category = factory.group_category().to_string();
            let mut holders = Vec::with_capacity(self.conf.group_shards as usize);

            for shard in 0..self.conf.group_shards {
                let identity = GroupIdentity::new(category.clone(), shard);

                let config = openraft::Config {
                    cluster_name: identity.to_string(),
                    election_timeout_min: self.conf.election_timeout_min_ms,
                    election_timeout_max: self.conf.election_timeout_max_ms,
                    heartbeat_interval: self.conf.heartbeat_interval_ms,
                    snapshot_policy: openraft::SnapshotPolicy::LogsSinceLast(
                        self.conf.snapshot_threshold,
                    ),
                    ..Default::default()
                }
                .validate()
                .map_err(|e| startup("validate raft config", &e))?;

                let processor = Arc::new(Mutex::new(factory.build()));
                let log_store = GroupLogStore::open(&self.conf.data_dir, &identity)
                    .await
                    .map_err(|e| startup("open log store", &e))?;
                let state_machine = GroupStateMachine::open(
                    &self.conf.data_dir,
                    identity.clone(),
                    processor.clone(),
                )
                .await
                .map_err(|e| startup("open state machine", &e))?;
                let network = GroupNetworkFactory::new(identity.clone(), client.clone());

                let raft = openraft::Raft::<TypeConfig>::new(
                    self.conf.node_id,
                    Arc::new(config),
                    network,
                    log_store,
                    state_machine,
                )
                .await
                .map_err(|e| startup("start raft group", &e))?;

                if single_node {
                    initialize_if_needed(&raft, &self.members)
                        .await
                        .map_err(|e| startup("bootstrap single-node group", &e))?;
                }

                route_table.publish(&identity, self.members.clone());
                info!(group = %identity, "created raft group");

                holders.push(GroupHolder::new(identity, raft, processor));
            }

            registry.insert_category(category, holders);
        }

        Ok(MetaRaftHandle {
            inner: Arc::new(HandleInner {
                node_id: self.conf.node_id,
                members: self.members,
                registry,
                route_table,
                inflight: Arc::new(Semaphore::new(self.conf.max_inflight as usize)),
            }),
        })
    }
}

async fn initialize_if_needed(
    raft: &openraft::Raft<TypeConfig>,
    members: &BTreeMap<NodeId, PeerNode>,
) -> anyhow::Result<()> {
    let initialized = raft
        .is_initialized()
        .await
        .map_err(|e| anyhow::anyhow!("raft is_initialized: {e}"))?;
    if initialized {
        return Ok(());
    }
    raft.initialize(members.clone())
        .await
        .map_err(|e| anyhow::anyhow!("raft initialize: {e}"))?;
    Ok(())
}

struct HandleInner {
    node_id: NodeId,
    members: BTreeMap<NodeId, PeerNode>,
    registry: GroupRegistry,
    route_table: RouteTable,
    inflight: Arc<Semaphore>,
}

/// Running coordinator. Cheap to clone; all clones share the same groups.
#[derive(Clone)]
pub struct MetaRaftHandle {
    inner: Arc<HandleInner>,
}

impl MetaRaftHandle {
    pub fn node_id(&self) -> NodeId {
        self.inner.node_id
    }

    /// Resolve a routing-format group id (`<category>%<shard>`).
    pub fn get_group_holder(&self, group_id: &str) -> Result<&GroupHolder, MetaError> {
        self.inner.registry.resolve(group_id)
    }

    pub fn group(&self, category: &str, shard: u32) -> Result<&GroupHolder, MetaError> {
        self.inner.registry.get(category, shard)
    }

    pub fn groups(&self) -> impl Iterator<Item = &GroupHolder> {
        self.inner.registry.iter()
    }

    pub fn shard_count(&self, category: &str) -> Option<u32> {
        self.inner.registry.shard_count(category)
    }

    pub fn route_table(&self) -> &RouteTable {
        &self.inner.route_table
    }

    /// Submit a payload for replication on `holder`'s group.
    ///
    /// Returns immediately; `closure` is resolved exactly once on a worker
    /// task, whatever the outcome. Submission failures (budget exhausted, not
    /// leader, engine shutting down) arrive through the closure too, never as
    /// a synchronous error.
    pub fn apply_operation(
        &self,
        holder: &GroupHolder,
        payload: Vec<u8>,
        closure: OperationClosure,
    ) {
        let permit = match self.inner.inflight.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                closure.resolve(Err(MetaError::SubmissionRejected {
                    reason: "in-flight operation budget exhausted".to_string(),
                }));
                return;
            }
        };

        let raft = holder.raft().clone();
        tokio::spawn(async move {
            let _permit = permit;
            let outcome = match raft.client_write(OperationRequest { payload }).await {
                Ok(resp) => resp.data.into_result(),
                Err(err) => Err(map_write_error(err)),
            };
            closure.resolve(outcome);
        });
    }

    /// Linearizable read against one group: fence on leadership, then let the
    /// bound processor evaluate the request against local state.
    pub async fn read_operation(
        &self,
        holder: &GroupHolder,
        payload: &[u8],
    ) -> Result<Vec<u8>, MetaError> {
        holder
            .raft()
            .ensure_linearizable()
            .await
            .map_err(map_read_error)?;
        let processor = holder.processor().lock().await;
        processor
            .read(payload)
            .map_err(|e| MetaError::ApplyFailure {
                message: e.to_string(),
            })
    }

    /// Bootstrap every group with the configured member set. Call once, on
    /// one node, when bringing up a fresh multi-node cluster.
    pub async fn initialize(&self) -> Result<(), MetaError> {
        for holder in self.groups() {
            initialize_if_needed(holder.raft(), &self.inner.members)
                .await
                .map_err(|e| MetaError::Startup {
                    message: format!("initialize {}: {e}", holder.identity()),
                })?;
        }
        Ok(())
    }

    pub async fn add_learner(
        &self,
        group_id: &str,
        node_id: NodeId,
        node: PeerNode,
    ) -> Result<(), MetaError> {
        let holder = self.get_group_holder(group_id)?;
        holder
            .raft()
            .add_learner(node_id, node, false)
            .await
            .map_err(|e| MetaError::ApplyFailure {
                message: format!("add_learner: {e}"),
            })?;
        self.republish(holder).await;
        Ok(())
    }

    pub async fn change_membership(
        &self,
        group_id: &str,
        voters: BTreeSet<NodeId>,
    ) -> Result<(), MetaError> {
        let holder = self.get_group_holder(group_id)?;
        holder
            .raft()
            .change_membership(voters, false)
            .await
            .map_err(|e| MetaError::ApplyFailure {
                message: format!("change_membership: {e}"),
            })?;
        self.republish(holder).await;
        Ok(())
    }

    async fn republish(&self, holder: &GroupHolder) {
        let metrics = holder.raft().metrics().borrow().clone();
        let members: BTreeMap<NodeId, PeerNode> = metrics
            .membership_config
            .nodes()
            .map(|(id, node)| (*id, node.clone()))
            .collect();
        self.inner.route_table.publish(holder.identity(), members);
    }

    /// Stop every group's engine. Idempotent enough for teardown paths.
    pub async fn shutdown(&self) {
        for holder in self.groups() {
            if let Err(e) = holder.raft().shutdown().await {
                warn!(group = %holder.identity(), error = %e, "raft shutdown");
            }
        }
        info!("meta raft server stopped");
    }
}

fn map_write_error(
    err: openraft::error::RaftError<NodeId, openraft::error::ClientWriteError<NodeId, PeerNode>>,
) -> MetaError {
    match err.api_error() {
        Some(openraft::error::ClientWriteError::ForwardToLeader(forward)) => MetaError::NotLeader {
            leader: forward.leader_id,
        },
        _ => MetaError::SubmissionRejected {
            reason: err.to_string(),
        },
    }
}

fn map_read_error(
    err: openraft::error::RaftError<NodeId, openraft::error::CheckIsLeaderError<NodeId, PeerNode>>,
) -> MetaError {
    match err.api_error() {
        Some(openraft::error::CheckIsLeaderError::ForwardToLeader(forward)) => {
            MetaError::NotLeader {
                leader: forward.leader_id,
            }
        }
        _ => MetaError::SubmissionRejected {
            reason: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser as _;

    use super::*;
    use crate::config::Cli;
    use crate::processors::counter::CounterStateProcessorFactory;
    use crate::processors::subscription::SubscriptionStateProcessorFactory;

    fn test_conf(data_dir: &std::path::Path, shards: u32) -> MetaConf {
        let cli = Cli::try_parse_from([
            "metabus",
            "--data-dir",
            data_dir.to_str().unwrap(),
            "--group-shards",
            &shards.to_string(),
        ])
        .unwrap();
        cli.config
    }

    #[test]
    fn duplicate_category_fails_fast() {
        let tmp = tempfile::tempdir().unwrap();
        let mut server = MetaRaftServer::new(test_conf(tmp.path(), 1)).unwrap();
        server
            .register_state_processor(Box::new(CounterStateProcessorFactory))
            .unwrap();
        let err = server
            .register_state_processor(Box::new(CounterStateProcessorFactory))
            .unwrap_err();
        assert!(matches!(err, MetaError::DuplicateCategory { .. }));
    }

    #[tokio::test]
    async fn start_creates_contiguous_shards_per_category() {
        let tmp = tempfile::tempdir().unwrap();
        let mut server = MetaRaftServer::new(test_conf(tmp.path(), 3)).unwrap();
        server
            .register_state_processor(Box::new(CounterStateProcessorFactory))
            .unwrap();
        server
            .register_state_processor(Box::new(SubscriptionStateProcessorFactory))
            .unwrap();

        let handle = server.start().await.unwrap();

        for category in ["counter", "subscription"] {
            assert_eq!(handle.shard_count(category), Some(3));
            for shard in 0..3 {
                let holder = handle.group(category, shard).unwrap();
                assert_eq!(holder.identity().shard, shard);
                assert_eq!(holder.identity().category, category);
            }
        }
        // One route entry per group.
        assert_eq!(handle.route_table().len(), 6);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn lookup_failures_are_typed() {
        let tmp = tempfile::tempdir().unwrap();
        let mut server = MetaRaftServer::new(test_conf(tmp.path(), 3)).unwrap();
        server
            .register_state_processor(Box::new(CounterStateProcessorFactory))
            .unwrap();
        let handle = server.start().await.unwrap();

        assert!(matches!(
            handle.get_group_holder("unknowncat%0").unwrap_err(),
            MetaError::UnknownCategory { .. }
        ));
        assert!(matches!(
            handle.get_group_holder("cat0").unwrap_err(),
            MetaError::MalformedGroupId { .. }
        ));
        assert!(matches!(
            handle.get_group_holder("counter%99").unwrap_err(),
            MetaError::ShardOutOfRange { shards: 3, .. }
        ));
        assert!(handle.get_group_holder("counter%2").is_ok());

        handle.shutdown().await;
    }
}
