//! Outbound engine RPC, one factory instance per group.
//!
//! All groups on a node share one HTTP client; the group identity is baked
//! into the request path so the receiving node can dispatch to the right
//! group's engine.

use openraft::{
    RaftNetwork, RaftNetworkFactory,
    error::{RPCError, RaftError},
    network::RPCOption,
    raft::{
        AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest,
        InstallSnapshotResponse, VoteRequest, VoteResponse,
    },
};

use crate::raft::group::GroupIdentity;
use crate::raft::types::{NodeId, PeerNode, TypeConfig};

#[derive(Clone)]
pub struct GroupNetworkFactory {
    group: GroupIdentity,
    client: reqwest::Client,
}

impl GroupNetworkFactory {
    pub fn new(group: GroupIdentity, client: reqwest::Client) -> Self {
        Self { group, client }
    }
}

#[derive(Clone)]
pub struct GroupNetwork {
    group: GroupIdentity,
    base: String,
    client: reqwest::Client,
}

impl GroupNetwork {
    fn url(&self, action: &str) -> String {
        format!(
            "{}/raft/{}/{}/{}",
            self.base.trim_end_matches('/'),
            self.group.category,
            self.group.shard,
            action
        )
    }

    async fn post_json<Req: serde::Serialize, Resp: serde::de::DeserializeOwned>(
        &self,
        action: &str,
        req: &Req,
        option: RPCOption,
    ) -> Result<Resp, reqwest::Error> {
        self.client
            .post(self.url(action))
            .timeout(option.hard_ttl())
            .json(req)
            .send()
            .await?
            .json::<Resp>()
            .await
    }
}

impl RaftNetworkFactory<TypeConfig> for GroupNetworkFactory {
    type Network = GroupNetwork;

    async fn new_client(&mut self, _target: NodeId, node: &PeerNode) -> Self::Network {
        GroupNetwork {
            group: self.group.clone(),
            base: node.raft_endpoint.clone(),
            client: self.client.clone(),
        }
    }
}

impl RaftNetwork<TypeConfig> for GroupNetwork {
    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<TypeConfig>,
        option: RPCOption,
    ) -> Result<AppendEntriesResponse<NodeId>, RPCError<NodeId, PeerNode, RaftError<NodeId>>> {
        let res: Result<
            AppendEntriesResponse<NodeId>,
            RPCError<NodeId, PeerNode, RaftError<NodeId>>,
        > = self
            .post_json("append", &rpc, option)
            .await
            .map_err(|e| RPCError::Unreachable(openraft::error::Unreachable::new(&e)))?;
        res
    }

    async fn install_snapshot(
        &mut self,
        rpc: InstallSnapshotRequest<TypeConfig>,
        option: RPCOption,
    ) -> Result<
        InstallSnapshotResponse<NodeId>,
        RPCError<NodeId, PeerNode, RaftError<NodeId, openraft::error::InstallSnapshotError>>,
    > {
        let res: Result<
            InstallSnapshotResponse<NodeId>,
            RPCError<NodeId, PeerNode, RaftError<NodeId, openraft::error::InstallSnapshotError>>,
        > = self
            .post_json("snapshot", &rpc, option)
            .await
            .map_err(|e| RPCError::Unreachable(openraft::error::Unreachable::new(&e)))?;
        res
    }

    async fn vote(
        &mut self,
        rpc: VoteRequest<NodeId>,
        option: RPCOption,
    ) -> Result<VoteResponse<NodeId>, RPCError<NodeId, PeerNode, RaftError<NodeId>>> {
        let res: Result<VoteResponse<NodeId>, RPCError<NodeId, PeerNode, RaftError<NodeId>>> =
            self.post_json("vote", &rpc, option)
                .await
                .map_err(|e| RPCError::Unreachable(openraft::error::Unreachable::new(&e)))?;
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_urls_embed_group_identity() {
        let net = GroupNetwork {
            group: GroupIdentity::new("counter", 2),
            base: "http://10.0.0.1:7621/".to_string(),
            client: reqwest::Client::new(),
        };
        assert_eq!(net.url("append"), "http://10.0.0.1:7621/raft/counter/2/append");
        assert_eq!(net.url("vote"), "http://10.0.0.1:7621/raft/counter/2/vote");
    }
}
