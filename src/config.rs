use std::{collections::BTreeMap, net::SocketAddr, path::PathBuf};

use clap::{Args, Parser};

use crate::error::MetaError;
use crate::raft::types::{NodeId, PeerNode};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "metabus",
    about = "Multi-group raft metadata server",
    disable_help_subcommand = true
)]
pub struct Cli {
    #[command(flatten)]
    pub config: MetaConf,
}

/// Static node configuration.
///
/// All consensus groups on one node share this configuration; `start()` copies
/// the peer set per group. Membership is fixed at startup (dynamic shard or
/// member addition goes through the membership pass-throughs, not config).
#[derive(Args, Debug, Clone)]
pub struct MetaConf {
    /// Listener for engine RPC and the write/read front end.
    #[arg(
        long,
        env = "METABUS_BIND",
        value_name = "ADDR",
        default_value = "127.0.0.1:7621"
    )]
    pub bind: SocketAddr,

    /// This node's id. Must appear in `--members`.
    #[arg(long, env = "METABUS_NODE_ID", value_name = "ID", default_value_t = 1)]
    pub node_id: NodeId,

    /// Cluster members as `id=base_url` pairs, comma separated.
    #[arg(
        long,
        env = "METABUS_MEMBERS",
        value_name = "LIST",
        default_value = "1=http://127.0.0.1:7621"
    )]
    pub members: String,

    #[arg(
        long,
        env = "METABUS_DATA_DIR",
        value_name = "PATH",
        default_value = "./data"
    )]
    pub data_dir: PathBuf,

    /// Shards created per registered category.
    #[arg(
        long = "group-shards",
        env = "METABUS_GROUP_SHARDS",
        value_name = "N",
        default_value_t = 3,
        value_parser = clap::value_parser!(u32).range(1..=64)
    )]
    pub group_shards: u32,

    #[arg(
        long = "election-timeout-min-ms",
        env = "METABUS_ELECTION_TIMEOUT_MIN_MS",
        value_name = "MS",
        default_value_t = 1_000,
        value_parser = clap::value_parser!(u64).range(100..=60_000)
    )]
    pub election_timeout_min_ms: u64,

    #[arg(
        long = "election-timeout-max-ms",
        env = "METABUS_ELECTION_TIMEOUT_MAX_MS",
        value_name = "MS",
        default_value_t = 2_000,
        value_parser = clap::value_parser!(u64).range(200..=120_000)
    )]
    pub election_timeout_max_ms: u64,

    #[arg(
        long = "heartbeat-interval-ms",
        env = "METABUS_HEARTBEAT_INTERVAL_MS",
        value_name = "MS",
        default_value_t = 300,
        value_parser = clap::value_parser!(u64).range(10..=30_000)
    )]
    pub heartbeat_interval_ms: u64,

    /// Log entries applied between snapshots. The engine snapshots by log
    /// distance rather than wall-clock interval.
    #[arg(
        long = "snapshot-threshold",
        env = "METABUS_SNAPSHOT_THRESHOLD",
        value_name = "N",
        default_value_t = 5_000,
        value_parser = clap::value_parser!(u64).range(10..=1_000_000)
    )]
    pub snapshot_threshold: u64,

    /// In-flight write operations accepted per node before new submissions
    /// are rejected.
    #[arg(
        long = "max-inflight",
        env = "METABUS_MAX_INFLIGHT",
        value_name = "N",
        default_value_t = 1_024,
        value_parser = clap::value_parser!(u32).range(1..=65_536)
    )]
    pub max_inflight: u32,
}

impl MetaConf {
    /// Parse `--members` into the base peer configuration.
    pub fn parse_members(&self) -> Result<BTreeMap<NodeId, PeerNode>, MetaError> {
        let mut members = BTreeMap::new();
        for part in self.members.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((id, base_url)) = part.split_once('=') else {
                return Err(MetaError::InvalidConfig {
                    message: format!("member {part:?} is not `id=base_url`"),
                });
            };
            let id: NodeId = id.trim().parse().map_err(|_| MetaError::InvalidConfig {
                message: format!("member id {id:?} is not numeric"),
            })?;
            let base_url = base_url.trim().trim_end_matches('/').to_string();
            if members
                .insert(id, PeerNode::new(format!("node-{id}"), base_url))
                .is_some()
            {
                return Err(MetaError::InvalidConfig {
                    message: format!("member id {id} listed twice"),
                });
            }
        }
        if members.is_empty() {
            return Err(MetaError::InvalidConfig {
                message: "member list is empty".to_string(),
            });
        }
        if !members.contains_key(&self.node_id) {
            return Err(MetaError::InvalidConfig {
                message: format!("node id {} is not in the member list", self.node_id),
            });
        }
        if self.election_timeout_min_ms >= self.election_timeout_max_ms {
            return Err(MetaError::InvalidConfig {
                message: "election-timeout-min-ms must be below election-timeout-max-ms"
                    .to_string(),
            });
        }
        Ok(members)
    }
}
