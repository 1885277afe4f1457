//! Per-group durable storage for the consensus engine.
//!
//! Every (category, shard) pair owns an isolated directory so shards compact
//! and recover independently:
//!
//! ```text
//! <data_dir>/<category>/<shard>/
//!   wal/log.json          replicated log entries
//!   wal/hard_state.json   vote + committed pointer
//!   state_machine.json    applied pointer + membership
//!   processor_state.json  serialized processor state, written per apply
//!   snapshots/...         snapshot meta and current snapshot
//! ```

use std::{
    collections::BTreeMap,
    fmt::Debug,
    ops::RangeBounds,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::sync::Mutex;

use openraft::{
    ErrorSubject, ErrorVerb, LogId, LogState, RaftLogReader, Vote, storage::RaftLogStorage,
};

use crate::raft::group::GroupIdentity;
use crate::raft::types::{NodeId, TypeConfig};

/// On-disk layout for one group.
#[derive(Debug, Clone)]
pub struct GroupPaths {
    pub wal_json: PathBuf,
    pub hard_state_json: PathBuf,
    pub sm_meta_json: PathBuf,
    pub sm_state_json: PathBuf,
    pub snapshot_meta_json: PathBuf,
    pub snapshot_data_json: PathBuf,
}

impl GroupPaths {
    pub fn new(data_dir: &Path, identity: &GroupIdentity) -> Self {
        let group_dir = data_dir
            .join(&identity.category)
            .join(identity.shard.to_string());
        let wal_dir = group_dir.join("wal");
        let snapshot_dir = group_dir.join("snapshots");
        Self {
            wal_json: wal_dir.join("log.json"),
            hard_state_json: wal_dir.join("hard_state.json"),
            sm_meta_json: group_dir.join("state_machine.json"),
            sm_state_json: group_dir.join("processor_state.json"),
            snapshot_meta_json: snapshot_dir.join("current_meta.json"),
            snapshot_data_json: snapshot_dir.join("current_snapshot.json"),
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        if let Some(parent) = self.wal_json.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(parent) = self.snapshot_meta_json.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct PersistedLog {
    #[serde(default)]
    last_purged_log_id: Option<LogId<NodeId>>,
    #[serde(default)]
    entries: Vec<openraft::impls::Entry<TypeConfig>>,
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct PersistedHardState {
    #[serde(default)]
    vote: Option<Vote<NodeId>>,
    #[serde(default)]
    committed: Option<LogId<NodeId>>,
}

#[derive(Debug)]
struct LogInner {
    last_purged_log_id: Option<LogId<NodeId>>,
    entries: BTreeMap<u64, openraft::impls::Entry<TypeConfig>>,
    vote: Option<Vote<NodeId>>,
    committed: Option<LogId<NodeId>>,
}

impl LogInner {
    fn last_log_id(&self) -> Option<LogId<NodeId>> {
        self.entries
            .iter()
            .next_back()
            .map(|(_idx, ent)| ent.log_id)
            .or(self.last_purged_log_id)
    }
}

/// File-backed replicated log for one group.
#[derive(Debug, Clone)]
pub struct GroupLogStore {
    paths: GroupPaths,
    inner: Arc<Mutex<LogInner>>,
}

impl GroupLogStore {
    pub async fn open(
        data_dir: &Path,
        identity: &GroupIdentity,
    ) -> Result<Self, openraft::StorageError<NodeId>> {
        let paths = GroupPaths::new(data_dir, identity);
        paths
            .ensure_dirs()
            .map_err(|e| io_err(ErrorSubject::Store, ErrorVerb::Write, e))?;

        let log = read_json::<PersistedLog>(&paths.wal_json)
            .await
            .map_err(|e| io_err(ErrorSubject::Logs, ErrorVerb::Read, e))?
            .unwrap_or(PersistedLog {
                last_purged_log_id: None,
                entries: Vec::new(),
            });
        let hard_state = read_json::<PersistedHardState>(&paths.hard_state_json)
            .await
            .map_err(|e| io_err(ErrorSubject::Vote, ErrorVerb::Read, e))?
            .unwrap_or_default();

        let entries = log
            .entries
            .into_iter()
            .map(|ent| (ent.log_id.index, ent))
            .collect::<BTreeMap<_, _>>();

        Ok(Self {
            paths,
            inner: Arc::new(Mutex::new(LogInner {
                last_purged_log_id: log.last_purged_log_id,
                entries,
                vote: hard_state.vote,
                committed: hard_state.committed,
            })),
        })
    }

    async fn persist_log(&self) -> Result<(), openraft::StorageError<NodeId>> {
        let inner = self.inner.lock().await;
        let log = PersistedLog {
            last_purged_log_id: inner.last_purged_log_id,
            entries: inner.entries.values().cloned().collect(),
        };
        write_json(&self.paths.wal_json, &log)
            .await
            .map_err(|e| io_err(ErrorSubject::Logs, ErrorVerb::Write, e))
    }

    async fn persist_hard_state(&self) -> Result<(), openraft::StorageError<NodeId>> {
        let inner = self.inner.lock().await;
        let hard_state = PersistedHardState {
            vote: inner.vote,
            committed: inner.committed,
        };
        write_json(&self.paths.hard_state_json, &hard_state)
            .await
            .map_err(|e| io_err(ErrorSubject::Vote, ErrorVerb::Write, e))
    }
}

impl RaftLogReader<TypeConfig> for GroupLogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + openraft::OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<openraft::impls::Entry<TypeConfig>>, openraft::StorageError<NodeId>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .entries
            .range(range)
            .map(|(_idx, ent)| ent.clone())
            .collect())
    }
}

impl RaftLogStorage<TypeConfig> for GroupLogStore {
    type LogReader = GroupLogStore;

    async fn get_log_state(
        &mut self,
    ) -> Result<LogState<TypeConfig>, openraft::StorageError<NodeId>> {
        let inner = self.inner.lock().await;
        Ok(LogState {
            last_purged_log_id: inner.last_purged_log_id,
            last_log_id: inner.last_log_id(),
        })
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }

    async fn save_vote(
        &mut self,
        vote: &Vote<NodeId>,
    ) -> Result<(), openraft::StorageError<NodeId>> {
        {
            let mut inner = self.inner.lock().await;
            inner.vote = Some(*vote);
        }
        self.persist_hard_state().await
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeId>>, openraft::StorageError<NodeId>> {
        let inner = self.inner.lock().await;
        Ok(inner.vote)
    }

    async fn save_committed(
        &mut self,
        committed: Option<LogId<NodeId>>,
    ) -> Result<(), openraft::StorageError<NodeId>> {
        {
            let mut inner = self.inner.lock().await;
            inner.committed = committed;
        }
        self.persist_hard_state().await
    }

    async fn read_committed(
        &mut self,
    ) -> Result<Option<LogId<NodeId>>, openraft::StorageError<NodeId>> {
        let inner = self.inner.lock().await;
        Ok(inner.committed)
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: openraft::storage::LogFlushed<TypeConfig>,
    ) -> Result<(), openraft::StorageError<NodeId>>
    where
        I: IntoIterator<Item = openraft::impls::Entry<TypeConfig>> + openraft::OptionalSend,
        I::IntoIter: openraft::OptionalSend,
    {
        {
            let mut inner = self.inner.lock().await;
            for ent in entries {
                inner.entries.insert(ent.log_id.index, ent);
            }
        }

        let res = self.persist_log().await;
        callback.log_io_completed(
            res.as_ref()
                .map(|_| ())
                .map_err(|e| std::io::Error::other(e.to_string())),
        );
        res
    }

    async fn truncate(
        &mut self,
        log_id: LogId<NodeId>,
    ) -> Result<(), openraft::StorageError<NodeId>> {
        {
            let mut inner = self.inner.lock().await;
            inner.entries.split_off(&log_id.index);
        }
        self.persist_log().await
    }

    async fn purge(&mut self, log_id: LogId<NodeId>) -> Result<(), openraft::StorageError<NodeId>> {
        {
            let mut inner = self.inner.lock().await;
            let keys: Vec<u64> = inner
                .entries
                .range(..=log_id.index)
                .map(|(k, _)| *k)
                .collect();
            for k in keys {
                inner.entries.remove(&k);
            }
            inner.last_purged_log_id = Some(log_id);
        }
        self.persist_log().await
    }
}

pub(crate) fn io_err(
    subject: ErrorSubject<NodeId>,
    verb: ErrorVerb,
    err: std::io::Error,
) -> openraft::StorageError<NodeId> {
    openraft::StorageError::from_io_error(subject, verb, err)
}

pub(crate) async fn read_json<T: serde::de::DeserializeOwned + Send + 'static>(
    path: &Path,
) -> Result<Option<T>, std::io::Error> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let v = serde_json::from_slice(&bytes).map_err(std::io::Error::other)?;
        Ok(Some(v))
    })
    .await
    .expect("spawn_blocking read_json")
}

pub(crate) async fn write_json<T: serde::Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), std::io::Error> {
    let bytes = serde_json::to_vec_pretty(value).map_err(std::io::Error::other)?;
    write_bytes(path, &bytes).await
}

pub(crate) async fn read_bytes(path: &Path) -> Result<Vec<u8>, std::io::Error> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || std::fs::read(&path))
        .await
        .expect("spawn_blocking read_bytes")
}

pub(crate) async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    let path = path.to_path_buf();
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Atomic replace so a crash mid-write never leaves a torn file.
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(tmp, path)?;
        Ok(())
    })
    .await
    .expect("spawn_blocking write_bytes")
}
