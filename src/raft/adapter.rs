//! State-machine adapter: bridges engine commit notifications to the bound
//! [`StateProcessor`].
//!
//! One adapter per group, bound to exactly one processor instance and one
//! group identity for its whole lifetime. Processor failures on committed
//! entries are converted into error responses and replicated like any other
//! outcome; they never abort the adapter or the entries behind them.

use std::{path::Path, sync::Arc};

use tokio::sync::Mutex;
use tracing::{info, warn};

use openraft::entry::RaftPayload as _;
use openraft::{
    EntryPayload, ErrorSubject, ErrorVerb, LogId, Snapshot, SnapshotMeta, StoredMembership,
    storage::RaftStateMachine,
};

use crate::raft::group::GroupIdentity;
use crate::raft::processor::StateProcessor;
use crate::raft::storage::{GroupPaths, io_err, read_bytes, read_json, write_json};
use crate::raft::types::{NodeId, OperationResponse, PeerNode, TypeConfig};

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct PersistedApplied {
    last_applied: Option<LogId<NodeId>>,
    last_membership: StoredMembership<NodeId, PeerNode>,
}

#[derive(Debug)]
struct AppliedState {
    last_applied: Option<LogId<NodeId>>,
    last_membership: StoredMembership<NodeId, PeerNode>,
}

#[derive(Debug, Clone)]
pub struct GroupStateMachine {
    identity: GroupIdentity,
    processor: Arc<Mutex<Box<dyn StateProcessor>>>,
    paths: GroupPaths,
    applied: Arc<Mutex<AppliedState>>,
}

impl GroupStateMachine {
    pub async fn open(
        data_dir: &Path,
        identity: GroupIdentity,
        processor: Arc<Mutex<Box<dyn StateProcessor>>>,
    ) -> Result<Self, openraft::StorageError<NodeId>> {
        let paths = GroupPaths::new(data_dir, &identity);
        paths
            .ensure_dirs()
            .map_err(|e| io_err(ErrorSubject::Store, ErrorVerb::Write, e))?;

        let persisted = read_json::<PersistedApplied>(&paths.sm_meta_json)
            .await
            .map_err(|e| io_err(ErrorSubject::StateMachine, ErrorVerb::Read, e))?;
        let (last_applied, last_membership) = persisted
            .map(|m| (m.last_applied, m.last_membership))
            .unwrap_or((None, StoredMembership::default()));

        // Crash recovery: restore the processor from the state persisted with
        // the last apply, falling back to the newest installed snapshot. The
        // state file is written together with `last_applied`, so the reported
        // applied position never runs ahead of the restored state.
        let state = match read_if_present(&paths.sm_state_json, ErrorSubject::StateMachine).await? {
            Some(bytes) => Some(bytes),
            None => read_if_present(&paths.snapshot_data_json, ErrorSubject::Snapshot(None)).await?,
        };
        if let Some(bytes) = state {
            let mut processor = processor.lock().await;
            processor.restore_snapshot(&bytes).map_err(|e| {
                io_err(
                    ErrorSubject::StateMachine,
                    ErrorVerb::Read,
                    std::io::Error::other(e.to_string()),
                )
            })?;
        }

        Ok(Self {
            identity,
            processor,
            paths,
            applied: Arc::new(Mutex::new(AppliedState {
                last_applied,
                last_membership,
            })),
        })
    }

    pub fn identity(&self) -> &GroupIdentity {
        &self.identity
    }

    async fn persist_applied(&self) -> Result<(), openraft::StorageError<NodeId>> {
        let applied = self.applied.lock().await;
        let meta = PersistedApplied {
            last_applied: applied.last_applied,
            last_membership: applied.last_membership.clone(),
        };
        write_json(&self.paths.sm_meta_json, &meta)
            .await
            .map_err(|e| io_err(ErrorSubject::StateMachine, ErrorVerb::Write, e))
    }
}

async fn read_if_present(
    path: &std::path::Path,
    subject: ErrorSubject<NodeId>,
) -> Result<Option<Vec<u8>>, openraft::StorageError<NodeId>> {
    if !path.exists() {
        return Ok(None);
    }
    read_bytes(path)
        .await
        .map(Some)
        .map_err(|e| io_err(subject, ErrorVerb::Read, e))
}

#[derive(Debug)]
pub struct GroupSnapshotBuilder {
    identity: GroupIdentity,
    processor: Arc<Mutex<Box<dyn StateProcessor>>>,
    applied: Arc<Mutex<AppliedState>>,
    paths: GroupPaths,
}

impl openraft::RaftSnapshotBuilder<TypeConfig> for GroupSnapshotBuilder {
    async fn build_snapshot(
        &mut self,
    ) -> Result<Snapshot<TypeConfig>, openraft::StorageError<NodeId>> {
        let (last_applied, last_membership) = {
            let applied = self.applied.lock().await;
            (applied.last_applied, applied.last_membership.clone())
        };

        let bytes = {
            let processor = self.processor.lock().await;
            processor.save_snapshot().map_err(|e| {
                io_err(
                    ErrorSubject::Snapshot(None),
                    ErrorVerb::Write,
                    std::io::Error::other(e.to_string()),
                )
            })?
        };

        let meta = SnapshotMeta {
            last_log_id: last_applied,
            last_membership,
            snapshot_id: format!(
                "{}-{}",
                self.identity,
                last_applied.as_ref().map(|l| l.index).unwrap_or(0)
            ),
        };

        write_json(&self.paths.snapshot_meta_json, &meta)
            .await
            .map_err(|e| io_err(ErrorSubject::Snapshot(None), ErrorVerb::Write, e))?;
        crate::raft::storage::write_bytes(&self.paths.snapshot_data_json, &bytes)
            .await
            .map_err(|e| io_err(ErrorSubject::Snapshot(None), ErrorVerb::Write, e))?;

        info!(group = %self.identity, snapshot_id = %meta.snapshot_id, "built snapshot");

        Ok(Snapshot {
            meta,
            snapshot: Box::new(std::io::Cursor::new(bytes)),
        })
    }
}

impl RaftStateMachine<TypeConfig> for GroupStateMachine {
    type SnapshotBuilder = GroupSnapshotBuilder;

    async fn applied_state(
        &mut self,
    ) -> Result<
        (Option<LogId<NodeId>>, StoredMembership<NodeId, PeerNode>),
        openraft::StorageError<NodeId>,
    > {
        let applied = self.applied.lock().await;
        Ok((applied.last_applied, applied.last_membership.clone()))
    }

    async fn apply<I>(
        &mut self,
        entries: I,
    ) -> Result<Vec<OperationResponse>, openraft::StorageError<NodeId>>
    where
        I: IntoIterator<Item = openraft::impls::Entry<TypeConfig>> + openraft::OptionalSend,
        I::IntoIter: openraft::OptionalSend,
    {
        let mut responses = Vec::new();

        for entry in entries {
            let log_id = entry.log_id;
            if let Some(membership) = entry.get_membership() {
                let mut applied = self.applied.lock().await;
                applied.last_membership = StoredMembership::new(Some(log_id), membership.clone());
            }

            let resp = match entry.payload {
                EntryPayload::Normal(req) => {
                    let mut processor = self.processor.lock().await;
                    match processor.apply(&req.payload) {
                        Ok(payload) => OperationResponse::Ok { payload },
                        Err(err) => {
                            warn!(
                                group = %self.identity,
                                index = log_id.index,
                                error = %err,
                                "processor rejected committed entry"
                            );
                            OperationResponse::Err {
                                code: "apply_failure".to_string(),
                                message: err.to_string(),
                            }
                        }
                    }
                }
                EntryPayload::Membership(_) | EntryPayload::Blank => OperationResponse::Ok {
                    payload: Vec::new(),
                },
            };

            {
                let mut applied = self.applied.lock().await;
                applied.last_applied = Some(log_id);
            }

            responses.push(resp);
        }

        // Persist the processor state before the applied pointer: a reopen
        // must never see `last_applied` ahead of the state it restores, or
        // the engine would skip replaying the gap.
        let state = {
            let processor = self.processor.lock().await;
            processor.save_snapshot().map_err(|e| {
                io_err(
                    ErrorSubject::StateMachine,
                    ErrorVerb::Write,
                    std::io::Error::other(e.to_string()),
                )
            })?
        };
        crate::raft::storage::write_bytes(&self.paths.sm_state_json, &state)
            .await
            .map_err(|e| io_err(ErrorSubject::StateMachine, ErrorVerb::Write, e))?;
        self.persist_applied().await?;
        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        GroupSnapshotBuilder {
            identity: self.identity.clone(),
            processor: self.processor.clone(),
            applied: self.applied.clone(),
            paths: self.paths.clone(),
        }
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<
        Box<<TypeConfig as openraft::RaftTypeConfig>::SnapshotData>,
        openraft::StorageError<NodeId>,
    > {
        Ok(Box::new(std::io::Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<NodeId, PeerNode>,
        mut snapshot: Box<<TypeConfig as openraft::RaftTypeConfig>::SnapshotData>,
    ) -> Result<(), openraft::StorageError<NodeId>> {
        use tokio::io::{AsyncReadExt as _, AsyncSeekExt as _};

        snapshot
            .seek(std::io::SeekFrom::Start(0))
            .await
            .map_err(|e| io_err(ErrorSubject::Snapshot(None), ErrorVerb::Read, e))?;
        let mut buf = Vec::new();
        snapshot
            .read_to_end(&mut buf)
            .await
            .map_err(|e| io_err(ErrorSubject::Snapshot(None), ErrorVerb::Read, e))?;

        {
            let mut processor = self.processor.lock().await;
            processor.restore_snapshot(&buf).map_err(|e| {
                io_err(
                    ErrorSubject::Snapshot(None),
                    ErrorVerb::Read,
                    std::io::Error::other(e.to_string()),
                )
            })?;
        }

        {
            let mut applied = self.applied.lock().await;
            applied.last_applied = meta.last_log_id;
            applied.last_membership = meta.last_membership.clone();
        }

        crate::raft::storage::write_bytes(&self.paths.sm_state_json, &buf)
            .await
            .map_err(|e| io_err(ErrorSubject::StateMachine, ErrorVerb::Write, e))?;
        self.persist_applied().await?;
        write_json(&self.paths.snapshot_meta_json, meta)
            .await
            .map_err(|e| io_err(ErrorSubject::Snapshot(None), ErrorVerb::Write, e))?;
        crate::raft::storage::write_bytes(&self.paths.snapshot_data_json, &buf)
            .await
            .map_err(|e| io_err(ErrorSubject::Snapshot(None), ErrorVerb::Write, e))?;

        info!(group = %self.identity, snapshot_id = %meta.snapshot_id, "installed snapshot");
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, openraft::StorageError<NodeId>> {
        let meta = read_json::<SnapshotMeta<NodeId, PeerNode>>(&self.paths.snapshot_meta_json)
            .await
            .map_err(|e| io_err(ErrorSubject::Snapshot(None), ErrorVerb::Read, e))?;
        let Some(meta) = meta else {
            return Ok(None);
        };
        let bytes = read_bytes(&self.paths.snapshot_data_json)
            .await
            .map_err(|e| io_err(ErrorSubject::Snapshot(None), ErrorVerb::Read, e))?;
        Ok(Some(Snapshot {
            meta,
            snapshot: Box::new(std::io::Cursor::new(bytes)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use openraft::RaftSnapshotBuilder as _;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::processors::counter::CounterStateProcessor;
    use crate::raft::types::OperationRequest;

    fn counter() -> Arc<Mutex<Box<dyn StateProcessor>>> {
        Arc::new(Mutex::new(
            Box::new(CounterStateProcessor::default()) as Box<dyn StateProcessor>
        ))
    }

    fn entry(index: u64, payload: serde_json::Value) -> openraft::impls::Entry<TypeConfig> {
        openraft::impls::Entry {
            log_id: LogId::new(openraft::CommittedLeaderId::new(1, 1), index),
            payload: EntryPayload::Normal(OperationRequest {
                payload: serde_json::to_vec(&payload).unwrap(),
            }),
        }
    }

    async fn open_adapter(
        dir: &Path,
        processor: Arc<Mutex<Box<dyn StateProcessor>>>,
    ) -> GroupStateMachine {
        GroupStateMachine::open(dir, GroupIdentity::new("counter", 0), processor)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn applies_committed_entries_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let processor = counter();
        let mut adapter = open_adapter(tmp.path(), processor).await;

        let responses = adapter
            .apply(vec![
                entry(1, serde_json::json!({"op": "increment", "delta": 1})),
                entry(2, serde_json::json!({"op": "increment", "delta": 4})),
            ])
            .await
            .unwrap();

        assert_eq!(responses.len(), 2);
        let OperationResponse::Ok { payload } = &responses[1] else {
            panic!("expected success: {responses:?}");
        };
        let value: serde_json::Value = serde_json::from_slice(payload).unwrap();
        assert_eq!(value["value"], 5);

        let (last_applied, _) = adapter.applied_state().await.unwrap();
        assert_eq!(last_applied.unwrap().index, 2);
    }

    #[tokio::test]
    async fn processor_failure_is_isolated() {
        let tmp = tempfile::tempdir().unwrap();
        let processor = counter();
        let mut adapter = open_adapter(tmp.path(), processor).await;

        let responses = adapter
            .apply(vec![
                entry(1, serde_json::json!({"op": "increment", "delta": 1})),
                entry(2, serde_json::json!({"op": "detonate"})),
                entry(3, serde_json::json!({"op": "increment", "delta": 1})),
            ])
            .await
            .unwrap();

        assert!(matches!(responses[0], OperationResponse::Ok { .. }));
        let OperationResponse::Err { code, .. } = &responses[1] else {
            panic!("expected failure: {responses:?}");
        };
        assert_eq!(code, "apply_failure");
        // The poisoned entry did not stop the shard.
        let OperationResponse::Ok { payload } = &responses[2] else {
            panic!("expected success after failure: {responses:?}");
        };
        let value: serde_json::Value = serde_json::from_slice(payload).unwrap();
        assert_eq!(value["value"], 2);
    }

    #[tokio::test]
    async fn snapshot_round_trips_into_fresh_processor() {
        let tmp = tempfile::tempdir().unwrap();
        let mut adapter = open_adapter(tmp.path(), counter()).await;
        adapter
            .apply(vec![entry(
                1,
                serde_json::json!({"op": "increment", "delta": 7}),
            )])
            .await
            .unwrap();

        let snapshot = adapter
            .get_snapshot_builder()
            .await
            .build_snapshot()
            .await
            .unwrap();

        let tmp2 = tempfile::tempdir().unwrap();
        let fresh = counter();
        let mut restored = open_adapter(tmp2.path(), fresh.clone()).await;
        restored
            .install_snapshot(&snapshot.meta, snapshot.snapshot)
            .await
            .unwrap();

        let responses = restored
            .apply(vec![entry(
                2,
                serde_json::json!({"op": "increment", "delta": 1}),
            )])
            .await
            .unwrap();
        let OperationResponse::Ok { payload } = &responses[0] else {
            panic!("expected success: {responses:?}");
        };
        let value: serde_json::Value = serde_json::from_slice(payload).unwrap();
        assert_eq!(value["value"], 8);
    }

    #[tokio::test]
    async fn reopen_recovers_applied_state_without_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut adapter = open_adapter(tmp.path(), counter()).await;
            adapter
                .apply(
                    (1..=3)
                        .map(|i| entry(i, serde_json::json!({"op": "increment", "delta": 2})))
                        .collect::<Vec<_>>(),
                )
                .await
                .unwrap();
        }

        let fresh = counter();
        let mut restored = open_adapter(tmp.path(), fresh.clone()).await;

        // The reported applied position and the restored state must agree.
        let (last_applied, _) = restored.applied_state().await.unwrap();
        assert_eq!(last_applied.unwrap().index, 3);
        let payload = fresh
            .lock()
            .await
            .read(&serde_json::to_vec(&serde_json::json!({"op": "get"})).unwrap())
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["value"], 6);
    }

    #[tokio::test]
    async fn reopen_recovers_from_persisted_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut adapter = open_adapter(tmp.path(), counter()).await;
            adapter
                .apply(vec![entry(
                    1,
                    serde_json::json!({"op": "increment", "delta": 3}),
                )])
                .await
                .unwrap();
            adapter
                .get_snapshot_builder()
                .await
                .build_snapshot()
                .await
                .unwrap();
        }

        let fresh = counter();
        let _adapter = open_adapter(tmp.path(), fresh.clone()).await;
        let mut processor = fresh.lock().await;
        let payload = processor
            .apply(&serde_json::to_vec(&serde_json::json!({"op": "get"})).unwrap())
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["value"], 3);
    }

    #[tokio::test]
    async fn blank_entries_produce_empty_success() {
        let tmp = tempfile::tempdir().unwrap();
        let mut adapter = open_adapter(tmp.path(), counter()).await;
        let responses = adapter
            .apply(vec![openraft::impls::Entry {
                log_id: LogId::new(openraft::CommittedLeaderId::new(1, 1), 1),
                payload: EntryPayload::Blank,
            }])
            .await
            .unwrap();
        assert_eq!(
            responses,
            vec![OperationResponse::Ok { payload: vec![] }]
        );
    }
}
