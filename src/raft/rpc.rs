//! HTTP surface of one node.
//!
//! Two concerns share the listener: engine RPC between peers (append, vote,
//! snapshot — dispatched per group) and the write/read front end consumed by
//! brokers and clients.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use openraft::error::RaftError;

use crate::error::MetaError;
use crate::raft::coordinator::MetaRaftHandle;
use crate::raft::route::RouteEntry;
use crate::raft::types::{NodeId, TypeConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRequest {
    pub group_id: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadRequest {
    pub group_id: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    fn ok(payload: Vec<u8>) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error: None,
        }
    }

    fn err(err: &MetaError) -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(RpcError {
                code: err.code().to_string(),
                message: err.to_string(),
            }),
        }
    }
}

/// Lookup failures fail the HTTP request; per-operation outcomes ride in the
/// response body so callers distinguish routing problems from business ones.
fn status_for(err: &MetaError) -> StatusCode {
    match err {
        MetaError::MalformedGroupId { .. } => StatusCode::BAD_REQUEST,
        MetaError::UnknownCategory { .. } | MetaError::ShardOutOfRange { .. } => {
            StatusCode::NOT_FOUND
        }
        MetaError::NotLeader { .. } => StatusCode::SERVICE_UNAVAILABLE,
        MetaError::SubmissionRejected { .. } => StatusCode::TOO_MANY_REQUESTS,
        MetaError::ApplyFailure { .. } => StatusCode::OK,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn build_rpc_router(handle: MetaRaftHandle) -> Router {
    Router::new()
        .route("/raft/:category/:shard/append", post(append_entries))
        .route("/raft/:category/:shard/vote", post(vote))
        .route("/raft/:category/:shard/snapshot", post(install_snapshot))
        .route("/meta/write", post(write))
        .route("/meta/read", post(read))
        .route("/meta/routes", get(routes))
        .with_state(handle)
}

async fn append_entries(
    State(handle): State<MetaRaftHandle>,
    Path((category, shard)): Path<(String, u32)>,
    Json(req): Json<openraft::raft::AppendEntriesRequest<TypeConfig>>,
) -> Result<Json<Result<openraft::raft::AppendEntriesResponse<NodeId>, RaftError<NodeId>>>, StatusCode>
{
    let holder = handle
        .group(&category, shard)
        .map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(Json(holder.raft().append_entries(req).await))
}

async fn vote(
    State(handle): State<MetaRaftHandle>,
    Path((category, shard)): Path<(String, u32)>,
    Json(req): Json<openraft::raft::VoteRequest<NodeId>>,
) -> Result<Json<Result<openraft::raft::VoteResponse<NodeId>, RaftError<NodeId>>>, StatusCode> {
    let holder = handle
        .group(&category, shard)
        .map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(Json(holder.raft().vote(req).await))
}

async fn install_snapshot(
    State(handle): State<MetaRaftHandle>,
    Path((category, shard)): Path<(String, u32)>,
    Json(req): Json<openraft::raft::InstallSnapshotRequest<TypeConfig>>,
) -> Result<
    Json<
        Result<
            openraft::raft::InstallSnapshotResponse<NodeId>,
            RaftError<NodeId, openraft::error::InstallSnapshotError>,
        >,
    >,
    StatusCode,
> {
    let holder = handle
        .group(&category, shard)
        .map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(Json(holder.raft().install_snapshot(req).await))
}

async fn write(
    State(handle): State<MetaRaftHandle>,
    Json(req): Json<WriteRequest>,
) -> (StatusCode, Json<RpcResponse>) {
    let holder = match handle.get_group_holder(&req.group_id) {
        Ok(holder) => holder,
        Err(err) => return (status_for(&err), Json(RpcResponse::err(&err))),
    };

    let (closure, rx) = crate::raft::closure::OperationClosure::channel();
    handle.apply_operation(holder, req.payload, closure);

    match rx.await {
        Ok(Ok(payload)) => (StatusCode::OK, Json(RpcResponse::ok(payload))),
        Ok(Err(err)) => (status_for(&err), Json(RpcResponse::err(&err))),
        // The closure resolves itself on drop, so a closed channel means the
        // sender never ran at all.
        Err(_) => {
            let err = MetaError::SubmissionRejected {
                reason: "operation abandoned during shutdown".to_string(),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(RpcResponse::err(&err)))
        }
    }
}

async fn read(
    State(handle): State<MetaRaftHandle>,
    Json(req): Json<ReadRequest>,
) -> (StatusCode, Json<RpcResponse>) {
    let holder = match handle.get_group_holder(&req.group_id) {
        Ok(holder) => holder,
        Err(err) => return (status_for(&err), Json(RpcResponse::err(&err))),
    };

    match handle.read_operation(holder, &req.payload).await {
        Ok(payload) => (StatusCode::OK, Json(RpcResponse::ok(payload))),
        Err(err) => (status_for(&err), Json(RpcResponse::err(&err))),
    }
}

async fn routes(State(handle): State<MetaRaftHandle>) -> Json<Vec<RouteEntry>> {
    Json(handle.route_table().snapshot())
}
