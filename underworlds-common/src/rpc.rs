//! The RPC surface.
//!
//! The transport itself — gRPC, HTTP/2, whatever carries these calls over
//! the wire — is an external collaborator and is not implemented in this
//! workspace. What lives here is the *contract*: one async method per
//! server operation, plus the request and response shapes, expressed as a
//! single object-safe trait so the
//! replication engine can be exercised against any transport (including the
//! in-memory [`underworlds_client::testing::MockRpc`] used by the test
//! suite) without caring which one it is.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::{ClientId, NodeId, SituationId};
use crate::node::Node;
use crate::situation::Situation;

/// Identifies the (client, world) pair a call is scoped to, mirroring the
/// `Context` tuple threaded through every per-world RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcContext {
    pub client_id: ClientId,
    pub world: String,
}

/// A pull-stream batch entry's action code for the nodes collection.
/// Wire-encoded as a `u8` discriminant (`NEW = 0, UPDATE = 1, DELETE = 2`).
/// `Unknown` carries any other code a
/// future/buggy server might send: an unrecognized action is a
/// [`crate::error::Error::ProtocolViolation`], fatal for the background
/// task that observes it. Modeling it this way (rather than failing to
/// deserialize the whole batch) lets that failure mode be exercised the
/// same way any other invalidation is.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(into = "u8", from = "u8")]
pub enum NodeAction {
    New,
    Update,
    Delete,
    Unknown(u8),
}

impl From<u8> for NodeAction {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::New,
            1 => Self::Update,
            2 => Self::Delete,
            other => Self::Unknown(other),
        }
    }
}

impl From<NodeAction> for u8 {
    fn from(action: NodeAction) -> u8 {
        match action {
            NodeAction::New => 0,
            NodeAction::Update => 1,
            NodeAction::Delete => 2,
            NodeAction::Unknown(code) => code,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInvalidation {
    pub action: NodeAction,
    pub id: NodeId,
}

/// A pull-stream batch entry's action code for the timeline. See
/// [`NodeAction`] for the `Unknown` rationale.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(into = "u8", from = "u8")]
pub enum TimelineAction {
    Start,
    Event,
    End,
    Unknown(u8),
}

impl From<u8> for TimelineAction {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Start,
            1 => Self::Event,
            2 => Self::End,
            other => Self::Unknown(other),
        }
    }
}

impl From<TimelineAction> for u8 {
    fn from(action: TimelineAction) -> u8 {
        match action {
            TimelineAction::Start => 0,
            TimelineAction::Event => 1,
            TimelineAction::End => 2,
            TimelineAction::Unknown(code) => code,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineInvalidation {
    pub action: TimelineAction,
    pub id: SituationId,
    /// The full situation record for `Start`/`Event`; absent for `End`,
    /// which only needs the id to locate the already-cached entry.
    ///
    /// The background task needs to append a full situation record on
    /// `Start`/`Event`, and there is no `getSituation` operation to fetch
    /// one by id after the fact, so the record travels with the
    /// invalidation itself instead of triggering a second round trip. See
    /// DESIGN.md.
    pub situation: Option<Situation>,
}

/// The server's directory of clients and worlds, returned by `topology()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topology {
    /// Client name -> per-world `(link type, last-activity timestamp)`.
    pub clients: HashMap<String, HashMap<String, (String, f64)>>,
    pub worlds: Vec<String>,
}

/// Tuneables governing the replication engine.
#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    /// How often a proxy's background task pulls an invalidation batch.
    pub invalidation_period: Duration,
    /// Deadline applied to every RPC call.
    pub rpc_deadline: Duration,
    /// Grace wait in `extend-by-one` before declaring `InconsistentState`.
    pub extend_grace: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            invalidation_period: Duration::from_millis(10),
            rpc_deadline: Duration::from_secs(1),
            extend_grace: Duration::from_millis(10),
        }
    }
}

/// The abstract RPC surface a client [`Context`](../../underworlds_client/struct.Context.html)
/// speaks against. Implementations are expected to be cheap to
/// clone (e.g. an `Arc` around a connection pool or channel) since every
/// proxy holds a handle to it.
#[async_trait::async_trait]
pub trait UnderworldsRpc: Send + Sync + std::fmt::Debug {
    /// Registers a new client under `name`, returning its assigned id.
    async fn hello(&self, name: &str) -> Result<ClientId, RpcError>;

    /// The nodes collection's current known size.
    async fn get_nodes_len(&self, ctx: &RpcContext) -> Result<usize, RpcError>;

    /// The initial (stale) set of node ids known to the server.
    async fn get_nodes_ids(&self, ctx: &RpcContext) -> Result<Vec<NodeId>, RpcError>;

    /// The id of the world's distinguished root node.
    async fn get_root_node(&self, ctx: &RpcContext) -> Result<NodeId, RpcError>;

    /// Fetches one node. `Err(RpcError::NotFound)` if it does not exist.
    async fn get_node(&self, ctx: &RpcContext, id: NodeId) -> Result<Node, RpcError>;

    /// Write-through upsert.
    async fn update_node(&self, ctx: &RpcContext, node: &Node) -> Result<(), RpcError>;

    /// Write-through delete.
    async fn delete_node(&self, ctx: &RpcContext, node: &Node) -> Result<(), RpcError>;

    /// Pulls one batch of node invalidations.
    async fn get_node_invalidations(
        &self,
        ctx: &RpcContext,
    ) -> Result<Vec<NodeInvalidation>, RpcError>;

    /// The world's creation time.
    async fn timeline_origin(&self, ctx: &RpcContext) -> Result<f64, RpcError>;

    /// Tells the server a situation has begun.
    async fn timeline_start(&self, ctx: &RpcContext, situation: &Situation) -> Result<(), RpcError>;

    /// Tells the server an instantaneous event occurred.
    async fn timeline_event(&self, ctx: &RpcContext, situation: &Situation) -> Result<(), RpcError>;

    /// Tells the server a running situation has ended.
    async fn timeline_end(&self, ctx: &RpcContext, situation_id: SituationId) -> Result<(), RpcError>;

    /// Pulls one batch of timeline invalidations.
    async fn get_timeline_invalidations(
        &self,
        ctx: &RpcContext,
    ) -> Result<Vec<TimelineInvalidation>, RpcError>;

    /// Asks the server to replace `dst`'s contents with a deep copy of
    /// `src`'s.
    async fn copy_world(&self, dst: &str, src: &str) -> Result<(), RpcError>;

    /// The server's client/world directory.
    async fn topology(&self) -> Result<Topology, RpcError>;

    /// Server uptime, in seconds.
    async fn uptime(&self) -> Result<f64, RpcError>;

    /// Pushes opaque mesh bytes under `id`.
    async fn push_mesh(&self, id: &str, data: &[u8]) -> Result<(), RpcError>;

    /// Fetches opaque mesh bytes previously pushed under `id`.
    async fn mesh(&self, id: &str) -> Result<Vec<u8>, RpcError>;

    /// Whether mesh data exists under `id`.
    async fn has_mesh(&self, id: &str) -> Result<bool, RpcError>;
}

/// Errors a transport can report back to the replication engine. Distinct
/// from [`crate::error::Error`]: this is what a transport *returns*; the
/// engine translates it (deadline exceeded, channel closed) into
/// [`crate::error::Error::TransportFailure`], except `NotFound` which each
/// call site turns into the more specific `UnknownKey`.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("not found")]
    NotFound,
    #[error("rpc deadline exceeded")]
    DeadlineExceeded,
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}
