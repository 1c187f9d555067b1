//! Lazy, invalidation-driven replica of a world's node set.
//!
//! This is the hard part of the client: it has to expose both index-ordered
//! and key-ordered access to a collection that a background task is
//! concurrently growing, shrinking and invalidating. A [`tokio::sync::Mutex`]
//! guards the shared state, and a [`tokio::sync::Notify`] backs change
//! notification.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use underworlds_common::rpc::{ClientConfig, NodeAction, RpcContext, RpcError, UnderworldsRpc};
use underworlds_common::{Error, Node, NodeId, Result};

/// A key into the nodes collection: either its materialized position, or
/// its id. See [`NodesProxy::get`].
#[derive(Debug, Clone, Copy)]
pub enum NodeKey {
    Index(usize),
    Id(NodeId),
}

impl From<usize> for NodeKey {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

impl From<NodeId> for NodeKey {
    fn from(id: NodeId) -> Self {
        Self::Id(id)
    }
}

#[derive(Debug, Default)]
struct NodesState {
    cache: HashMap<NodeId, Node>,
    /// Ordered sequence of ids the user has ever observed by index. An id
    /// keeps its position once materialized, until a lower-positioned id is
    /// removed and everything above it shifts down.
    known_ids: Vec<NodeId>,
    pending_updates: VecDeque<NodeId>,
    pending_deletes: VecDeque<NodeId>,
    length: usize,
    /// Ids whose most recent write this client originated. Reserved for an
    /// optimization (suppressing the redundant re-fetch of a node the
    /// client itself just wrote); never required for correctness, and its
    /// presence never changes an observable read.
    self_propagating: HashSet<NodeId>,
    /// Bumped on every applied invalidation; lets `wait_for_changes` detect
    /// a change it raced with instead of missing the notification.
    version: u64,
    /// Set once the background task observes an invalidation action code
    /// it does not recognize. The task stops; this makes that fact visible
    /// to callers instead of just going quiet.
    protocol_violation: Option<u8>,
}

/// Lazy, cache-coherent replica of a world's node collection.
///
/// Reads consult the local cache and fetch from the server on a miss or a
/// pending invalidation. Writes ([`Self::update`], [`Self::remove`]) are
/// write-through: they are sent to the server and are **not** reflected in
/// the local cache until the server's own invalidation for that write
/// arrives on the background task, typically within a few milliseconds.
/// Reading immediately after writing may observe the old value (or
/// `UnknownKey`, for a brand-new node).
pub struct NodesProxy {
    rpc: Arc<dyn UnderworldsRpc>,
    ctx: RpcContext,
    config: ClientConfig,
    root_id: NodeId,
    state: Mutex<NodesState>,
    changed: Notify,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for NodesProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodesProxy")
            .field("ctx", &self.ctx)
            .field("config", &self.config)
            .field("root_id", &self.root_id)
            .finish_non_exhaustive()
    }
}

impl NodesProxy {
    pub(crate) async fn new(
        rpc: Arc<dyn UnderworldsRpc>,
        ctx: RpcContext,
        config: ClientConfig,
    ) -> Result<Self> {
        let length = rpc.get_nodes_len(&ctx).await.map_err(Error::transport)?;
        let initial_ids = rpc.get_nodes_ids(&ctx).await.map_err(Error::transport)?;
        let root_id = rpc.get_root_node(&ctx).await.map_err(Error::transport)?;

        let mut state = NodesState {
            length,
            pending_updates: VecDeque::from(initial_ids),
            ..Default::default()
        };

        // The root is eagerly materialized at construction time, so it is
        // always among `known_ids` afterwards.
        let root_node = rpc
            .get_node(&ctx, root_id)
            .await
            .map_err(Error::transport)?;
        state.cache.insert(root_id, root_node);
        if let Some(pos) = state.pending_updates.iter().position(|&id| id == root_id) {
            state.pending_updates.remove(pos);
        }
        state.known_ids.push(root_id);

        let this = Self {
            rpc,
            ctx,
            config,
            root_id,
            state: Mutex::new(state),
            changed: Notify::new(),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        };

        Ok(this)
    }

    /// Spawns the background invalidation poller. Split from `new` so the
    /// task can hold an `Arc<Self>` rather than borrowing a partially
    /// constructed proxy.
    pub(crate) fn spawn(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run().await });
        // `new` just created `task`; no prior handle to race with.
        *self
            .task
            .try_lock()
            .expect("no other task touches `task` before spawn")
            = Some(handle);
    }

    pub fn root_id(&self) -> NodeId {
        self.root_id
    }

    /// The collection's current known size, maintained by invalidation
    /// deltas (+1 per NEW, -1 per DELETE).
    pub async fn length(&self) -> usize {
        self.state.lock().await.length
    }

    /// Reads a node by position or by id.
    pub async fn get(&self, key: impl Into<NodeKey>) -> Result<Node> {
        self.check_protocol_violation().await?;
        self.drain_pending_deletes().await;

        let id = match key.into() {
            NodeKey::Index(index) => {
                let length = self.state.lock().await.length;
                if index >= length {
                    return Err(Error::IndexOutOfRange { index, length });
                }
                loop {
                    let known_len = self.state.lock().await.known_ids.len();
                    if index < known_len {
                        break;
                    }
                    self.extend_by_one().await?;
                }
                self.state.lock().await.known_ids[index]
            }
            NodeKey::Id(id) => id,
        };

        self.resolve_id(id).await
    }

    /// Sends `node` to the server. Aliased as [`Self::append`]. Write-
    /// through: does not mutate the local cache.
    pub async fn update(&self, node: &Node) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            state.self_propagating.insert(node.id);
        }
        self.rpc
            .update_node(&self.ctx, node)
            .await
            .map_err(Error::transport)
    }

    /// Alias for [`Self::update`].
    pub async fn append(&self, node: &Node) -> Result<()> {
        self.update(node).await
    }

    /// Sends a delete request for `node`. Local removal happens only when
    /// the corresponding invalidation arrives.
    pub async fn remove(&self, node: &Node) -> Result<()> {
        self.rpc
            .delete_node(&self.ctx, node)
            .await
            .map_err(Error::transport)
    }

    /// Blocks until any invalidation has been applied, or `timeout`
    /// elapses. Returns whether a change was observed.
    pub async fn wait_for_changes(&self, timeout: Option<Duration>) -> bool {
        let wait = self.wait_for_version_change();
        match timeout {
            Some(d) => tokio::time::timeout(d, wait).await.is_ok(),
            None => {
                wait.await;
                true
            }
        }
    }

    async fn wait_for_version_change(&self) {
        let start = self.state.lock().await.version;
        loop {
            let notified = self.changed.notified();
            if self.state.lock().await.version != start {
                return;
            }
            notified.await;
            if self.state.lock().await.version != start {
                return;
            }
        }
    }

    /// Flips `running` and joins the background task. Safe to call more
    /// than once.
    pub async fn finalize(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
    }

    async fn check_protocol_violation(&self) -> Result<()> {
        match self.state.lock().await.protocol_violation {
            Some(code) => Err(Error::ProtocolViolation {
                action: format!("unknown node action code {code}"),
            }),
            None => Ok(()),
        }
    }

    async fn drain_pending_deletes(&self) {
        let mut state = self.state.lock().await;
        while let Some(id) = state.pending_deletes.pop_front() {
            match state.known_ids.iter().position(|&known| known == id) {
                Some(pos) => {
                    state.known_ids.remove(pos);
                    state.cache.remove(&id);
                }
                None => {
                    tracing::warn!(%id, "node already removed; feels like a synchro issue");
                }
            }
        }
    }

    /// Materializes one more position in `known_ids` by consuming a pending
    /// invalidation. Takes from the tail of `pending_updates` rather than
    /// the front — the one place this queue is not drained FIFO.
    async fn extend_by_one(&self) -> Result<()> {
        let popped = self.state.lock().await.pending_updates.pop_back();
        let id = match popped {
            Some(id) => id,
            None => {
                tracing::warn!("slow propagation? waiting for new/updated node notifications");
                let notified = self.changed.notified();
                let _ = tokio::time::timeout(self.config.extend_grace, notified).await;
                match self.state.lock().await.pending_updates.pop_back() {
                    Some(id) => id,
                    None => {
                        tracing::error!(
                            "inconsistency detected: the server has not notified all the \
                             node updates, or the transport is really slow"
                        );
                        return Err(Error::InconsistentState);
                    }
                }
            }
        };

        let node = self.fetch_node(id).await?;
        let mut state = self.state.lock().await;
        state.cache.insert(id, node);
        state.known_ids.push(id);
        Ok(())
    }

    /// Resolves `id` to its current node value, refreshing from the server
    /// if it is stale or not yet cached.
    async fn resolve_id(&self, id: NodeId) -> Result<Node> {
        let was_stale = {
            let mut state = self.state.lock().await;
            match state.pending_updates.iter().position(|&pending| pending == id) {
                Some(pos) => {
                    state.pending_updates.remove(pos);
                    true
                }
                None => false,
            }
        };

        if was_stale {
            let node = self.fetch_node(id).await?;
            let mut state = self.state.lock().await;
            state.self_propagating.remove(&id);
            state.cache.insert(id, node.clone());
            if !state.known_ids.contains(&id) {
                state.known_ids.push(id);
            }
            return Ok(node);
        }

        let cached = self.state.lock().await.cache.get(&id).cloned();
        match cached {
            Some(node) => Ok(node),
            None => {
                let node = self.fetch_node(id).await?;
                let mut state = self.state.lock().await;
                state.cache.insert(id, node.clone());
                if !state.known_ids.contains(&id) {
                    state.known_ids.push(id);
                }
                Ok(node)
            }
        }
    }

    async fn fetch_node(&self, id: NodeId) -> Result<Node> {
        match tokio::time::timeout(self.config.rpc_deadline, self.rpc.get_node(&self.ctx, id)).await
        {
            Ok(Ok(node)) => Ok(node),
            Ok(Err(RpcError::NotFound)) => Err(Error::unknown_node(id)),
            Ok(Err(other)) => Err(Error::transport(other)),
            Err(_elapsed) => Err(Error::transport(RpcError::DeadlineExceeded)),
        }
    }

    async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.invalidation_period);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let batch = match tokio::time::timeout(
                self.config.rpc_deadline,
                self.rpc.get_node_invalidations(&self.ctx),
            )
            .await
            {
                Ok(Ok(batch)) => batch,
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "failed to pull node invalidations; retrying next tick");
                    continue;
                }
                Err(_elapsed) => {
                    tracing::warn!("node invalidation pull timed out; retrying next tick");
                    continue;
                }
            };

            if batch.is_empty() {
                continue;
            }

            let mut state = self.state.lock().await;
            for invalidation in batch {
                match invalidation.action {
                    NodeAction::New => {
                        tracing::debug!(id = %invalidation.id, "server notification: new node");
                        state.length += 1;
                        if !state.pending_updates.contains(&invalidation.id) {
                            state.pending_updates.push_back(invalidation.id);
                        }
                    }
                    NodeAction::Update => {
                        tracing::debug!(id = %invalidation.id, "server notification: update node");
                        if !state.pending_updates.contains(&invalidation.id) {
                            state.pending_updates.push_back(invalidation.id);
                        }
                    }
                    NodeAction::Delete => {
                        tracing::debug!(id = %invalidation.id, "server notification: delete node");
                        state.length = state.length.saturating_sub(1);
                        state.pending_deletes.push_back(invalidation.id);
                    }
                    NodeAction::Unknown(code) => {
                        tracing::error!(code, "unexpected node invalidation action; stopping poller");
                        state.protocol_violation = Some(code);
                        state.version += 1;
                        drop(state);
                        self.changed.notify_waiters();
                        return;
                    }
                }
                state.version += 1;
            }
            drop(state);
            self.changed.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use underworlds_common::ClientId;

    use crate::testing::MockRpc;

    use super::*;

    async fn rigged(rpc: &Arc<MockRpc>, world: &str) -> NodesProxy {
        let ctx = RpcContext {
            client_id: ClientId::random(),
            world: world.to_string(),
        };
        NodesProxy::new(Arc::clone(rpc) as Arc<dyn UnderworldsRpc>, ctx, ClientConfig::default())
            .await
            .expect("construct NodesProxy")
    }

    #[tokio::test]
    async fn index_past_length_is_out_of_range() {
        let mock = Arc::new(MockRpc::new());
        let nodes = rigged(&mock, "w").await;

        let err = nodes.get(NodeKey::Index(5)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::IndexOutOfRange { index: 5, length: 1 }
        ));
    }

    #[tokio::test]
    async fn unknown_id_is_unknown_key() {
        let mock = Arc::new(MockRpc::new());
        let nodes = rigged(&mock, "w").await;

        let err = nodes.get(NodeKey::Id(NodeId::random())).await.unwrap_err();
        assert!(matches!(err, Error::UnknownKey { .. }));
    }

    #[tokio::test]
    async fn root_is_materialized_at_construction() {
        let mock = Arc::new(MockRpc::new());
        let nodes = rigged(&mock, "w").await;

        let root = nodes.get(NodeKey::Id(nodes.root_id())).await.expect("root readable");
        assert_eq!(root.id, nodes.root_id());
        assert_eq!(nodes.length().await, 1);
    }

    #[tokio::test]
    async fn repeated_get_without_invalidation_is_stable() {
        let mock = Arc::new(MockRpc::new());
        let nodes = rigged(&mock, "w").await;

        let a = nodes.get(NodeKey::Index(0)).await.unwrap();
        let b = nodes.get(NodeKey::Index(0)).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.last_update, b.last_update);
    }
}
