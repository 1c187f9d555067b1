//! An in-memory [`UnderworldsRpc`] used to exercise the replication engine
//! without a real transport or server (both are out of scope for this
//! crate; this is not an attempt at either — just enough server-side
//! bookkeeping to drive a client through a set of end-to-end scenarios).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::Mutex;

use underworlds_common::node::{Node, NodeType};
use underworlds_common::rpc::{
    NodeAction, NodeInvalidation, RpcContext, RpcError, TimelineAction, TimelineInvalidation,
    Topology, UnderworldsRpc,
};
use underworlds_common::{ClientId, NodeId, Situation, SituationId};

struct MockWorld {
    nodes: HashMap<NodeId, Node>,
    root_id: NodeId,
    origin: f64,
    node_invalidations: VecDeque<NodeInvalidation>,
    situations: HashMap<SituationId, Situation>,
    timeline_invalidations: VecDeque<TimelineInvalidation>,
}

impl MockWorld {
    fn new(now: f64) -> Self {
        let root = Node::new(Node::ROOT_NAME, NodeType::Entity, now);
        let root_id = root.id;
        let mut nodes = HashMap::new();
        nodes.insert(root_id, root);
        Self {
            nodes,
            root_id,
            origin: now,
            node_invalidations: VecDeque::new(),
            situations: HashMap::new(),
            timeline_invalidations: VecDeque::new(),
        }
    }
}

/// A single-process stand-in for an Underworlds server, good enough to
/// drive [`crate::context::Context`] end to end in tests. Every call
/// behaves as if it round-tripped over a network: it only ever reflects
/// state back through [`UnderworldsRpc::get_node`] and the invalidation
/// pull methods, never by reaching into a proxy directly.
#[derive(Debug)]
pub struct MockRpc {
    worlds: Mutex<HashMap<String, MockWorld>>,
    clients: Mutex<Vec<String>>,
    meshes: Mutex<HashMap<String, Vec<u8>>>,
    next_client_id: AtomicU64,
    started_at: Instant,
    /// Test-only: counts `get_node` calls, so scenarios that assert "fetched
    /// exactly once" don't have to instrument the proxy itself.
    get_node_calls: AtomicU64,
}

impl std::fmt::Debug for MockWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockWorld")
            .field("nodes", &self.nodes.len())
            .field("root_id", &self.root_id)
            .finish()
    }
}

impl Default for MockRpc {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRpc {
    pub fn new() -> Self {
        Self {
            worlds: Mutex::new(HashMap::new()),
            clients: Mutex::new(Vec::new()),
            meshes: Mutex::new(HashMap::new()),
            next_client_id: AtomicU64::new(0),
            started_at: Instant::now(),
            get_node_calls: AtomicU64::new(0),
        }
    }

    fn now(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    /// Total number of `get_node` calls served so far.
    pub fn get_node_call_count(&self) -> u64 {
        self.get_node_calls.load(Ordering::Relaxed)
    }

    async fn with_world<T>(&self, name: &str, f: impl FnOnce(&mut MockWorld) -> T) -> T {
        let mut worlds = self.worlds.lock().await;
        let now = self.now();
        let world = worlds.entry(name.to_string()).or_insert_with(|| MockWorld::new(now));
        f(world)
    }

    /// Test-only direct accessor, for seeding a world's nodes/situations
    /// before a client connects, bypassing the RPC surface.
    pub async fn seed_node(&self, world: &str, node: Node) {
        self.with_world(world, |w| {
            w.nodes.insert(node.id, node);
        })
        .await;
    }
}

#[async_trait::async_trait]
impl UnderworldsRpc for MockRpc {
    async fn hello(&self, name: &str) -> Result<ClientId, RpcError> {
        self.clients.lock().await.push(name.to_string());
        let _ = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        Ok(ClientId::random())
    }

    async fn get_nodes_len(&self, ctx: &RpcContext) -> Result<usize, RpcError> {
        Ok(self.with_world(&ctx.world, |w| w.nodes.len()).await)
    }

    async fn get_nodes_ids(&self, ctx: &RpcContext) -> Result<Vec<NodeId>, RpcError> {
        Ok(self
            .with_world(&ctx.world, |w| w.nodes.keys().copied().collect())
            .await)
    }

    async fn get_root_node(&self, ctx: &RpcContext) -> Result<NodeId, RpcError> {
        Ok(self.with_world(&ctx.world, |w| w.root_id).await)
    }

    async fn get_node(&self, ctx: &RpcContext, id: NodeId) -> Result<Node, RpcError> {
        self.get_node_calls.fetch_add(1, Ordering::Relaxed);
        self.with_world(&ctx.world, |w| w.nodes.get(&id).cloned())
            .await
            .ok_or(RpcError::NotFound)
    }

    async fn update_node(&self, ctx: &RpcContext, node: &Node) -> Result<(), RpcError> {
        self.with_world(&ctx.world, |w| {
            let action = if w.nodes.contains_key(&node.id) {
                NodeAction::Update
            } else {
                NodeAction::New
            };
            w.nodes.insert(node.id, node.clone());
            w.node_invalidations.push_back(NodeInvalidation {
                action,
                id: node.id,
            });
        })
        .await;
        Ok(())
    }

    async fn delete_node(&self, ctx: &RpcContext, node: &Node) -> Result<(), RpcError> {
        self.with_world(&ctx.world, |w| {
            w.nodes.remove(&node.id);
            w.node_invalidations.push_back(NodeInvalidation {
                action: NodeAction::Delete,
                id: node.id,
            });
        })
        .await;
        Ok(())
    }

    async fn get_node_invalidations(
        &self,
        ctx: &RpcContext,
    ) -> Result<Vec<NodeInvalidation>, RpcError> {
        Ok(self
            .with_world(&ctx.world, |w| w.node_invalidations.drain(..).collect())
            .await)
    }

    async fn timeline_origin(&self, ctx: &RpcContext) -> Result<f64, RpcError> {
        Ok(self.with_world(&ctx.world, |w| w.origin).await)
    }

    async fn timeline_start(&self, ctx: &RpcContext, situation: &Situation) -> Result<(), RpcError> {
        self.with_world(&ctx.world, |w| {
            w.situations.insert(situation.id, situation.clone());
            w.timeline_invalidations.push_back(TimelineInvalidation {
                action: TimelineAction::Start,
                id: situation.id,
                situation: Some(situation.clone()),
            });
        })
        .await;
        Ok(())
    }

    async fn timeline_event(&self, ctx: &RpcContext, situation: &Situation) -> Result<(), RpcError> {
        self.with_world(&ctx.world, |w| {
            w.situations.insert(situation.id, situation.clone());
            w.timeline_invalidations.push_back(TimelineInvalidation {
                action: TimelineAction::Event,
                id: situation.id,
                situation: Some(situation.clone()),
            });
        })
        .await;
        Ok(())
    }

    async fn timeline_end(&self, ctx: &RpcContext, situation_id: SituationId) -> Result<(), RpcError> {
        let now = self.now();
        self.with_world(&ctx.world, |w| {
            if let Some(situation) = w.situations.get_mut(&situation_id) {
                situation.endtime = Some(now);
            }
            w.timeline_invalidations.push_back(TimelineInvalidation {
                action: TimelineAction::End,
                id: situation_id,
                situation: None,
            });
        })
        .await;
        Ok(())
    }

    async fn get_timeline_invalidations(
        &self,
        ctx: &RpcContext,
    ) -> Result<Vec<TimelineInvalidation>, RpcError> {
        Ok(self
            .with_world(&ctx.world, |w| w.timeline_invalidations.drain(..).collect())
            .await)
    }

    async fn copy_world(&self, dst: &str, src: &str) -> Result<(), RpcError> {
        let now = self.now();
        let mut worlds = self.worlds.lock().await;
        let source_nodes = match worlds.get(src) {
            Some(source) => source.nodes.clone(),
            None => return Err(RpcError::NotFound),
        };
        let source_root = worlds.get(src).map(|w| w.root_id).unwrap();

        let mut copy = MockWorld::new(now);
        copy.nodes = source_nodes.clone();
        copy.root_id = source_root;
        for id in source_nodes.keys() {
            copy.node_invalidations.push_back(NodeInvalidation {
                action: NodeAction::New,
                id: *id,
            });
        }
        worlds.insert(dst.to_string(), copy);
        Ok(())
    }

    async fn topology(&self) -> Result<Topology, RpcError> {
        let worlds = self.worlds.lock().await;
        let clients = self.clients.lock().await;
        let mut directory: HashMap<String, HashMap<String, (String, f64)>> = HashMap::new();
        for client in clients.iter() {
            directory.insert(client.clone(), HashMap::new());
        }
        Ok(Topology {
            clients: directory,
            worlds: worlds.keys().cloned().collect(),
        })
    }

    async fn uptime(&self) -> Result<f64, RpcError> {
        Ok(self.now())
    }

    async fn push_mesh(&self, id: &str, data: &[u8]) -> Result<(), RpcError> {
        self.meshes.lock().await.insert(id.to_string(), data.to_vec());
        Ok(())
    }

    async fn mesh(&self, id: &str) -> Result<Vec<u8>, RpcError> {
        self.meshes
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or(RpcError::NotFound)
    }

    async fn has_mesh(&self, id: &str) -> Result<bool, RpcError> {
        Ok(self.meshes.lock().await.contains_key(id))
    }
}
