//! A world's scene graph: a thin facade over [`NodesProxy`] that
//! additionally knows which node is the root.

use std::sync::Arc;
use std::time::Duration;

use underworlds_common::{Node, NodeId, Result};

use crate::nodes::{NodeKey, NodesProxy};

/// The scene graph for one world. Cloning is cheap: it is a handle around
/// the same [`NodesProxy`] shared with anyone else holding this scene.
#[derive(Debug, Clone)]
pub struct SceneProxy {
    nodes: Arc<NodesProxy>,
}

impl SceneProxy {
    pub(crate) fn new(nodes: Arc<NodesProxy>) -> Self {
        Self { nodes }
    }

    /// The underlying nodes collection.
    pub fn nodes(&self) -> &Arc<NodesProxy> {
        &self.nodes
    }

    /// The scene's distinguished root node, always resolvable: it is
    /// materialized eagerly when the underlying collection is constructed.
    pub async fn rootnode(&self) -> Result<Node> {
        let root_id = self.nodes.root_id();
        self.nodes.get(NodeKey::Id(root_id)).await
    }

    pub fn root_id(&self) -> NodeId {
        self.nodes.root_id()
    }

    /// Blocks until the scene's node collection has applied any
    /// invalidation, or `timeout` elapses.
    pub async fn wait_for_changes(&self, timeout: Option<Duration>) -> bool {
        self.nodes.wait_for_changes(timeout).await
    }

    pub(crate) async fn finalize(&self) {
        self.nodes.finalize().await;
    }
}
