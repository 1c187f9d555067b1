//! Per-world proxies and the top-level worlds directory.

use std::sync::Arc;

use tokio::sync::Mutex;

use underworlds_common::rpc::{ClientConfig, RpcContext, UnderworldsRpc};
use underworlds_common::{ClientId, Error, Result};

use crate::nodes::NodesProxy;
use crate::scene::SceneProxy;
use crate::timeline::{Clock, TimelineProxy};

/// One world's combined scene graph and timeline.
#[derive(Debug, Clone)]
pub struct WorldProxy {
    name: String,
    rpc: Arc<dyn UnderworldsRpc>,
    scene: SceneProxy,
    timeline: Arc<TimelineProxy>,
}

impl WorldProxy {
    pub(crate) async fn connect(
        rpc: Arc<dyn UnderworldsRpc>,
        client_id: ClientId,
        name: &str,
        config: ClientConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let ctx = RpcContext {
            client_id,
            world: name.to_string(),
        };

        let nodes = Arc::new(NodesProxy::new(Arc::clone(&rpc), ctx.clone(), config).await?);
        nodes.spawn();

        let timeline = Arc::new(TimelineProxy::new(Arc::clone(&rpc), ctx, config, clock).await?);
        timeline.spawn();

        Ok(Self {
            name: name.to_string(),
            rpc,
            scene: SceneProxy::new(nodes),
            timeline,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scene(&self) -> &SceneProxy {
        &self.scene
    }

    pub fn timeline(&self) -> &Arc<TimelineProxy> {
        &self.timeline
    }

    /// Asks the server to replace this world's contents with a deep copy of
    /// `source`'s, returning once the server acknowledges.
    pub async fn copy_from(&self, source: &WorldProxy) -> Result<()> {
        self.rpc
            .copy_world(&self.name, source.name())
            .await
            .map_err(Error::transport)
    }

    pub(crate) async fn finalize(&self) {
        self.scene.finalize().await;
        self.timeline.finalize().await;
    }
}

/// The client's directory of worlds.
///
/// `get` always constructs and returns a fresh [`WorldProxy`] rather than
/// deduplicating by name, so repeated lookups of the same name yield
/// distinct proxy instances that happen to agree on the server-side root
/// id. This directory "remembers" in the sense of tracking every instance
/// it has ever handed out — purely so [`Self::finalize`] can shut all of
/// them down — not by deduplicating. See DESIGN.md.
#[derive(Debug)]
pub struct WorldsProxy {
    rpc: Arc<dyn UnderworldsRpc>,
    client_id: ClientId,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
    issued: Mutex<Vec<WorldProxy>>,
}

impl WorldsProxy {
    pub(crate) fn new(
        rpc: Arc<dyn UnderworldsRpc>,
        client_id: ClientId,
        config: ClientConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rpc,
            client_id,
            config,
            clock,
            issued: Mutex::new(Vec::new()),
        }
    }

    /// Connects to (and, server-side, implicitly creates) the world named
    /// `name`, returning a fresh proxy for it.
    pub async fn get(&self, name: &str) -> Result<WorldProxy> {
        let world = WorldProxy::connect(
            Arc::clone(&self.rpc),
            self.client_id,
            name,
            self.config,
            Arc::clone(&self.clock),
        )
        .await?;
        self.issued.lock().await.push(world.clone());
        Ok(world)
    }

    /// Connects a fresh [`WorldProxy`] for every world name in the server's
    /// topology, read fresh on every call. Each connection is recorded for
    /// teardown the same way [`Self::get`]'s is.
    pub async fn iter_worlds(&self) -> Result<Vec<WorldProxy>> {
        let topology = self.rpc.topology().await.map_err(Error::transport)?;
        let mut worlds = Vec::with_capacity(topology.worlds.len());
        for name in topology.worlds {
            worlds.push(self.get(&name).await?);
        }
        Ok(worlds)
    }

    /// Shuts down every world proxy this directory has ever issued.
    pub(crate) async fn finalize(&self) {
        let issued = std::mem::take(&mut *self.issued.lock().await);
        for world in issued {
            world.finalize().await;
        }
    }
}
