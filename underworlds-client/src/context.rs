//! Top-level client handle: a connection to a server, the client's
//! identity, and its directory of worlds.

use std::sync::Arc;

use underworlds_common::rpc::{ClientConfig, UnderworldsRpc};
use underworlds_common::{ClientId, Error, Result};

use crate::testing::MockRpc;
use crate::timeline::{Clock, SystemClock};
use crate::worlds::WorldsProxy;

/// A connected client. Owns the client's id, its directory of worlds, and
/// the handle to its RPC transport. Dropping it leaks its background
/// pollers; call [`Self::close`] (or use [`Self::scoped`]) to shut them
/// down deterministically.
#[derive(Debug)]
pub struct Context {
    client_id: ClientId,
    rpc: Arc<dyn UnderworldsRpc>,
    worlds: WorldsProxy,
}

impl Context {
    /// Registers a new client named `name` against `rpc` and returns its
    /// context, using the default [`ClientConfig`].
    pub async fn connect(name: &str, rpc: Arc<dyn UnderworldsRpc>) -> Result<Self> {
        Self::connect_with_config(name, rpc, ClientConfig::default()).await
    }

    /// As [`Self::connect`], with explicit tuneables.
    pub async fn connect_with_config(
        name: &str,
        rpc: Arc<dyn UnderworldsRpc>,
        config: ClientConfig,
    ) -> Result<Self> {
        let client_id = rpc.hello(name).await.map_err(Error::transport)?;
        let worlds = WorldsProxy::new(
            Arc::clone(&rpc),
            client_id,
            config,
            Arc::new(SystemClock) as Arc<dyn Clock>,
        );
        Ok(Self {
            client_id,
            rpc,
            worlds,
        })
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn worlds(&self) -> &WorldsProxy {
        &self.worlds
    }

    /// The server's client/world directory.
    pub async fn topology(&self) -> Result<underworlds_common::rpc::Topology> {
        self.rpc.topology().await.map_err(Error::transport)
    }

    /// Server uptime, in seconds.
    pub async fn uptime(&self) -> Result<f64> {
        self.rpc.uptime().await.map_err(Error::transport)
    }

    /// Pushes opaque mesh bytes under `id`.
    pub async fn push_mesh(&self, id: &str, data: &[u8]) -> Result<()> {
        self.rpc.push_mesh(id, data).await.map_err(Error::transport)
    }

    /// Fetches opaque mesh bytes previously pushed under `id`.
    pub async fn mesh(&self, id: &str) -> Result<Vec<u8>> {
        self.rpc.mesh(id).await.map_err(Error::transport)
    }

    /// Whether mesh data exists under `id`.
    pub async fn has_mesh(&self, id: &str) -> Result<bool> {
        self.rpc.has_mesh(id).await.map_err(Error::transport)
    }

    /// Shuts down every world proxy issued through this context's worlds
    /// directory. Idempotent.
    pub async fn close(&self) {
        self.worlds.finalize().await;
    }

    /// Runs `f` with a freshly connected context, closing it afterwards
    /// regardless of whether `f` succeeded. Scoped acquisition without
    /// relying on `Drop`, since there is no async `Drop` in stable Rust to
    /// do this implicitly.
    pub async fn scoped<F, Fut, T>(name: &str, rpc: Arc<dyn UnderworldsRpc>, f: F) -> Result<T>
    where
        F: FnOnce(Arc<Context>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let ctx = Arc::new(Self::connect(name, rpc).await?);
        let result = f(Arc::clone(&ctx)).await;
        ctx.close().await;
        result
    }
}

/// Connects a [`Context`] against an in-process [`MockRpc`] instead of a
/// real transport. Convenient for examples and for tests that want the
/// same connection path production code uses.
pub async fn connect_mock(name: &str, mock: Arc<MockRpc>) -> Result<Context> {
    Context::connect(name, mock as Arc<dyn UnderworldsRpc>).await
}
