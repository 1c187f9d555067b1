//! Lazy replica of a world's timeline of situations.
//!
//! Structurally simpler than [`crate::nodes::NodesProxy`] (no positional
//! index, no deletes) but adds an `on_change` callback registry — the
//! push-to-callback counterpart of [`crate::nodes::NodesProxy::wait_for_changes`]'s
//! pull model.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use underworlds_common::rpc::{ClientConfig, RpcContext, TimelineAction, UnderworldsRpc};
use underworlds_common::{Error, Result, Situation, SituationId};

/// A clock abstraction for stamping the local `endtime` a client observes
/// when a running situation ends. Production code uses [`SystemClock`];
/// tests substitute a deterministic fake rather than racing wall-clock
/// time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> f64;
}

/// Wall-clock time as seconds since the Unix epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

/// A registration token returned by [`TimelineProxy::on_change`], passed
/// back to [`TimelineProxy::remove_callback`]. Rust closures have no
/// identity to dedupe by, so callers are handed one explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

type ChangeCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct TimelineState {
    situations: HashMap<SituationId, Situation>,
    callbacks: HashMap<CallbackId, ChangeCallback>,
    version: u64,
    /// Set once the background task observes an invalidation action code
    /// it does not recognize.
    protocol_violation: Option<u8>,
}

impl std::fmt::Debug for TimelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineState")
            .field("situations", &self.situations)
            .field("callbacks", &self.callbacks.len())
            .field("version", &self.version)
            .field("protocol_violation", &self.protocol_violation)
            .finish()
    }
}

/// Lazy, cache-coherent replica of a world's timeline.
pub struct TimelineProxy {
    rpc: Arc<dyn UnderworldsRpc>,
    ctx: RpcContext,
    config: ClientConfig,
    origin: f64,
    clock: Arc<dyn Clock>,
    state: Mutex<TimelineState>,
    changed: Notify,
    next_callback_id: AtomicU64,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TimelineProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineProxy")
            .field("ctx", &self.ctx)
            .field("config", &self.config)
            .field("origin", &self.origin)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl TimelineProxy {
    pub(crate) async fn new(
        rpc: Arc<dyn UnderworldsRpc>,
        ctx: RpcContext,
        config: ClientConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let origin = rpc
            .timeline_origin(&ctx)
            .await
            .map_err(Error::transport)?;

        Ok(Self {
            rpc,
            ctx,
            config,
            origin,
            clock,
            state: Mutex::new(TimelineState::default()),
            changed: Notify::new(),
            next_callback_id: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    pub(crate) fn spawn(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run().await });
        *self
            .task
            .try_lock()
            .expect("no other task touches `task` before spawn")
            = Some(handle);
    }

    /// The world's creation time, fetched once at construction. Never
    /// changes over a world's lifetime.
    pub fn origin(&self) -> f64 {
        self.origin
    }

    /// Begins a new open-ended situation. Write-through: does not appear in
    /// reads until the server's own `Start` invalidation round-trips back.
    pub async fn start(&self, situation: &Situation) -> Result<()> {
        self.rpc
            .timeline_start(&self.ctx, situation)
            .await
            .map_err(Error::transport)
    }

    /// Records an instantaneous event (`starttime == endtime`).
    pub async fn event(&self, situation: &Situation) -> Result<()> {
        self.rpc
            .timeline_event(&self.ctx, situation)
            .await
            .map_err(Error::transport)
    }

    /// Ends a previously started situation.
    pub async fn end(&self, situation_id: SituationId) -> Result<()> {
        self.rpc
            .timeline_end(&self.ctx, situation_id)
            .await
            .map_err(Error::transport)
    }

    /// Looks up a situation by id among those already observed via
    /// invalidation. Unlike [`crate::nodes::NodesProxy::get`], this never
    /// issues a fetch: there is no `getSituation` RPC, so a situation this
    /// client hasn't yet been told about is simply not locally knowable.
    pub async fn get(&self, id: SituationId) -> Option<Situation> {
        self.state.lock().await.situations.get(&id).cloned()
    }

    /// All situations currently known, in no particular order.
    pub async fn situations(&self) -> Vec<Situation> {
        self.state.lock().await.situations.values().cloned().collect()
    }

    /// `Some` once the background task has observed an invalidation action
    /// code it does not recognize and stopped. The timeline remains
    /// readable; it just stops receiving new situations.
    pub async fn protocol_violation(&self) -> Option<u8> {
        self.state.lock().await.protocol_violation
    }

    /// Registers a zero-argument callback, invoked once per situation as
    /// its invalidation is applied. Look the changed situation up through
    /// [`Self::situations`] or [`Self::get`] from inside the callback if
    /// you need it; the callback itself carries no payload.
    pub async fn on_change(&self, callback: impl Fn() + Send + Sync + 'static) -> CallbackId {
        let id = CallbackId(self.next_callback_id.fetch_add(1, Ordering::Relaxed));
        self.state.lock().await.callbacks.insert(id, Box::new(callback));
        id
    }

    /// Unregisters a callback. A no-op if `id` is already removed or
    /// unknown.
    pub async fn remove_callback(&self, id: CallbackId) {
        self.state.lock().await.callbacks.remove(&id);
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

    pub async fn finalize(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
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
                self.rpc.get_timeline_invalidations(&self.ctx),
            )
            .await
            {
                Ok(Ok(batch)) => batch,
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "failed to pull timeline invalidations; retrying next tick");
                    continue;
                }
                Err(_elapsed) => {
                    tracing::warn!("timeline invalidation pull timed out; retrying next tick");
                    continue;
                }
            };

            if batch.is_empty() {
                continue;
            }

            let mut fired: Vec<Situation> = Vec::new();
            {
                let mut state = self.state.lock().await;
                for invalidation in batch {
                    match invalidation.action {
                        TimelineAction::Start => {
                            let situation = match invalidation.situation {
                                Some(situation) => situation,
                                None => {
                                    tracing::error!(
                                        id = %invalidation.id,
                                        "server sent Start invalidation with no situation payload"
                                    );
                                    continue;
                                }
                            };
                            tracing::debug!(id = %invalidation.id, "server notification: situation started");
                            state.situations.insert(invalidation.id, situation.clone());
                            fired.push(situation);
                        }
                        TimelineAction::Event => {
                            let mut situation = match invalidation.situation {
                                Some(situation) => situation,
                                None => {
                                    tracing::error!(
                                        id = %invalidation.id,
                                        "server sent Event invalidation with no situation payload"
                                    );
                                    continue;
                                }
                            };
                            // An event's end always coincides with its start,
                            // enforced here rather than trusted from the wire.
                            situation.endtime = situation.starttime;
                            tracing::debug!(id = %invalidation.id, "server notification: event");
                            state.situations.insert(invalidation.id, situation.clone());
                            fired.push(situation);
                        }
                        TimelineAction::End => {
                            tracing::debug!(id = %invalidation.id, "server notification: situation ended");
                            if let Some(situation) = state.situations.get_mut(&invalidation.id) {
                                situation.endtime = Some(self.clock.now());
                                fired.push(situation.clone());
                            } else {
                                tracing::warn!(id = %invalidation.id, "end notification for unknown situation");
                            }
                        }
                        TimelineAction::Unknown(code) => {
                            tracing::error!(code, "unexpected timeline invalidation action; stopping poller");
                            state.protocol_violation = Some(code);
                            state.version += 1;
                            drop(state);
                            self.changed.notify_waiters();
                            return;
                        }
                    }
                    state.version += 1;
                }
            }

            if !fired.is_empty() {
                let state = self.state.lock().await;
                for _situation in &fired {
                    for callback in state.callbacks.values() {
                        callback();
                    }
                }
                drop(state);
                self.changed.notify_waiters();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use underworlds_common::ClientId;

    use crate::testing::MockRpc;

    use super::*;

    async fn rigged(mock: &Arc<MockRpc>, world: &str) -> TimelineProxy {
        let ctx = RpcContext {
            client_id: ClientId::random(),
            world: world.to_string(),
        };
        TimelineProxy::new(
            Arc::clone(mock) as Arc<dyn UnderworldsRpc>,
            ctx,
            ClientConfig::default(),
            Arc::new(SystemClock) as Arc<dyn Clock>,
        )
        .await
        .expect("construct TimelineProxy")
    }

    #[tokio::test]
    async fn fresh_timeline_has_no_situations() {
        let mock = Arc::new(MockRpc::new());
        let timeline = rigged(&mock, "w").await;
        assert!(timeline.situations().await.is_empty());
    }

    #[tokio::test]
    async fn remove_callback_is_a_no_op_for_unknown_id() {
        let mock = Arc::new(MockRpc::new());
        let timeline = rigged(&mock, "w").await;
        let id = timeline.on_change(|| {}).await;
        timeline.remove_callback(id).await;
        timeline.remove_callback(id).await;
    }

    #[test]
    fn callback_ids_are_distinct() {
        let a = CallbackId(0);
        let b = CallbackId(1);
        assert_ne!(a, b);
    }
}
