//! Lazy, eventually-consistent client replicas of Underworlds scenes and
//! timelines.
//!
//! A [`Context`] connects to a server (speaking whatever implements
//! [`underworlds_common::rpc::UnderworldsRpc`]) and hands out
//! [`WorldProxy`](worlds::WorldProxy) instances through its
//! [`WorldsProxy`](worlds::WorldsProxy). Each world proxy bundles a
//! [`SceneProxy`](scene::SceneProxy) (itself a thin facade over a
//! [`NodesProxy`](nodes::NodesProxy)) and a
//! [`TimelineProxy`](timeline::TimelineProxy). All three run a background
//! task that periodically pulls invalidations from the server and applies
//! them to a local cache; reads are served from that cache and never block
//! on the network except on a cache miss.

pub mod context;
pub mod nodes;
pub mod scene;
pub mod testing;
pub mod timeline;
pub mod worlds;

pub use context::Context;
pub use nodes::{NodeKey, NodesProxy};
pub use scene::SceneProxy;
pub use testing::MockRpc;
pub use timeline::{CallbackId, Clock, SystemClock, TimelineProxy};
pub use worlds::{WorldProxy, WorldsProxy};

pub use underworlds_common::rpc::{ClientConfig, UnderworldsRpc};
pub use underworlds_common::{
    ClientId, Error, Node, NodeId, NodeProperties, NodeType, PropertyValue, Result, Situation,
    SituationId, SituationType, Transformation,
};
