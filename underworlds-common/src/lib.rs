//! Wire types and RPC contract shared between Underworlds clients and the
//! (external) server.

pub mod error;
pub mod ids;
pub mod node;
pub mod rpc;
pub mod situation;

pub use error::{Error, Result};
pub use ids::{ClientId, NodeId, SituationId};
pub use node::{Node, NodeProperties, NodeType, PropertyValue, Transformation};
pub use rpc::{RpcContext, RpcError, UnderworldsRpc};
pub use situation::{Situation, SituationType};
