//! The scene-graph element value type.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::NodeId;

/// The kind of scene-graph element a [`Node`] represents.
///
/// Wire encoding is the integer 0-3: `Undefined = 0, Mesh = 1, Entity = 2,
/// Camera = 3`. `#[repr(u8)]` only fixes the in-memory discriminant, so the
/// `u8` round trip is carried explicitly through `#[serde(into, from)]`
/// rather than left to a derive, which would serialize the variant name
/// instead.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(into = "u8", from = "u8")]
#[repr(u8)]
pub enum NodeType {
    Undefined = 0,
    Mesh = 1,
    /// Abstract nodes: reference frames, groups, or the scene root.
    Entity = 2,
    Camera = 3,
}

impl From<u8> for NodeType {
    fn from(code: u8) -> Self {
        match code {
            1 => Self::Mesh,
            2 => Self::Entity,
            3 => Self::Camera,
            _ => Self::Undefined,
        }
    }
}

impl From<NodeType> for u8 {
    fn from(kind: NodeType) -> u8 {
        kind as u8
    }
}

/// A 4x4 transformation matrix, relative to the node's parent, in meters.
/// Row-major: `data[row * 4 + col]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transformation(pub [f32; 16]);

impl Transformation {
    pub const IDENTITY: Self = Self([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    pub fn row(&self, r: usize) -> [f32; 4] {
        let base = r * 4;
        [
            self.0[base],
            self.0[base + 1],
            self.0[base + 2],
            self.0[base + 3],
        ]
    }
}

impl Default for Transformation {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// An open-ended property value. The only property the core cares about is
/// the `physics` boolean; everything else is opaque payload attached by
/// higher layers (perception modules, planners).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

/// A node's property map. Always seeded with `physics: false` for freshly
/// constructed nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeProperties(pub HashMap<String, PropertyValue>);

impl NodeProperties {
    pub const PHYSICS: &'static str = "physics";

    pub fn new() -> Self {
        let mut map = HashMap::new();
        map.insert(Self::PHYSICS.to_string(), PropertyValue::Bool(false));
        Self(map)
    }

    pub fn physics(&self) -> bool {
        matches!(self.0.get(Self::PHYSICS), Some(PropertyValue::Bool(true)))
    }
}

impl Default for NodeProperties {
    fn default() -> Self {
        Self::new()
    }
}

/// A scene-graph node: a mesh, entity, or camera with a transform relative
/// to its parent.
///
/// Identity and equality are by [`Node::id`] alone. Do not derive
/// `PartialEq`/`Eq`/`Hash`/`Ord` here: a derive would compare every field,
/// which is not what the API promises.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeType,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub transformation: Transformation,
    pub properties: NodeProperties,
    pub last_update: f64,
}

impl Node {
    /// The name reserved for a world's distinguished root node.
    pub const ROOT_NAME: &'static str = "root";

    /// Builds a new node with a fresh random id, zero children, no parent,
    /// the identity transform and the default property map.
    pub fn new(name: impl Into<String>, kind: NodeType, now: f64) -> Self {
        Self {
            id: NodeId::random(),
            name: name.into(),
            kind,
            parent: None,
            children: Vec::new(),
            transformation: Transformation::IDENTITY,
            properties: NodeProperties::new(),
            last_update: now,
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl std::hash::Hash for Node {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_and_hash_are_by_id_only() {
        let mut a = Node::new("a", NodeType::Entity, 0.0);
        let b = Node {
            id: a.id,
            name: "different-name".to_string(),
            ..Node::new("b", NodeType::Mesh, 1.0)
        };
        assert_eq!(a, b, "nodes with the same id must compare equal");

        a.name = "renamed".to_string();
        assert_eq!(a, b, "renaming must not change identity");
    }

    #[test]
    fn fresh_node_has_physics_false() {
        let node = Node::new("thing", NodeType::Mesh, 0.0);
        assert!(!node.properties.physics());
    }

    #[test]
    fn serialize_deserialize_round_trip() {
        let mut node = Node::new(Node::ROOT_NAME, NodeType::Entity, 1234.5);
        node.children.push(NodeId::random());
        node.properties
            .0
            .insert("custom".to_string(), PropertyValue::Number(3.0));

        let json = serde_json::to_string(&node).unwrap();
        let back: Node = serde_json::from_str(&json).unwrap();

        assert_eq!(node.id, back.id);
        assert_eq!(node.name, back.name);
        assert_eq!(node.kind, back.kind);
        assert_eq!(node.children, back.children);
        assert_eq!(node.transformation, back.transformation);
        assert_eq!(node.properties, back.properties);
        assert_eq!(node.last_update, back.last_update);
    }

    #[test]
    fn node_type_wire_encoding_is_the_integer_not_the_variant_name() {
        assert_eq!(serde_json::to_string(&NodeType::Undefined).unwrap(), "0");
        assert_eq!(serde_json::to_string(&NodeType::Mesh).unwrap(), "1");
        assert_eq!(serde_json::to_string(&NodeType::Entity).unwrap(), "2");
        assert_eq!(serde_json::to_string(&NodeType::Camera).unwrap(), "3");

        let parsed: NodeType = serde_json::from_str("2").unwrap();
        assert_eq!(parsed, NodeType::Entity);
    }
}
