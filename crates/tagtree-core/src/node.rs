//! Tagged tree nodes.
//!
//! The conversion pipeline only depends on the shape of a tree: every node
//! is a mapping (string keys), a sequence or a scalar, and any node may
//! carry a tag. Nodes are shared handles with identity, so the same node
//! may appear at several places of a tree (an alias) and a node may
//! contain itself.

use crate::tag::TagUri;
use indexmap::IndexMap;
use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;

/// Scalar leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Binary(Vec<u8>),
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::String(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::String(v)
    }
}

/// Content of a node.
#[derive(Clone)]
pub enum NodeValue {
    Mapping(IndexMap<String, Node>),
    Sequence(Vec<Node>),
    Scalar(Scalar),
}

impl NodeValue {
    pub fn kind(&self) -> &'static str {
        match self {
            NodeValue::Mapping(_) => "mapping",
            NodeValue::Sequence(_) => "sequence",
            NodeValue::Scalar(_) => "scalar",
        }
    }
}

/// Identity of a node, stable for as long as the node is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

struct NodeData {
    tag: RefCell<Option<TagUri>>,
    value: RefCell<NodeValue>,
}

/// Shared handle to a tree node. Cloning the handle does not copy the node.
#[derive(Clone)]
pub struct Node(Rc<NodeData>);

impl Node {
    pub fn new(value: NodeValue) -> Self {
        Self(Rc::new(NodeData {
            tag: RefCell::new(None),
            value: RefCell::new(value),
        }))
    }

    pub fn tagged(tag: TagUri, value: NodeValue) -> Self {
        let node = Self::new(value);
        node.set_tag(Some(tag));
        node
    }

    pub fn scalar(value: impl Into<Scalar>) -> Self {
        Self::new(NodeValue::Scalar(value.into()))
    }

    pub fn null() -> Self {
        Self::scalar(Scalar::Null)
    }

    pub fn mapping<K: Into<String>>(entries: impl IntoIterator<Item = (K, Node)>) -> Self {
        Self::new(NodeValue::Mapping(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn sequence(items: impl IntoIterator<Item = Node>) -> Self {
        Self::new(NodeValue::Sequence(items.into_iter().collect()))
    }

    /// Builder-style variant of [`Node::set_tag`].
    pub fn with_tag(self, tag: TagUri) -> Self {
        self.set_tag(Some(tag));
        self
    }

    pub fn id(&self) -> NodeId {
        NodeId(Rc::as_ptr(&self.0) as *const () as usize)
    }

    pub fn ptr_eq(&self, other: &Node) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn tag(&self) -> Option<TagUri> {
        self.0.tag.borrow().clone()
    }

    pub fn set_tag(&self, tag: Option<TagUri>) {
        *self.0.tag.borrow_mut() = tag;
    }

    pub fn value(&self) -> Ref<'_, NodeValue> {
        self.0.value.borrow()
    }

    pub fn set_value(&self, value: NodeValue) {
        *self.0.value.borrow_mut() = value;
    }

    /// Copy tag and content of `other` into this node, keeping this node's
    /// identity.
    pub fn assume(&self, other: &Node) {
        if self.ptr_eq(other) {
            return;
        }
        self.set_tag(other.tag());
        self.set_value(other.value().clone());
    }

    /// Append a child to a sequence node. Returns `false` when the node is
    /// not a sequence.
    pub fn push(&self, child: Node) -> bool {
        match &mut *self.0.value.borrow_mut() {
            NodeValue::Sequence(items) => {
                items.push(child);
                true
            }
            _ => false,
        }
    }

    /// Insert a child into a mapping node. Returns `false` when the node is
    /// not a mapping.
    pub fn insert(&self, key: impl Into<String>, child: Node) -> bool {
        match &mut *self.0.value.borrow_mut() {
            NodeValue::Mapping(entries) => {
                entries.insert(key.into(), child);
                true
            }
            _ => false,
        }
    }

    /// Child of a mapping node by key.
    pub fn get(&self, key: &str) -> Option<Node> {
        match &*self.value() {
            NodeValue::Mapping(entries) => entries.get(key).cloned(),
            _ => None,
        }
    }

    /// Child of a sequence node by position.
    pub fn at(&self, index: usize) -> Option<Node> {
        match &*self.value() {
            NodeValue::Sequence(items) => items.get(index).cloned(),
            _ => None,
        }
    }

    /// Build an untagged tree from a JSON value.
    pub fn from_json(value: &serde_json::Value) -> Node {
        use serde_json::Value;
        match value {
            Value::Null => Node::null(),
            Value::Bool(b) => Node::scalar(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Node::scalar(i),
                None => Node::scalar(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Node::scalar(s.as_str()),
            Value::Array(items) => Node::sequence(items.iter().map(Node::from_json)),
            Value::Object(entries) => {
                Node::mapping(entries.iter().map(|(k, v)| (k.clone(), Node::from_json(v))))
            }
        }
    }

    /// Render the tree as JSON, dropping tags. Returns `None` for cyclic
    /// trees and for binary scalars.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        self.to_json_guarded(&mut Vec::new())
    }

    fn to_json_guarded(&self, path: &mut Vec<NodeId>) -> Option<serde_json::Value> {
        use serde_json::Value;
        if path.contains(&self.id()) {
            return None;
        }
        path.push(self.id());
        let value = match &*self.value() {
            NodeValue::Scalar(scalar) => match scalar {
                Scalar::Null => Value::Null,
                Scalar::Bool(b) => Value::Bool(*b),
                Scalar::Int(i) => Value::from(*i),
                Scalar::Float(f) => Value::from(*f),
                Scalar::String(s) => Value::String(s.clone()),
                Scalar::Binary(_) => return None,
            },
            NodeValue::Sequence(items) => Value::Array(
                items
                    .iter()
                    .map(|item| item.to_json_guarded(path))
                    .collect::<Option<Vec<_>>>()?,
            ),
            NodeValue::Mapping(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| v.to_json_guarded(path).map(|v| (k.clone(), v)))
                    .collect::<Option<serde_json::Map<_, _>>>()?,
            ),
        };
        path.pop();
        Some(value)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shallow on purpose: trees may be cyclic.
        let mut s = f.debug_struct("Node");
        s.field("id", &self.id());
        if let Some(tag) = self.tag() {
            s.field("tag", &tag.as_str());
        }
        match &*self.value() {
            NodeValue::Mapping(entries) => {
                s.field("keys", &entries.keys().collect::<Vec<_>>());
            }
            NodeValue::Sequence(items) => {
                s.field("len", &items.len());
            }
            NodeValue::Scalar(scalar) => {
                s.field("scalar", scalar);
            }
        }
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_shape() {
        let node = Node::from_json(&serde_json::json!({
            "name": "origin",
            "coords": [0, 1.5],
            "visible": true,
            "parent": null
        }));

        assert_eq!(node.value().kind(), "mapping");
        let coords = node.get("coords").unwrap();
        assert_eq!(coords.value().kind(), "sequence");
        match &*coords.at(1).unwrap().value() {
            NodeValue::Scalar(Scalar::Float(f)) => assert_eq!(*f, 1.5),
            _ => panic!("Expected float scalar"),
        }
        assert!(node.tag().is_none());
    }

    #[test]
    fn test_shared_node_identity() {
        let shared = Node::scalar("shared");
        let root = Node::sequence([shared.clone(), shared.clone()]);
        assert!(root.at(0).unwrap().ptr_eq(&root.at(1).unwrap()));
        assert_eq!(root.at(0).unwrap().id(), shared.id());
    }

    #[test]
    fn test_self_containing_node() {
        let root = Node::mapping(Vec::<(String, Node)>::new());
        assert!(root.insert("self", root.clone()));
        assert!(root.get("self").unwrap().ptr_eq(&root));
        // Debug must not recurse into the cycle.
        let rendered = format!("{root:?}");
        assert!(rendered.contains("self"));
    }

    #[test]
    fn test_assume_keeps_identity() {
        let target = Node::null();
        let tag = TagUri::parse("tag:example.org:thing-1.0.0").unwrap();
        let source = Node::sequence([Node::scalar(1i64)]).with_tag(tag.clone());
        let id = target.id();
        target.assume(&source);
        assert_eq!(target.id(), id);
        assert_eq!(target.tag(), Some(tag));
        assert_eq!(target.value().kind(), "sequence");
    }

    #[test]
    fn test_to_json_round_trip_and_cycle() {
        let json = serde_json::json!({"a": [1, "two", null], "b": {"c": false}});
        assert_eq!(Node::from_json(&json).to_json(), Some(json));

        let cyclic = Node::sequence([]);
        cyclic.push(cyclic.clone());
        assert!(cyclic.to_json().is_none());
    }

    #[test]
    fn test_push_on_scalar_is_rejected() {
        let node = Node::scalar(3i64);
        assert!(!node.push(Node::null()));
        assert!(!node.insert("k", Node::null()));
    }
}
