//! In-memory representation of a serialized object graph.
//!
//! A [`Node`] tree is a plain acyclic data structure: the first occurrence of
//! an object is a full [`Node`], later occurrences are [`NodeRef`]s carrying
//! the same id.

use crate::value::{Key, ScalarType, Value};
use std::fmt;

/// Identity of a node within one pass.
pub type NodeId = u64;

/// Metadata key holding the fully qualified class name.
pub const META_CLASS: &str = "class";
/// Metadata key holding a per-node merge-mode override.
pub const META_MERGE: &str = "merge";
/// Name given to scalar entries of a collection.
pub const ITEM_NAME: &str = "item";
/// Name given to collections nested directly inside a collection.
pub const NESTED_COLLECTION_NAME: &str = "collection";

/// Ordered string→string map.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Metadata(Vec<(String, String)>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Insert or replace, keeping the original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let pos = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(pos).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Scalar leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeProperty {
    scalar: ScalarType,
    value: Value,
}

impl NodeProperty {
    /// Wrap a scalar value; `None` for objects and containers.
    pub fn from_value(value: Value) -> Option<Self> {
        let scalar = value.scalar_type()?;
        Some(Self { scalar, value })
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.scalar
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn wire_text(&self) -> String {
        self.value.to_wire_string().unwrap_or_default()
    }
}

/// Back-reference to a node emitted earlier in the same tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub id: NodeId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    List,
    Map,
}

impl CollectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::List => "list",
            CollectionKind::Map => "map",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "list" | "array" => Some(CollectionKind::List),
            "map" => Some(CollectionKind::Map),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionItem {
    pub key: Option<Key>,
    pub value: NodeValue,
}

/// Index carried by a collection item's path segment.
///
/// An integer key is used as is. Other items fall back to `ordinal`, their
/// position among the items actually written, so collecting and restoring
/// address the same item identically.
pub fn item_position(key: Option<&Key>, ordinal: usize) -> usize {
    match key {
        Some(Key::Index(n)) => usize::try_from(*n).unwrap_or(ordinal),
        _ => ordinal,
    }
}

/// Ordered, optionally keyed sequence of children.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeCollection {
    kind: CollectionKind,
    items: Vec<CollectionItem>,
}

impl NodeCollection {
    pub fn new(kind: CollectionKind) -> Self {
        Self {
            kind,
            items: Vec::new(),
        }
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub fn push(&mut self, key: Option<Key>, value: NodeValue) {
        self.items.push(CollectionItem { key, value });
    }

    pub fn items(&self) -> &[CollectionItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    Node(Box<Node>),
    Reference(NodeRef),
    Collection(NodeCollection),
    Property(NodeProperty),
}

impl NodeValue {
    /// Discriminator written to the `meta-type` attribute.
    pub fn meta_type(&self) -> &'static str {
        match self {
            NodeValue::Node(_) | NodeValue::Reference(_) => "object",
            NodeValue::Collection(_) => "collection",
            NodeValue::Property(_) => "property",
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            NodeValue::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&NodeRef> {
        match self {
            NodeValue::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&NodeCollection> {
        match self {
            NodeValue::Collection(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_property(&self) -> Option<&NodeProperty> {
        match self {
            NodeValue::Property(p) => Some(p),
            _ => None,
        }
    }

    /// Id of the object this value stands for, whether full node or reference.
    pub fn object_id(&self) -> Option<NodeId> {
        match self {
            NodeValue::Node(n) => Some(n.id),
            NodeValue::Reference(r) => Some(r.id),
            _ => None,
        }
    }
}

impl From<Node> for NodeValue {
    fn from(node: Node) -> Self {
        NodeValue::Node(Box::new(node))
    }
}

impl From<NodeProperty> for NodeValue {
    fn from(p: NodeProperty) -> Self {
        NodeValue::Property(p)
    }
}

impl From<NodeCollection> for NodeValue {
    fn from(c: NodeCollection) -> Self {
        NodeValue::Collection(c)
    }
}

/// One serialized object instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    id: NodeId,
    name: String,
    metadata: Metadata,
    properties: Vec<(String, NodeValue)>,
}

impl Node {
    pub fn new(id: NodeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            metadata: Metadata::new(),
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.metadata.insert(META_CLASS, class);
        self
    }

    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<NodeValue>) -> Self {
        self.set_property(name, value.into());
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn class(&self) -> Option<&str> {
        self.metadata.get(META_CLASS)
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    pub fn properties(&self) -> &[(String, NodeValue)] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&NodeValue> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.property(name).is_some()
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: NodeValue) {
        let name = name.into();
        match self.properties.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.properties.push((name, value)),
        }
    }

    pub fn stats(&self) -> NodeStats {
        let mut stats = NodeStats::default();
        stats.visit_node(self, 1);
        stats
    }
}

/// Shape summary of a node tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeStats {
    pub nodes: usize,
    pub references: usize,
    pub collections: usize,
    pub properties: usize,
    pub depth: usize,
}

impl NodeStats {
    fn visit_node(&mut self, node: &Node, depth: usize) {
        self.nodes += 1;
        self.depth = self.depth.max(depth);
        for (_, value) in node.properties() {
            self.visit_value(value, depth + 1);
        }
    }

    fn visit_value(&mut self, value: &NodeValue, depth: usize) {
        match value {
            NodeValue::Node(n) => self.visit_node(n, depth),
            NodeValue::Reference(_) => self.references += 1,
            NodeValue::Property(_) => self.properties += 1,
            NodeValue::Collection(c) => {
                self.collections += 1;
                for item in c.items() {
                    self.visit_value(&item.value, depth + 1);
                }
            }
        }
    }
}

impl fmt::Display for NodeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nodes, {} references, {} collections, {} properties, depth {}",
            self.nodes, self.references, self.collections, self.properties, self.depth
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_position() {
        assert_eq!(item_position(Some(&Key::Index(4)), 1), 4);
        assert_eq!(item_position(Some(&Key::from("lead")), 1), 1);
        assert_eq!(item_position(Some(&Key::Index(-2)), 3), 3);
        assert_eq!(item_position(None, 0), 0);
    }

    #[test]
    fn test_metadata_order() {
        let mut meta = Metadata::new();
        meta.insert("class", "app.User");
        meta.insert("merge", "insert");
        meta.insert("class", "app.Admin");
        let keys: Vec<_> = meta.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["class", "merge"]);
        assert_eq!(meta.get("class"), Some("app.Admin"));
        assert_eq!(meta.remove("merge"), Some("insert".to_string()));
        assert_eq!(meta.len(), 1);
    }

    #[test]
    fn test_property_wraps_scalars_only() {
        assert!(NodeProperty::from_value(Value::Integer(1)).is_some());
        assert!(NodeProperty::from_value(Value::List(vec![])).is_none());
        let p = NodeProperty::from_value(Value::Null).unwrap();
        assert_eq!(p.scalar_type(), ScalarType::Null);
        assert_eq!(p.wire_text(), "");
    }

    #[test]
    fn test_stats() {
        let user = Node::new(2, "User")
            .with_class("app.User")
            .with_property("name", NodeProperty::from_value("ann".into()).unwrap());
        let mut employees = NodeCollection::new(CollectionKind::List);
        employees.push(Some(Key::Index(0)), user.into());
        employees.push(
            Some(Key::Index(1)),
            NodeValue::Reference(NodeRef {
                id: 2,
                name: "User".into(),
            }),
        );
        let company = Node::new(1, "Company")
            .with_class("app.Company")
            .with_property("employees", employees);

        let stats = company.stats();
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.references, 1);
        assert_eq!(stats.collections, 1);
        assert_eq!(stats.properties, 1);
        assert_eq!(stats.depth, 3);
    }
}
