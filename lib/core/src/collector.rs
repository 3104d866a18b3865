//! Converts a live object graph into a [`Node`] tree.
//!
//! The walk is depth-first in field declaration order. Every object is
//! registered in a pass-local visited set before its fields are read, and any
//! later encounter of the same handle yields a [`NodeRef`] instead of a second
//! subtree. This is what keeps cyclic graphs finite.
//!
//! An object first met through a `do_not_descend` field is written with its
//! scalars only. If the same object is later reached through a regular field,
//! the walk is repeated with that object collected in full at its first
//! occurrence, so no later reference ever points at a truncated subtree.

use crate::config::CollectorOptions;
use crate::entity::{short_class_name, ObjectGraph};
use crate::error::{CollectorError, Result};
use crate::inventory::InventoryManager;
use crate::node::{
    item_position, CollectionKind, Node, NodeCollection, NodeId, NodeProperty, NodeRef,
    NodeValue, ITEM_NAME, NESTED_COLLECTION_NAME,
};
use crate::path::{NodePath, Segment};
use crate::value::{Key, ObjectId, Value};
use ahash::AHashSet;
use tracing::{debug, trace};

pub struct Collector<'a> {
    options: CollectorOptions,
    inventory: Option<&'a InventoryManager>,
}

impl<'a> Collector<'a> {
    pub fn new(options: CollectorOptions) -> Self {
        Self {
            options,
            inventory: None,
        }
    }

    #[must_use]
    pub fn with_inventory(mut self, inventory: &'a InventoryManager) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn options(&self) -> &CollectorOptions {
        &self.options
    }

    pub fn collect(&self, graph: &ObjectGraph, root: ObjectId) -> Result<Node> {
        self.collect_value(graph, &Value::Object(root))
    }

    /// Collect starting from an arbitrary value, which must be an object.
    pub fn collect_value(&self, graph: &ObjectGraph, root: &Value) -> Result<Node> {
        let id = root.as_object().ok_or_else(|| CollectorError::NotAnObject {
            found: root.kind_name().to_string(),
        })?;
        let entity = graph.get(id).ok_or(CollectorError::DanglingHandle(id.0))?;
        let name = short_class_name(entity.class_name()).to_string();
        let path = NodePath::root().node(&name);

        // Grows by at least one object per repetition, so the loop ends.
        let mut promoted: AHashSet<ObjectId> = AHashSet::new();
        loop {
            let mut pass = CollectPass {
                graph,
                options: &self.options,
                inventory: self.inventory,
                promoted: &promoted,
                visited: AHashSet::new(),
                shallow_only: AHashSet::new(),
                upgrades: AHashSet::new(),
            };
            let node = pass.collect_node(id, name.clone(), &path, 1, false)?;
            if pass.upgrades.is_empty() {
                debug!(root = %id, objects = pass.visited.len(), "collected object graph");
                return Ok(node);
            }
            let upgrades = std::mem::take(&mut pass.upgrades);
            debug!(
                root = %id,
                upgraded = upgrades.len(),
                "objects reached in full after a shallow visit, collecting again"
            );
            promoted.extend(upgrades);
        }
    }
}

#[inline]
fn node_id(id: ObjectId) -> NodeId {
    id.0 as NodeId
}

fn into_entries(value: Value) -> Option<(CollectionKind, Vec<(Key, Value)>)> {
    match value {
        Value::List(items) => Some((
            CollectionKind::List,
            items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Key::Index(i as i64), v))
                .collect(),
        )),
        Value::Map(entries) => Some((CollectionKind::Map, entries)),
        _ => None,
    }
}

/// State of one collection pass, borrowed by every recursive call.
struct CollectPass<'c> {
    graph: &'c ObjectGraph,
    options: &'c CollectorOptions,
    inventory: Option<&'c InventoryManager>,
    /// Objects collected in full even where a field asks for scalars only.
    promoted: &'c AHashSet<ObjectId>,
    visited: AHashSet<ObjectId>,
    /// Visited objects whose node holds scalars only.
    shallow_only: AHashSet<ObjectId>,
    /// Shallow-only objects later requested in full.
    upgrades: AHashSet<ObjectId>,
}

impl CollectPass<'_> {
    fn blocked(&self, path: &NodePath, value: Option<&Value>) -> bool {
        self.inventory
            .map_or(false, |inventory| !inventory.is_allowed(path, value))
    }

    fn class_short_name(&self, id: ObjectId) -> Result<String> {
        let entity = self
            .graph
            .get(id)
            .ok_or(CollectorError::DanglingHandle(id.0))?;
        Ok(short_class_name(entity.class_name()).to_string())
    }

    fn object_value(
        &mut self,
        id: ObjectId,
        name: String,
        path: &NodePath,
        level: usize,
        shallow: bool,
    ) -> Result<NodeValue> {
        let shallow = shallow && !self.promoted.contains(&id);
        if self.visited.contains(&id) {
            if !shallow && self.shallow_only.contains(&id) {
                self.upgrades.insert(id);
            }
            trace!(object = %id, path = %path, "already visited, emitting back-reference");
            return Ok(NodeValue::Reference(NodeRef {
                id: node_id(id),
                name,
            }));
        }
        let node = self.collect_node(id, name, path, level, shallow)?;
        Ok(NodeValue::Node(Box::new(node)))
    }

    /// `shallow` nodes keep their scalar properties only.
    fn collect_node(
        &mut self,
        id: ObjectId,
        name: String,
        path: &NodePath,
        level: usize,
        shallow: bool,
    ) -> Result<Node> {
        let graph = self.graph;
        let entity = graph.get(id).ok_or(CollectorError::DanglingHandle(id.0))?;
        self.visited.insert(id);
        if shallow {
            self.shallow_only.insert(id);
        }

        let class = entity.class_name();
        let mut node = Node::new(node_id(id), name).with_class(class);

        for field in entity.describe_fields() {
            if !self.options.admits_field(&field.name) {
                continue;
            }
            let value = entity
                .get_field(&field.name)
                .ok_or_else(|| CollectorError::UnreadableField {
                    class: class.to_string(),
                    field: field.name.clone(),
                })?;
            if let Some(child) = self.collect_field(&field.name, value, path, level, shallow)? {
                node.set_property(field.name, child);
            }
        }
        Ok(node)
    }

    fn collect_field(
        &mut self,
        name: &str,
        value: Value,
        parent: &NodePath,
        level: usize,
        shallow: bool,
    ) -> Result<Option<NodeValue>> {
        match value {
            Value::Object(child) => {
                if shallow || !self.options.within_depth(level + 1) {
                    return Ok(None);
                }
                let path = parent.node(name);
                if self.blocked(&path, None) {
                    return Ok(None);
                }
                let child_name = self.class_short_name(child)?;
                let child_shallow = !self.options.descends_into(name);
                self.object_value(child, child_name, &path, level + 1, child_shallow)
                    .map(Some)
            }
            Value::List(_) | Value::Map(_) => {
                if shallow || !self.options.within_depth(level + 1) {
                    return Ok(None);
                }
                let path = parent.collection(name);
                if self.blocked(&path, None) {
                    return Ok(None);
                }
                let items_shallow = !self.options.descends_into(name);
                match into_entries(value) {
                    Some((kind, entries)) => {
                        let collection = self.collect_collection(
                            kind,
                            entries,
                            &path,
                            level + 1,
                            items_shallow,
                        )?;
                        Ok(Some(collection.into()))
                    }
                    None => Ok(None),
                }
            }
            scalar => {
                let path = parent.value(name);
                if self.blocked(&path, Some(&scalar)) {
                    return Ok(None);
                }
                Ok(NodeProperty::from_value(scalar).map(NodeValue::Property))
            }
        }
    }

    /// Item paths are indexed by [`item_position`], the same index the
    /// restorer derives from the written collection.
    fn collect_collection(
        &mut self,
        kind: CollectionKind,
        entries: Vec<(Key, Value)>,
        path: &NodePath,
        level: usize,
        shallow: bool,
    ) -> Result<NodeCollection> {
        let mut collection = NodeCollection::new(kind);

        for (key, item) in entries {
            let index = item_position(Some(&key), collection.len());
            let child = match item {
                Value::Object(id) => {
                    let name = self.class_short_name(id)?;
                    let item_path = path.node_at(&name, index);
                    if self.blocked(&item_path, None) {
                        continue;
                    }
                    self.object_value(id, name, &item_path, level, shallow)?
                }
                Value::List(_) | Value::Map(_) => {
                    if !self.options.within_depth(level + 1) {
                        continue;
                    }
                    let item_path =
                        path.push(Segment::collection_at(NESTED_COLLECTION_NAME, index));
                    if self.blocked(&item_path, None) {
                        continue;
                    }
                    match into_entries(item) {
                        Some((nested_kind, nested)) => self
                            .collect_collection(nested_kind, nested, &item_path, level + 1, shallow)?
                            .into(),
                        None => continue,
                    }
                }
                scalar => {
                    let item_path = path.value_at(ITEM_NAME, index);
                    if self.blocked(&item_path, Some(&scalar)) {
                        continue;
                    }
                    match NodeProperty::from_value(scalar) {
                        Some(property) => property.into(),
                        None => continue,
                    }
                }
            };
            collection.push(Some(key), child);
        }
        Ok(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::DynamicObject;
    use crate::filter::Expression;

    fn person(graph: &mut ObjectGraph, name: &str) -> ObjectId {
        graph.insert(DynamicObject::new("app.User").with_field("name", name))
    }

    #[test]
    fn test_scalars_in_declaration_order() {
        let mut graph = ObjectGraph::new();
        let root = graph.insert(
            DynamicObject::new("app.Company")
                .with_field("name", "rts")
                .with_field("size", 11i64)
                .with_field("public", false),
        );

        let node = Collector::new(CollectorOptions::default())
            .collect(&graph, root)
            .unwrap();
        assert_eq!(node.name(), "Company");
        assert_eq!(node.class(), Some("app.Company"));
        let names: Vec<_> = node.properties().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["name", "size", "public"]);
        assert_eq!(
            node.property("size").and_then(NodeValue::as_property).map(|p| p.value()),
            Some(&Value::Integer(11))
        );
    }

    #[test]
    fn test_cycle_terminates_with_back_reference() {
        let mut graph = ObjectGraph::new();
        let a = graph.insert(DynamicObject::new("app.A"));
        let b = graph.insert(DynamicObject::new("app.B").with_field("parent", a));
        graph.set_field(a, "child", Value::Object(b)).unwrap();

        let node = Collector::new(CollectorOptions::default())
            .collect(&graph, a)
            .unwrap();
        let child = node.property("child").and_then(NodeValue::as_node).unwrap();
        let back = child.property("parent").and_then(NodeValue::as_reference).unwrap();
        assert_eq!(back.id, node.id());
        assert_eq!(back.name, "A");
    }

    #[test]
    fn test_shared_object_collected_once() {
        let mut graph = ObjectGraph::new();
        let b = person(&mut graph, "bob");
        let a = graph.insert(
            DynamicObject::new("app.Pair")
                .with_field("x", b)
                .with_field("y", b),
        );

        let node = Collector::new(CollectorOptions::default())
            .collect(&graph, a)
            .unwrap();
        assert!(node.property("x").and_then(NodeValue::as_node).is_some());
        let y = node.property("y").and_then(NodeValue::as_reference).unwrap();
        assert_eq!(y.id, b.0 as NodeId);
        assert_eq!(node.stats().nodes, 2);
    }

    #[test]
    fn test_collection_keys() {
        let mut graph = ObjectGraph::new();
        let ann = person(&mut graph, "ann");
        let bob = person(&mut graph, "bob");
        let root = graph.insert(
            DynamicObject::new("app.Team")
                .with_field("members", vec![ann, bob])
                .with_field(
                    "labels",
                    Value::Map(vec![
                        (Key::from("lead"), Value::from("ann")),
                        (Key::Index(7), Value::Integer(3)),
                    ]),
                ),
        );

        let node = Collector::new(CollectorOptions::default())
            .collect(&graph, root)
            .unwrap();
        let members = node.property("members").and_then(NodeValue::as_collection).unwrap();
        assert_eq!(members.kind(), CollectionKind::List);
        let keys: Vec<_> = members.items().iter().map(|i| i.key.clone()).collect();
        assert_eq!(keys, vec![Some(Key::Index(0)), Some(Key::Index(1))]);

        let labels = node.property("labels").and_then(NodeValue::as_collection).unwrap();
        assert_eq!(labels.kind(), CollectionKind::Map);
        assert_eq!(labels.items()[0].key, Some(Key::from("lead")));
        assert_eq!(labels.items()[1].key, Some(Key::Index(7)));
    }

    #[test]
    fn test_descent_level_one_keeps_scalars_only() {
        let mut graph = ObjectGraph::new();
        let ann = person(&mut graph, "ann");
        let root = graph.insert(
            DynamicObject::new("app.Company")
                .with_field("name", "rts")
                .with_field("owner", ann)
                .with_field("tags", vec!["a", "b"]),
        );

        let node = Collector::new(CollectorOptions::default().with_descent_level(1))
            .collect(&graph, root)
            .unwrap();
        assert!(node.has_property("name"));
        assert!(!node.has_property("owner"));
        assert!(!node.has_property("tags"));
    }

    #[test]
    fn test_do_not_descend_collects_scalars_of_child() {
        let mut graph = ObjectGraph::new();
        let city = graph.insert(DynamicObject::new("app.City").with_field("zip", "1000"));
        let ann = graph.insert(
            DynamicObject::new("app.User")
                .with_field("name", "ann")
                .with_field("city", city),
        );
        let root = graph.insert(DynamicObject::new("app.Company").with_field("owner", ann));

        let node = Collector::new(CollectorOptions::default().do_not_descend("owner"))
            .collect(&graph, root)
            .unwrap();
        let owner = node.property("owner").and_then(NodeValue::as_node).unwrap();
        assert!(owner.has_property("name"));
        assert!(!owner.has_property("city"));
    }

    #[test]
    fn test_shallow_visit_is_collected_in_full_when_reached_again() {
        let mut graph = ObjectGraph::new();
        let city = graph.insert(DynamicObject::new("app.City").with_field("zip", "1000"));
        let ann = graph.insert(
            DynamicObject::new("app.User")
                .with_field("name", "ann")
                .with_field("city", city),
        );
        let root = graph.insert(
            DynamicObject::new("app.Company")
                .with_field("owner", ann)
                .with_field("employees", vec![ann]),
        );

        let node = Collector::new(CollectorOptions::default().do_not_descend("owner"))
            .collect(&graph, root)
            .unwrap();
        let owner = node.property("owner").and_then(NodeValue::as_node).unwrap();
        assert!(owner.has_property("city"));
        let employees = node.property("employees").and_then(NodeValue::as_collection).unwrap();
        let first = employees.items()[0].value.as_reference().unwrap();
        assert_eq!(first.id, owner.id());

        let stats = node.stats();
        assert_eq!(stats.nodes, 3);
        assert_eq!(stats.references, 1);
    }

    #[test]
    fn test_repeated_shallow_visits_share_one_node() {
        let mut graph = ObjectGraph::new();
        let city = graph.insert(DynamicObject::new("app.City").with_field("zip", "1000"));
        let ann = graph.insert(
            DynamicObject::new("app.User")
                .with_field("name", "ann")
                .with_field("city", city),
        );
        let root = graph.insert(
            DynamicObject::new("app.Company")
                .with_field("owner", ann)
                .with_field("auditor", ann),
        );

        let options = CollectorOptions::default()
            .do_not_descend("owner")
            .do_not_descend("auditor");
        let node = Collector::new(options).collect(&graph, root).unwrap();
        let owner = node.property("owner").and_then(NodeValue::as_node).unwrap();
        assert!(!owner.has_property("city"));
        assert!(node.property("auditor").and_then(NodeValue::as_reference).is_some());
        assert_eq!(node.stats().nodes, 2);
    }

    #[test]
    fn test_do_not_descend_applies_to_collection_items() {
        let mut graph = ObjectGraph::new();
        let city = graph.insert(DynamicObject::new("app.City").with_field("zip", "1000"));
        let ann = graph.insert(
            DynamicObject::new("app.User")
                .with_field("name", "ann")
                .with_field("city", city),
        );
        let root = graph.insert(
            DynamicObject::new("app.Company")
                .with_field("employees", vec![ann]),
        );

        let node = Collector::new(CollectorOptions::default().do_not_descend("employees"))
            .collect(&graph, root)
            .unwrap();
        let employees = node.property("employees").and_then(NodeValue::as_collection).unwrap();
        let user = employees.items()[0].value.as_node().unwrap();
        assert!(user.has_property("name"));
        assert!(!user.has_property("city"));
        assert_eq!(node.stats().nodes, 2);
    }

    #[test]
    fn test_item_paths_use_item_keys() {
        let mut graph = ObjectGraph::new();
        let ann = person(&mut graph, "ann");
        let bob = person(&mut graph, "bob");
        let root = graph.insert(
            DynamicObject::new("app.Company")
                .with_field("employees", vec![ann, bob])
                .with_field(
                    "labels",
                    Value::Map(vec![
                        (Key::from("lead"), Value::from("ann")),
                        (Key::from("deputy"), Value::from("bob")),
                    ]),
                ),
        );
        let employees = NodePath::root().node("Company").collection("employees");
        let labels = NodePath::root().node("Company").collection("labels");
        let inventory = InventoryManager::new()
            .exclude(Expression::path(employees.node_at("User", 0)))
            .exclude(Expression::path(labels.value_at(ITEM_NAME, 0)));

        let node = Collector::new(CollectorOptions::default())
            .with_inventory(&inventory)
            .collect(&graph, root)
            .unwrap();
        let kept = node.property("employees").and_then(NodeValue::as_collection).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept.items()[0].key, Some(Key::Index(1)));

        // Name-keyed items count only the items already written.
        let kept = node.property("labels").and_then(NodeValue::as_collection).unwrap();
        assert!(kept.is_empty());
    }

    #[test]
    fn test_value_expression_filters_scalars_not_nodes() {
        let mut graph = ObjectGraph::new();
        let ann = person(&mut graph, "ann");
        let bob = person(&mut graph, "bob");
        let root = graph
            .insert(DynamicObject::new("app.Company").with_field("employees", vec![ann, bob]));
        let employees = NodePath::root().node("Company").collection("employees");
        let inventory = InventoryManager::new().exclude(Expression::compare(
            employees,
            crate::filter::Operator::Equal,
            "bob",
        ));

        let node = Collector::new(CollectorOptions::default())
            .with_inventory(&inventory)
            .collect(&graph, root)
            .unwrap();
        let kept = node.property("employees").and_then(NodeValue::as_collection).unwrap();
        assert_eq!(kept.len(), 2);
        let bob = kept.items()[1].value.as_node().unwrap();
        assert!(!bob.has_property("name"));
        let ann = kept.items()[0].value.as_node().unwrap();
        assert!(ann.has_property("name"));
    }

    fn nested_company(graph: &mut ObjectGraph) -> ObjectId {
        let country = graph.insert(DynamicObject::new("app.Country").with_field("code", "CH"));
        let home = graph.insert(
            DynamicObject::new("app.City")
                .with_field("zip", "1000")
                .with_field("country", country),
        );
        let work = graph.insert(
            DynamicObject::new("app.City")
                .with_field("zip", "8000")
                .with_field("country", country),
        );
        let ann = graph.insert(
            DynamicObject::new("app.User")
                .with_field("name", "ann")
                .with_field("city", home),
        );
        let bob = graph.insert(
            DynamicObject::new("app.User")
                .with_field("name", "bob")
                .with_field("city", work),
        );
        graph.insert(
            DynamicObject::new("app.Company")
                .with_field("name", "rts")
                .with_field("owner", ann)
                .with_field("employees", vec![bob]),
        )
    }

    #[test]
    fn test_descent_level_two() {
        let mut graph = ObjectGraph::new();
        let root = nested_company(&mut graph);

        let node = Collector::new(CollectorOptions::default().with_descent_level(2))
            .collect(&graph, root)
            .unwrap();
        let owner = node.property("owner").and_then(NodeValue::as_node).unwrap();
        assert!(owner.has_property("name"));
        assert!(!owner.has_property("city"));

        // Items share the level of their collection.
        let employees = node.property("employees").and_then(NodeValue::as_collection).unwrap();
        let bob = employees.items()[0].value.as_node().unwrap();
        assert!(bob.has_property("name"));
        assert!(!bob.has_property("city"));
        assert_eq!(node.stats().nodes, 3);
    }

    #[test]
    fn test_descent_level_three() {
        let mut graph = ObjectGraph::new();
        let root = nested_company(&mut graph);

        let node = Collector::new(CollectorOptions::default().with_descent_level(3))
            .collect(&graph, root)
            .unwrap();
        let owner = node.property("owner").and_then(NodeValue::as_node).unwrap();
        let home = owner.property("city").and_then(NodeValue::as_node).unwrap();
        assert!(home.has_property("zip"));
        assert!(!home.has_property("country"));

        let employees = node.property("employees").and_then(NodeValue::as_collection).unwrap();
        let bob = employees.items()[0].value.as_node().unwrap();
        let work = bob.property("city").and_then(NodeValue::as_node).unwrap();
        assert!(work.has_property("zip"));
        assert!(!work.has_property("country"));
        assert_eq!(node.stats().nodes, 5);
    }

    #[test]
    fn test_name_policy() {
        let mut graph = ObjectGraph::new();
        let root = graph.insert(
            DynamicObject::new("app.User")
                .with_field("name", "ann")
                .with_field("password", "x"),
        );
        let node = Collector::new(CollectorOptions::default().ignore("password"))
            .collect(&graph, root)
            .unwrap();
        assert!(node.has_property("name"));
        assert!(!node.has_property("password"));
    }

    #[test]
    fn test_inventory_exclusion() {
        let mut graph = ObjectGraph::new();
        let ann = person(&mut graph, "ann");
        let root = graph.insert(
            DynamicObject::new("app.Company")
                .with_field("name", "rts")
                .with_field("employees", vec![ann]),
        );
        let inventory = InventoryManager::new().exclude(Expression::path(
            NodePath::root().node("Company").collection("employees"),
        ));

        let node = Collector::new(CollectorOptions::default())
            .with_inventory(&inventory)
            .collect(&graph, root)
            .unwrap();
        assert!(node.has_property("name"));
        assert!(!node.has_property("employees"));
    }

    #[test]
    fn test_rejects_non_objects() {
        let graph = ObjectGraph::new();
        let collector = Collector::new(CollectorOptions::default());
        let err = collector.collect_value(&graph, &Value::Integer(1)).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Collector(CollectorError::NotAnObject { .. })
        ));
        let err = collector.collect(&graph, ObjectId(3)).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Collector(CollectorError::DanglingHandle(3))
        ));
    }
}
