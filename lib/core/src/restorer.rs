//! Rebuilds live objects from a [`Node`] tree.
//!
//! Objects are created through the [`ClassRegistry`] without running any
//! constructor logic and then filled field by field. A node id restored once
//! in a pass always maps to the same [`ObjectId`], so shared references and
//! cycles in the original graph come back as shared handles.
//!
//! When a [`Merger`] is attached, every restored object is reconciled with it
//! according to its [`MergeMode`], children before parents. The merger is
//! flushed once at the end of a pass that reconciled anything.

use crate::config::RestorerOptions;
use crate::entity::{ClassRegistry, FieldKind, ObjectGraph, Restorable};
use crate::error::{MergerError, RestorerError, Result};
use crate::inventory::InventoryManager;
use crate::merger::{MergeMode, Merger};
use crate::node::{
    item_position, CollectionKind, Node, NodeCollection, NodeId, NodeValue, ITEM_NAME,
    META_MERGE, NESTED_COLLECTION_NAME,
};
use crate::path::{NodePath, Segment};
use crate::value::{FieldError, Key, ObjectId, Value};
use ahash::AHashMap;
use tracing::{debug, trace, warn};

pub struct Restorer<'a> {
    registry: &'a ClassRegistry,
    options: RestorerOptions,
    inventory: Option<&'a InventoryManager>,
    merger: Option<&'a mut dyn Merger>,
}

/// Bookkeeping of one `restore` call.
#[derive(Default)]
struct RestorePass {
    restored: AHashMap<NodeId, ObjectId>,
    reconciled: usize,
}

impl<'a> Restorer<'a> {
    pub fn new(registry: &'a ClassRegistry, options: RestorerOptions) -> Self {
        Self {
            registry,
            options,
            inventory: None,
            merger: None,
        }
    }

    #[must_use]
    pub fn with_inventory(mut self, inventory: &'a InventoryManager) -> Self {
        self.inventory = Some(inventory);
        self
    }

    #[must_use]
    pub fn with_merger(mut self, merger: &'a mut dyn Merger) -> Self {
        self.merger = Some(merger);
        self
    }

    pub fn options(&self) -> &RestorerOptions {
        &self.options
    }

    /// Restore `node` into `graph`.
    ///
    /// With `existing`, the root node is written into that object instead of
    /// a fresh instance; its class must match the node's class.
    pub fn restore(
        &mut self,
        graph: &mut ObjectGraph,
        node: &Node,
        existing: Option<ObjectId>,
    ) -> Result<ObjectId> {
        let mut pass = RestorePass::default();
        let path = NodePath::root().node(node.name());
        let id = self.restore_node(&mut pass, graph, node, &path, existing)?;

        if pass.reconciled > 0 {
            if let Some(merger) = self.merger.as_deref_mut() {
                merger.flush()?;
            }
        }
        debug!(
            root = %id,
            objects = pass.restored.len(),
            reconciled = pass.reconciled,
            "restored node tree"
        );
        Ok(id)
    }

    /// Like [`restore`](Self::restore), but fails unless the root comes back
    /// as a `T`.
    pub fn restore_as<T: Restorable>(
        &mut self,
        graph: &mut ObjectGraph,
        node: &Node,
        existing: Option<ObjectId>,
    ) -> Result<ObjectId> {
        let id = self.restore(graph, node, existing)?;
        if graph.downcast_ref::<T>(id).is_none() {
            let actual = graph
                .get(id)
                .map(|e| e.class_name().to_string())
                .unwrap_or_default();
            return Err(RestorerError::CapabilityMismatch {
                expected: T::CLASS.to_string(),
                actual,
            }
            .into());
        }
        Ok(id)
    }

    fn blocked(&self, path: &NodePath, value: Option<&Value>) -> bool {
        self.inventory
            .map_or(false, |inventory| !inventory.is_allowed(path, value))
    }

    fn restore_node(
        &mut self,
        pass: &mut RestorePass,
        graph: &mut ObjectGraph,
        node: &Node,
        path: &NodePath,
        existing: Option<ObjectId>,
    ) -> Result<ObjectId> {
        let class = node.class().ok_or_else(|| RestorerError::MissingClass {
            node: node.name().to_string(),
        })?;

        let id = match existing {
            Some(id) => {
                let entity = graph.get(id).ok_or(RestorerError::UnknownTarget(id.0))?;
                if entity.class_name() != class {
                    return Err(RestorerError::CapabilityMismatch {
                        expected: class.to_string(),
                        actual: entity.class_name().to_string(),
                    }
                    .into());
                }
                id
            }
            None => {
                let entity =
                    self.registry
                        .instantiate(class)
                        .ok_or_else(|| RestorerError::UnknownClass {
                            class: class.to_string(),
                        })?;
                graph.insert_boxed(entity)
            }
        };
        // Registered before the fields so that back-references resolve.
        pass.restored.insert(node.id(), id);

        for (name, value) in node.properties() {
            let field_path = path.push(field_segment(name, value));
            let scalar = value.as_property().map(|p| p.value());
            if self.blocked(&field_path, scalar) {
                trace!(path = %field_path, "field excluded by inventory");
                continue;
            }

            let kind = graph.get(id).and_then(|e| e.field_kind(name));
            if kind.is_none() && self.options.ignore_unknown_fields {
                trace!(class, field = %name, "skipping unknown field");
                continue;
            }

            let restored = self.restore_value(pass, graph, value, &field_path, kind)?;
            match graph.set_field(id, name, restored) {
                Ok(()) => {}
                Err(FieldError::Unknown(_)) if self.options.ignore_unknown_fields => {
                    trace!(class, field = %name, "skipping unknown field");
                }
                Err(e) => {
                    return Err(RestorerError::Field {
                        class: class.to_string(),
                        field: name.clone(),
                        reason: e.to_string(),
                    }
                    .into())
                }
            }
        }

        self.reconcile(pass, graph, node, id)
    }

    fn restore_value(
        &mut self,
        pass: &mut RestorePass,
        graph: &mut ObjectGraph,
        value: &NodeValue,
        path: &NodePath,
        kind: Option<FieldKind>,
    ) -> Result<Value> {
        match value {
            NodeValue::Node(child) => {
                let id = self.restore_node(pass, graph, child, path, None)?;
                Ok(Value::Object(id))
            }
            NodeValue::Reference(reference) => pass
                .restored
                .get(&reference.id)
                .copied()
                .map(Value::Object)
                .ok_or_else(|| RestorerError::DanglingReference(reference.id).into()),
            NodeValue::Property(property) => match kind {
                Some(FieldKind::Scalar(target)) => {
                    property.value().coerce(target).ok_or_else(|| {
                        RestorerError::Field {
                            class: String::new(),
                            field: path.to_string(),
                            reason: format!(
                                "cannot convert {} to {}",
                                property.scalar_type(),
                                target
                            ),
                        }
                        .into()
                    })
                }
                _ => Ok(property.value().clone()),
            },
            NodeValue::Collection(collection) => {
                self.restore_collection(pass, graph, collection, path)
            }
        }
    }

    fn restore_collection(
        &mut self,
        pass: &mut RestorePass,
        graph: &mut ObjectGraph,
        collection: &NodeCollection,
        path: &NodePath,
    ) -> Result<Value> {
        let mut entries: Vec<(Key, Value)> = Vec::with_capacity(collection.len());
        let mut next_index: i64 = 0;

        for (position, item) in collection.items().iter().enumerate() {
            let index = item_position(item.key.as_ref(), position);
            let item_path = path.push(item_segment(&item.value, index));
            let scalar = item.value.as_property().map(|p| p.value());
            if self.blocked(&item_path, scalar) {
                continue;
            }
            let value = self.restore_value(pass, graph, &item.value, &item_path, None)?;

            // Unkeyed items continue the integer sequence.
            let key = item.key.clone().unwrap_or(Key::Index(next_index));
            if let Key::Index(i) = key {
                next_index = next_index.max(i.saturating_add(1));
            }
            entries.push((key, value));
        }

        let positional = entries.iter().all(|(k, _)| matches!(k, Key::Index(_)));
        if collection.kind() == CollectionKind::List && positional {
            Ok(Value::List(entries.into_iter().map(|(_, v)| v).collect()))
        } else {
            Ok(Value::Map(entries))
        }
    }

    fn reconcile(
        &mut self,
        pass: &mut RestorePass,
        graph: &mut ObjectGraph,
        node: &Node,
        id: ObjectId,
    ) -> Result<ObjectId> {
        let mode = match node.metadata().get(META_MERGE) {
            Some(directive) => MergeMode::parse(directive).unwrap_or_else(|| {
                warn!(node = node.name(), directive, "unknown merge directive, using pass mode");
                self.options.merge_mode
            }),
            None => self.options.merge_mode,
        };

        let merger = match (mode, self.merger.as_deref_mut()) {
            (MergeMode::Insert, _) | (_, None) => return Ok(id),
            (_, Some(merger)) => merger,
        };

        if mode == MergeMode::AssumeIncomplete {
            backfill_mandatory(merger, graph, node, id)?;
        }
        let merged = merge_complete(merger, graph, node, id)?;
        pass.reconciled += 1;
        if merged != id {
            pass.restored.insert(node.id(), merged);
        }
        trace!(node = node.name(), %mode, object = %merged, "reconciled with store");
        Ok(merged)
    }
}

fn field_segment(name: &str, value: &NodeValue) -> Segment {
    match value {
        NodeValue::Node(_) | NodeValue::Reference(_) => Segment::node(name),
        NodeValue::Collection(_) => Segment::collection(name),
        NodeValue::Property(_) => Segment::value(name),
    }
}

fn item_segment(value: &NodeValue, index: usize) -> Segment {
    match value {
        NodeValue::Node(node) => Segment::node_at(node.name(), index),
        NodeValue::Reference(reference) => Segment::node_at(reference.name.as_str(), index),
        NodeValue::Collection(_) => Segment::collection_at(NESTED_COLLECTION_NAME, index),
        NodeValue::Property(_) => Segment::value_at(ITEM_NAME, index),
    }
}

/// Merge `object`, falling back to the stored counterpart when the merger
/// cannot identify it on its own.
///
/// Fields still null on `object` are filled from the stored copy before the
/// second merge attempt.
pub fn merge_complete(
    merger: &mut dyn Merger,
    graph: &mut ObjectGraph,
    node: &Node,
    object: ObjectId,
) -> Result<ObjectId> {
    if let Some(merged) = merger.merge(graph, object)? {
        return Ok(merged);
    }
    if let Some(stored) = merger.find(graph, object)? {
        fill_nulls(graph, stored, object)?;
        if let Some(merged) = merger.merge(graph, object)? {
            return Ok(merged);
        }
    }
    let class = graph
        .get(object)
        .map(|e| e.class_name().to_string())
        .unwrap_or_default();
    Err(MergerError::MissingIdentity {
        class,
        node: node.name().to_string(),
    }
    .into())
}

/// Fill mandatory properties the node did not carry from the stored
/// counterpart of `object`.
pub fn backfill_mandatory(
    merger: &mut dyn Merger,
    graph: &mut ObjectGraph,
    node: &Node,
    object: ObjectId,
) -> Result<()> {
    let missing: Vec<String> = merger
        .mandatory_properties(graph, object)?
        .into_iter()
        .filter(|field| !node.has_property(field))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }

    let stored = merger.find(graph, object)?;
    for field in missing {
        let value = stored
            .and_then(|s| graph.field(s, &field))
            .filter(|v| !v.is_null())
            .ok_or_else(|| RestorerError::MandatoryFieldUnresolved {
                field: field.clone(),
                node: node.name().to_string(),
            })?;
        set_or_fail(graph, object, &field, value)?;
    }
    Ok(())
}

fn fill_nulls(graph: &mut ObjectGraph, from: ObjectId, into: ObjectId) -> Result<()> {
    let Some(target) = graph.get(into) else {
        return Err(RestorerError::UnknownTarget(into.0).into());
    };
    let empty: Vec<String> = target
        .describe_fields()
        .into_iter()
        .filter(|f| target.get_field(&f.name).map_or(true, |v| v.is_null()))
        .map(|f| f.name)
        .collect();

    for field in empty {
        if let Some(value) = graph.field(from, &field).filter(|v| !v.is_null()) {
            set_or_fail(graph, into, &field, value)?;
        }
    }
    Ok(())
}

fn set_or_fail(graph: &mut ObjectGraph, object: ObjectId, field: &str, value: Value) -> Result<()> {
    graph.set_field(object, field, value).map_err(|err| {
        let class = graph
            .get(object)
            .map(|entity| entity.class_name().to_string())
            .unwrap_or_default();
        RestorerError::Field {
            class,
            field: field.to_string(),
            reason: err.to_string(),
        }
        .into()
    })
}
