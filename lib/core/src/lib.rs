//! # objgraph Core
//!
//! Core library for the objgraph serializer.
//!
//! This crate provides the data model and the two graph passes:
//!
//! - [`Node`] - Acyclic, format-neutral image of an object graph
//! - [`Collector`] - Walks live objects into a node tree, emitting back-references for cycles
//! - [`Restorer`] - Rebuilds live objects from a node tree, reconciling with a [`Merger`]
//! - [`InventoryManager`] - Include/exclude policy over [`NodePath`] locations
//!
//! ## Example
//!
//! ```rust
//! use objgraph_core::{
//!     ClassRegistry, Collector, CollectorOptions, DynamicObject, ObjectGraph, Restorer,
//!     RestorerOptions, Value,
//! };
//!
//! let mut graph = ObjectGraph::new();
//! let a = graph.insert(DynamicObject::new("app.A").with_field("name", "a"));
//! let b = graph.insert(DynamicObject::new("app.B").with_field("parent", a));
//! graph.set_field(a, "child", Value::Object(b)).unwrap();
//!
//! // The cycle a -> b -> a becomes a back-reference.
//! let node = Collector::new(CollectorOptions::default()).collect(&graph, a).unwrap();
//!
//! let mut registry = ClassRegistry::new();
//! registry.register_dynamic("app.A").register_dynamic("app.B");
//! let mut restored = ObjectGraph::new();
//! let root = Restorer::new(&registry, RestorerOptions::default())
//!     .restore(&mut restored, &node, None)
//!     .unwrap();
//!
//! let child = restored.field(root, "child").and_then(|v| v.as_object()).unwrap();
//! assert_eq!(restored.field(child, "parent"), Some(Value::Object(root)));
//! ```

pub mod collector;
pub mod config;
pub mod entity;
pub mod error;
pub mod filter;
pub mod inventory;
pub mod merger;
pub mod node;
pub mod path;
pub mod restorer;
pub mod value;

pub use collector::Collector;
pub use config::{Config, CollectorOptions, ExportOptions, RestorerOptions, DEFAULT_META_TYPE_KEY};
pub use entity::{
    short_class_name, ClassRegistry, DynamicObject, Entity, FieldDescriptor, FieldKind,
    ObjectGraph, Restorable,
};
pub use error::{CollectorError, Error, ImporterError, MergerError, RestorerError, Result};
pub use filter::{Expression, Filter, FilterCollection, FilterSpec, Logic, Operator};
pub use inventory::{InventoryConfig, InventoryManager};
pub use merger::{MergeMode, Merger};
pub use node::{
    item_position, CollectionItem, CollectionKind, Metadata, Node, NodeCollection, NodeId,
    NodeProperty, NodeRef, NodeStats, NodeValue,
};
pub use path::{NodePath, Segment, SegmentType};
pub use restorer::{backfill_mandatory, merge_complete, Restorer};
pub use value::{FieldError, FromValue, Key, ObjectId, ScalarType, Value};
