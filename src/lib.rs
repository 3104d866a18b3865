//! # objgraph
//!
//! Cycle-safe backup and restore of arbitrary object graphs.
//!
//! objgraph walks a graph of live objects into an acyclic node tree, writes it
//! as XML in which shared and cyclic references become `xlink:href` markers,
//! and rebuilds the graph later, optionally reconciling every restored object
//! with a persistence store.
//!
//! ```text
//! ObjectGraph -> Collector -> Node -> Exporter -> XML
//! XML -> Importer -> Node -> Restorer (+ Merger) -> ObjectGraph
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use objgraph::prelude::*;
//!
//! let mut graph = ObjectGraph::new();
//! let user = graph.insert(DynamicObject::new("app.User").with_field("name", "ann"));
//! let company = graph.insert(
//!     DynamicObject::new("app.Company")
//!         .with_field("name", "rts")
//!         .with_field("owner", user)
//!         .with_field("employees", vec![user]),
//! );
//!
//! let node = Collector::new(CollectorOptions::default()).collect(&graph, company).unwrap();
//! let xml = Exporter::new(ExportOptions::default()).export(&node).unwrap();
//!
//! let imported = Importer::default().import(&xml).unwrap();
//! let mut registry = ClassRegistry::new();
//! registry.register_dynamic("app.User").register_dynamic("app.Company");
//!
//! let mut restored = ObjectGraph::new();
//! let root = Restorer::new(&registry, RestorerOptions::default())
//!     .restore(&mut restored, &imported, None)
//!     .unwrap();
//! let owner = restored.field(root, "owner").unwrap();
//! assert_eq!(restored.field(root, "employees"), Some(Value::List(vec![owner])));
//! ```
//!
//! ## Crate Structure
//!
//! - `objgraph-core` - Node model, collector, restorer, inventory filters
//! - `objgraph-wire` - XML exporter and importer
//! - `objgraph-storage` - In-memory reference merger and backup archive

// Re-export core types
pub use objgraph_core::{
    ClassRegistry, Collector, CollectorOptions, Config, DynamicObject, Entity, Error,
    ExportOptions, Expression, FieldDescriptor, FieldKind, FilterCollection, InventoryManager,
    Key, MergeMode, Merger, Node, NodePath, ObjectGraph, ObjectId, Operator, Restorable,
    Restorer, RestorerOptions, Result, ScalarType, Value,
};

// Re-export wire format
pub use objgraph_wire::{Exporter, Importer};

// Re-export storage
pub use objgraph_storage::{BackupArchive, EntityMapping, MemoryStore};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        BackupArchive, ClassRegistry, Collector, CollectorOptions, Config, DynamicObject,
        EntityMapping, Entity, Error, ExportOptions, Exporter, Expression, FieldDescriptor,
        FieldKind, FilterCollection, Importer, InventoryManager, Key, MemoryStore, MergeMode,
        Merger, Node, NodePath, ObjectGraph, ObjectId, Operator, Restorable, Restorer,
        RestorerOptions, Result, ScalarType, Value,
    };
}
