use crate::entity::ObjectGraph;
use crate::error::MergerError;
use crate::value::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// External persistence store consulted while restoring.
///
/// Every call receives the live graph so the store can read the object's
/// fields and load stored counterparts into the arena.
pub trait Merger {
    /// Persist `object`; `Ok(None)` means it carries no identity.
    fn merge(&mut self, graph: &mut ObjectGraph, object: ObjectId)
        -> Result<Option<ObjectId>, MergerError>;

    /// Load the stored counterpart of `object` into the graph, if any.
    fn find(&mut self, graph: &mut ObjectGraph, object: ObjectId)
        -> Result<Option<ObjectId>, MergerError>;

    fn mandatory_properties(&self, graph: &ObjectGraph, object: ObjectId)
        -> Result<Vec<String>, MergerError>;

    fn flush(&mut self) -> Result<(), MergerError>;
}

/// How a restored node reconciles with the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Always a new object, the store is never consulted.
    #[default]
    Insert,
    /// Node data is complete: merge directly.
    AssumeComplete,
    /// Node data may lack mandatory fields: backfill from the store first.
    AssumeIncomplete,
}

impl MergeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMode::Insert => "insert",
            MergeMode::AssumeComplete => "assume_complete",
            MergeMode::AssumeIncomplete => "assume_incomplete",
        }
    }

    /// Parse a `merge` metadata directive.
    pub fn parse(directive: &str) -> Option<Self> {
        match directive.trim().to_ascii_lowercase().as_str() {
            "insert" => Some(MergeMode::Insert),
            "assume_complete" | "complete" => Some(MergeMode::AssumeComplete),
            "assume_incomplete" | "incomplete" => Some(MergeMode::AssumeIncomplete),
            _ => None,
        }
    }
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
