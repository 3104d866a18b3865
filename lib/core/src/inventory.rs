//! Include/exclude policy evaluated while collecting and restoring.

use crate::error::Result;
use crate::filter::{Filter, FilterCollection, FilterSpec};
use crate::path::{NodePath, Segment};
use crate::value::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct InventoryManager {
    include: FilterCollection,
    exclude: FilterCollection,
}

impl InventoryManager {
    /// Manager with no filters: everything is allowed.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filters(include: FilterCollection, exclude: FilterCollection) -> Self {
        Self { include, exclude }
    }

    /// Add an include filter; include filters are OR-ed at the top level.
    #[must_use]
    pub fn include<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.include.push(Box::new(filter));
        self
    }

    /// Add an exclude filter; exclude filters are OR-ed at the top level.
    #[must_use]
    pub fn exclude<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.exclude.push(Box::new(filter));
        self
    }

    pub fn from_config(config: &InventoryConfig) -> Result<Self> {
        let mut manager = Self::new();
        for spec in &config.include {
            manager.include.push(spec.build()?);
        }
        for spec in &config.exclude {
            manager.exclude.push(spec.build()?);
        }
        Ok(manager)
    }

    pub fn is_unrestricted(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    pub fn is_allowed(&self, path: &NodePath, value: Option<&Value>) -> bool {
        if !self.include.is_empty() && !self.include.matches(path, value) {
            return false;
        }
        if !self.exclude.is_empty() && self.exclude.matches(path, value) {
            return false;
        }
        true
    }

    /// Append `segment` to `parent` and report whether the result is denied.
    pub fn is_blocked(&self, parent: &NodePath, segment: Segment, value: Option<&Value>) -> bool {
        !self.is_allowed(&parent.push(segment), value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventoryConfig {
    #[serde(default)]
    pub include: Vec<FilterSpec>,
    #[serde(default)]
    pub exclude: Vec<FilterSpec>,
}

impl InventoryConfig {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }
}
