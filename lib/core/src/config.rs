use crate::error::{Error, Result};
use crate::inventory::InventoryConfig;
use crate::merger::MergeMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default name of the wire attribute carrying the node discriminator.
pub const DEFAULT_META_TYPE_KEY: &str = "meta-type";

/// Attribute names the wire format already uses; namespace declarations
/// (`xmlns*`) are reserved as well.
const RESERVED_ATTRIBUTES: [&str; 5] = ["type", "value", "key", "class", "xlink:href"];

/// Options for one collection pass.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorOptions {
    /// 0 = unlimited, 1 = scalar properties only, n = bounded depth.
    pub descent_level: usize,
    /// Field names never collected.
    pub ignore: Vec<String>,
    /// When non-empty, only these field names are collected.
    pub only_include: Vec<String>,
    /// Objects held by these fields are collected with scalar properties only.
    pub do_not_descend: Vec<String>,
}

impl CollectorOptions {
    #[must_use]
    pub fn with_descent_level(mut self, level: usize) -> Self {
        self.descent_level = level;
        self
    }

    #[must_use]
    pub fn ignore(mut self, field: impl Into<String>) -> Self {
        self.ignore.push(field.into());
        self
    }

    #[must_use]
    pub fn only_include(mut self, field: impl Into<String>) -> Self {
        self.only_include.push(field.into());
        self
    }

    #[must_use]
    pub fn do_not_descend(mut self, field: impl Into<String>) -> Self {
        self.do_not_descend.push(field.into());
        self
    }

    /// Name-based field policy.
    pub fn admits_field(&self, name: &str) -> bool {
        if self.ignore.iter().any(|f| f == name) {
            return false;
        }
        self.only_include.is_empty() || self.only_include.iter().any(|f| f == name)
    }

    pub fn descends_into(&self, name: &str) -> bool {
        !self.do_not_descend.iter().any(|f| f == name)
    }

    /// Whether content living at `level` (root = 1) is still collected.
    pub fn within_depth(&self, level: usize) -> bool {
        self.descent_level == 0 || level <= self.descent_level
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Attribute name of the node discriminator; empty disables it.
    pub meta_type_key: String,
    /// Indentation width for pretty output; `None` writes a single line.
    pub indent: Option<usize>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            meta_type_key: DEFAULT_META_TYPE_KEY.to_string(),
            indent: None,
        }
    }
}

impl ExportOptions {
    #[must_use]
    pub fn with_meta_type_key(mut self, key: impl Into<String>) -> Self {
        self.meta_type_key = key.into();
        self
    }

    #[must_use]
    pub fn with_indent(mut self, indent: usize) -> Self {
        self.indent = Some(indent);
        self
    }

    pub fn meta_type_enabled(&self) -> bool {
        !self.meta_type_key.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RestorerOptions {
    /// Pass-wide merge mode; a node's `merge` metadata overrides it.
    pub merge_mode: MergeMode,
    /// Skip node properties the target entity rejects as unknown.
    pub ignore_unknown_fields: bool,
}

impl RestorerOptions {
    #[must_use]
    pub fn with_merge_mode(mut self, mode: MergeMode) -> Self {
        self.merge_mode = mode;
        self
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub collector: CollectorOptions,
    pub export: ExportOptions,
    pub restorer: RestorerOptions,
    pub inventory: InventoryConfig,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        let key = &self.export.meta_type_key;
        if key.chars().any(|c| c.is_whitespace() || c == '"' || c == '<' || c == '>') {
            return Err(Error::InvalidConfig(format!(
                "meta_type_key '{}' is not a valid attribute name",
                key
            )));
        }
        if RESERVED_ATTRIBUTES.contains(&key.as_str()) || key.starts_with("xmlns") {
            return Err(Error::InvalidConfig(format!(
                "meta_type_key '{}' collides with a reserved attribute",
                key
            )));
        }
        Ok(())
    }
}
