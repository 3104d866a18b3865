//! Structural addresses inside a node graph.
//!
//! A path is built by appending typed segments and never mutated afterwards.
//! Its canonical string writes every segment as `\` + optional index + type
//! letter + name, with literal backslashes doubled:
//!
//! ```text
//! NODE(company) → COLLECTION(employees) → NODE(user, 1) → VALUE(name)
//! \Ncompany\Cemployees\1Nuser\Vname
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentType {
    Node,
    Collection,
    Value,
}

impl SegmentType {
    fn letter(&self) -> char {
        match self {
            SegmentType::Node => 'N',
            SegmentType::Collection => 'C',
            SegmentType::Value => 'V',
        }
    }

    fn from_letter(c: char) -> Option<Self> {
        match c {
            'N' => Some(SegmentType::Node),
            'C' => Some(SegmentType::Collection),
            'V' => Some(SegmentType::Value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Segment {
    pub kind: SegmentType,
    pub name: String,
    /// Position inside the enclosing collection.
    pub index: Option<usize>,
}

impl Segment {
    pub fn new(kind: SegmentType, name: impl Into<String>, index: Option<usize>) -> Self {
        Self {
            kind,
            name: name.into(),
            index,
        }
    }

    pub fn node(name: impl Into<String>) -> Self {
        Self::new(SegmentType::Node, name, None)
    }

    pub fn node_at(name: impl Into<String>, index: usize) -> Self {
        Self::new(SegmentType::Node, name, Some(index))
    }

    pub fn collection(name: impl Into<String>) -> Self {
        Self::new(SegmentType::Collection, name, None)
    }

    pub fn collection_at(name: impl Into<String>, index: usize) -> Self {
        Self::new(SegmentType::Collection, name, Some(index))
    }

    pub fn value(name: impl Into<String>) -> Self {
        Self::new(SegmentType::Value, name, None)
    }

    pub fn value_at(name: impl Into<String>, index: usize) -> Self {
        Self::new(SegmentType::Value, name, Some(index))
    }

    fn encode_into(&self, out: &mut String) {
        out.push('\\');
        if let Some(index) = self.index {
            out.push_str(&index.to_string());
        }
        out.push(self.kind.letter());
        for c in self.name.chars() {
            if c == '\\' {
                out.push('\\');
            }
            out.push(c);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NodePath {
    segments: Vec<Segment>,
    encoded: String,
}

impl NodePath {
    /// The empty path.
    pub fn root() -> Self {
        Self::default()
    }

    /// New path with `segment` appended; `self` is left untouched.
    #[must_use]
    pub fn push(&self, segment: Segment) -> NodePath {
        let mut segments = self.segments.clone();
        let mut encoded = self.encoded.clone();
        segment.encode_into(&mut encoded);
        segments.push(segment);
        NodePath { segments, encoded }
    }

    #[must_use]
    pub fn node(&self, name: &str) -> NodePath {
        self.push(Segment::node(name))
    }

    #[must_use]
    pub fn node_at(&self, name: &str, index: usize) -> NodePath {
        self.push(Segment::node_at(name, index))
    }

    #[must_use]
    pub fn collection(&self, name: &str) -> NodePath {
        self.push(Segment::collection(name))
    }

    #[must_use]
    pub fn value(&self, name: &str) -> NodePath {
        self.push(Segment::value(name))
    }

    #[must_use]
    pub fn value_at(&self, name: &str, index: usize) -> NodePath {
        self.push(Segment::value_at(name, index))
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// True when `self` equals `prefix` or extends it by whole segments.
    pub fn starts_with(&self, prefix: &NodePath) -> bool {
        if prefix.segments.len() > self.segments.len() {
            return false;
        }
        self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    pub fn parse(input: &str) -> Result<NodePath> {
        let invalid = |why: &str| Error::InvalidConfig(format!("invalid node path '{}': {}", input, why));
        let mut path = NodePath::root();
        let mut chars = input.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '\\' {
                return Err(invalid("segment must start with '\\'"));
            }
            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(d);
                chars.next();
            }
            let kind = chars
                .next()
                .and_then(SegmentType::from_letter)
                .ok_or_else(|| invalid("expected segment type N, C or V"))?;
            let index = if digits.is_empty() {
                None
            } else {
                Some(digits.parse().map_err(|_| invalid("index out of range"))?)
            };

            let mut name = String::new();
            while let Some(&next) = chars.peek() {
                if next != '\\' {
                    name.push(next);
                    chars.next();
                    continue;
                }
                let mut lookahead = chars.clone();
                lookahead.next();
                if lookahead.peek() == Some(&'\\') {
                    name.push('\\');
                    chars.next();
                    chars.next();
                } else {
                    break;
                }
            }
            path = path.push(Segment::new(kind, name, index));
        }
        Ok(path)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl FromStr for NodePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        NodePath::parse(s)
    }
}

impl Serialize for NodePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encoded)
    }
}

impl<'de> Deserialize<'de> for NodePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NodePath::parse(&raw).map_err(serde::de::Error::custom)
    }
}
