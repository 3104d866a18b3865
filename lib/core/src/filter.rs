// Path-keyed filter expressions and AND/OR collections
use crate::error::{Error, Result};
use crate::path::NodePath;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

pub trait Filter: fmt::Debug {
    /// Whether this filter matches the location `path` holding `value`.
    fn matches(&self, path: &NodePath, value: Option<&Value>) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    #[default]
    Equal,
    NotEqual,
    Like,
    StrStartWith,
    StrEndWith,
    NumEqual,
    NumNotEqual,
    NumGreater,
    NumGreaterEqual,
    NumLess,
    NumLessEqual,
}

impl Operator {
    /// Compare the value found in the graph against the expression operand.
    pub fn compare(&self, actual: &Value, expected: &Value) -> bool {
        match self {
            Operator::Equal => loosely_equal(actual, expected),
            Operator::NotEqual => !loosely_equal(actual, expected),
            Operator::Like => match (actual.to_wire_string(), expected.to_wire_string()) {
                (Some(text), Some(pattern)) => like(&text, &pattern),
                _ => false,
            },
            Operator::StrStartWith => match (actual.to_wire_string(), expected.to_wire_string()) {
                (Some(text), Some(prefix)) => text.starts_with(&prefix),
                _ => false,
            },
            Operator::StrEndWith => match (actual.to_wire_string(), expected.to_wire_string()) {
                (Some(text), Some(suffix)) => text.ends_with(&suffix),
                _ => false,
            },
            numeric => match (actual.as_f64(), expected.as_f64()) {
                (Some(a), Some(b)) => match numeric {
                    Operator::NumEqual => a == b,
                    Operator::NumNotEqual => a != b,
                    Operator::NumGreater => a > b,
                    Operator::NumGreaterEqual => a >= b,
                    Operator::NumLess => a < b,
                    Operator::NumLessEqual => a <= b,
                    _ => false,
                },
                _ => false,
            },
        }
    }
}

fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (actual.to_wire_string(), expected.to_wire_string()) {
        (Some(a), Some(b)) => !actual.is_null() && !expected.is_null() && a == b,
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LikeToken {
    AnyRun,
    AnyChar,
    Literal(char),
}

fn like_tokens(pattern: &str) -> Vec<LikeToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => LikeToken::AnyRun,
            '_' => LikeToken::AnyChar,
            // A trailing backslash stands for itself.
            '\\' => LikeToken::Literal(chars.next().unwrap_or('\\')),
            c => LikeToken::Literal(c),
        });
    }
    tokens
}

/// SQL-style LIKE: `%` matches any run, `_` one character, `\` escapes.
///
/// Greedy scan that only ever returns to the most recent `%`, which keeps the
/// cost at `text * pattern` however many wildcards the pattern holds.
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let tokens = like_tokens(pattern);

    let (mut t, mut p) = (0, 0);
    let mut resume: Option<(usize, usize)> = None;
    while t < text.len() {
        match tokens.get(p) {
            Some(LikeToken::AnyRun) => {
                resume = Some((p + 1, t));
                p += 1;
            }
            Some(LikeToken::AnyChar) => {
                t += 1;
                p += 1;
            }
            Some(LikeToken::Literal(c)) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match resume {
                Some((after_run, start)) => {
                    resume = Some((after_run, start + 1));
                    p = after_run;
                    t = start + 1;
                }
                None => return false,
            },
        }
    }
    tokens[p.min(tokens.len())..]
        .iter()
        .all(|token| *token == LikeToken::AnyRun)
}

/// Leaf filter: a path pattern plus an optional operand.
///
/// The expression applies to every location at or below `field`. Without an
/// operand it matches by path alone; with one, the operator is applied to the
/// value found at the location.
///
/// Object and collection locations hold no value, so an expression with an
/// operand never matches them. It filters the scalar properties beneath and
/// leaves the enclosing node in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    field: NodePath,
    operator: Operator,
    value: Option<Value>,
}

impl Expression {
    pub fn new(field: NodePath, operator: Operator, value: Option<Value>) -> Self {
        Self {
            field,
            operator,
            value,
        }
    }

    pub fn path(field: NodePath) -> Self {
        Self::new(field, Operator::Equal, None)
    }

    pub fn compare(field: NodePath, operator: Operator, value: impl Into<Value>) -> Self {
        Self::new(field, operator, Some(value.into()))
    }

    pub fn field(&self) -> &NodePath {
        &self.field
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }
}

impl Filter for Expression {
    fn matches(&self, path: &NodePath, value: Option<&Value>) -> bool {
        if !path.starts_with(&self.field) {
            return false;
        }
        match (&self.value, value) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(expected), Some(actual)) => self.operator.compare(actual, expected),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    And,
    Or,
}

/// Boolean combination of child filters; evaluation short-circuits.
#[derive(Debug)]
pub struct FilterCollection {
    logic: Logic,
    filters: Vec<Box<dyn Filter>>,
}

impl Default for FilterCollection {
    fn default() -> Self {
        Self::or()
    }
}

impl FilterCollection {
    pub fn new(logic: Logic) -> Self {
        Self {
            logic,
            filters: Vec::new(),
        }
    }

    pub fn and() -> Self {
        Self::new(Logic::And)
    }

    pub fn or() -> Self {
        Self::new(Logic::Or)
    }

    #[must_use]
    pub fn with<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.push(Box::new(filter));
        self
    }

    pub fn push(&mut self, filter: Box<dyn Filter>) {
        self.filters.push(filter);
    }

    pub fn logic(&self) -> Logic {
        self.logic
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl Filter for FilterCollection {
    fn matches(&self, path: &NodePath, value: Option<&Value>) -> bool {
        match self.logic {
            Logic::And => self.filters.iter().all(|f| f.matches(path, value)),
            Logic::Or => self.filters.iter().any(|f| f.matches(path, value)),
        }
    }
}

/// Declarative filter tree as read from configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FilterSpec {
    And {
        filters: Vec<FilterSpec>,
    },
    Or {
        filters: Vec<FilterSpec>,
    },
    Expression {
        field: NodePath,
        #[serde(default)]
        operator: Operator,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<serde_json::Value>,
    },
}

impl FilterSpec {
    pub fn build(&self) -> Result<Box<dyn Filter>> {
        Ok(match self {
            FilterSpec::And { filters } => Box::new(Self::build_collection(Logic::And, filters)?),
            FilterSpec::Or { filters } => Box::new(Self::build_collection(Logic::Or, filters)?),
            FilterSpec::Expression {
                field,
                operator,
                value,
            } => {
                let operand = value.as_ref().map(json_to_value).transpose()?;
                Box::new(Expression::new(field.clone(), *operator, operand))
            }
        })
    }

    fn build_collection(logic: Logic, specs: &[FilterSpec]) -> Result<FilterCollection> {
        let mut collection = FilterCollection::new(logic);
        for spec in specs {
            collection.push(spec.build()?);
        }
        Ok(collection)
    }
}

fn json_to_value(json: &serde_json::Value) -> Result<Value> {
    match json {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Value::Integer(i)),
            None => n
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| Error::InvalidConfig(format!("unsupported number {}", n))),
        },
        serde_json::Value::String(s) => Ok(Value::String(s.clone())),
        other => Err(Error::InvalidConfig(format!(
            "filter operand must be a scalar, found {}",
            other
        ))),
    }
}
