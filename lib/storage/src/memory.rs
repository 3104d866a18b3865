use ahash::AHashMap;
use objgraph_core::{DynamicObject, Entity, Merger, MergerError, ObjectGraph, ObjectId, Value};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How one class is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMapping {
    pub class: String,
    /// Fields forming the identity, in key order.
    pub identifier: Vec<String>,
    #[serde(default)]
    pub mandatory: Vec<String>,
    /// Alternate fields used by `find` when the identity is absent.
    #[serde(default)]
    pub lookup: Vec<String>,
    /// Assign the next integer to a single-field identity on merge.
    #[serde(default)]
    pub generated_identity: bool,
}

impl EntityMapping {
    pub fn new(class: impl Into<String>, identifier: &[&str]) -> Self {
        Self {
            class: class.into(),
            identifier: identifier.iter().map(|s| s.to_string()).collect(),
            mandatory: Vec::new(),
            lookup: Vec::new(),
            generated_identity: false,
        }
    }

    #[must_use]
    pub fn with_mandatory(mut self, fields: &[&str]) -> Self {
        self.mandatory = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    #[must_use]
    pub fn with_lookup(mut self, fields: &[&str]) -> Self {
        self.lookup = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    #[must_use]
    pub fn generated(mut self) -> Self {
        self.generated_identity = true;
        self
    }

    /// `|`-joined identifier values, `None` while any of them is null or absent.
    fn identity_key(&self, row: &Row) -> Option<String> {
        if self.identifier.is_empty() {
            return None;
        }
        let parts: Option<Vec<String>> = self
            .identifier
            .iter()
            .map(|field| row_text(row, field))
            .collect();
        parts.map(|p| p.join("|"))
    }
}

/// Stored scalar fields of one object.
pub type Row = Vec<(String, Value)>;

fn row_text(row: &Row, field: &str) -> Option<String> {
    row.iter()
        .find(|(name, _)| name == field)
        .map(|(_, value)| value)
        .filter(|value| !value.is_null())
        .and_then(Value::to_wire_string)
}

fn scalar_row(entity: &dyn Entity) -> Row {
    entity
        .describe_fields()
        .into_iter()
        .filter_map(|field| {
            let value = entity.get_field(&field.name)?;
            value.is_scalar().then_some((field.name, value))
        })
        .collect()
}

#[derive(Debug, Default)]
struct Table {
    rows: AHashMap<String, Row>,
    next_identity: i64,
}

/// In-memory [`Merger`] with staged writes.
///
/// `merge` stages rows that become visible to `find` and `get` only after
/// `flush`. Only scalar fields are stored.
#[derive(Debug, Default)]
pub struct MemoryStore {
    mappings: AHashMap<String, EntityMapping>,
    tables: RwLock<AHashMap<String, Table>>,
    staged: Vec<(String, String, Row)>,
    flushes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_mappings(mappings: impl IntoIterator<Item = EntityMapping>) -> Self {
        let mut store = Self::new();
        for mapping in mappings {
            store.register(mapping);
        }
        store
    }

    #[must_use]
    pub fn with_mapping(mut self, mapping: EntityMapping) -> Self {
        self.register(mapping);
        self
    }

    pub fn register(&mut self, mapping: EntityMapping) {
        self.mappings.insert(mapping.class.clone(), mapping);
    }

    fn mapping(&self, class: &str, operation: &str) -> Result<&EntityMapping, MergerError> {
        self.mappings
            .get(class)
            .ok_or_else(|| MergerError::store(operation, format!("class '{}' is not mapped", class)))
    }

    fn row_of(graph: &ObjectGraph, object: ObjectId, operation: &str) -> Result<(String, Row), MergerError> {
        let entity = graph.get(object).ok_or_else(|| {
            MergerError::store(operation, format!("object {} is not in the graph", object))
        })?;
        Ok((entity.class_name().to_string(), scalar_row(entity)))
    }

    /// Store a row directly, bypassing staging. Returns its identity key.
    pub fn insert(&self, class: &str, row: Row) -> Result<String, MergerError> {
        let mapping = self.mapping(class, "insert")?;
        let key = mapping.identity_key(&row).ok_or_else(|| {
            MergerError::store("insert", format!("row of '{}' has no identity", class))
        })?;
        let mut tables = self.tables.write();
        let table = tables.entry(class.to_string()).or_default();
        if let Some(id) = row_text(&row, &mapping.identifier[0]).and_then(|t| t.parse::<i64>().ok()) {
            table.next_identity = table.next_identity.max(id);
        }
        table.rows.insert(key.clone(), row);
        Ok(key)
    }

    pub fn get(&self, class: &str, key: &str) -> Option<Row> {
        self.tables
            .read()
            .get(class)
            .and_then(|table| table.rows.get(key).cloned())
    }

    pub fn count(&self, class: &str) -> usize {
        self.tables.read().get(class).map_or(0, |table| table.rows.len())
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes
    }
}

impl Merger for MemoryStore {
    fn merge(
        &mut self,
        graph: &mut ObjectGraph,
        object: ObjectId,
    ) -> Result<Option<ObjectId>, MergerError> {
        let (class, mut row) = Self::row_of(graph, object, "merge")?;
        let mapping = self.mapping(&class, "merge")?;

        let key = match mapping.identity_key(&row) {
            Some(key) => key,
            None if mapping.generated_identity && mapping.identifier.len() == 1 => {
                let field = mapping.identifier[0].clone();
                let next = {
                    let mut tables = self.tables.write();
                    let table = tables.entry(class.clone()).or_default();
                    table.next_identity += 1;
                    table.next_identity
                };
                graph
                    .set_field(object, &field, Value::Integer(next))
                    .map_err(|e| MergerError::store("merge", e.to_string()))?;
                row.retain(|(name, _)| *name != field);
                row.push((field, Value::Integer(next)));
                next.to_string()
            }
            None => return Ok(None),
        };

        debug!(class = %class, key = %key, "staged row");
        self.staged.push((class, key, row));
        Ok(Some(object))
    }

    fn find(
        &mut self,
        graph: &mut ObjectGraph,
        object: ObjectId,
    ) -> Result<Option<ObjectId>, MergerError> {
        let (class, row) = Self::row_of(graph, object, "find")?;
        let mapping = self.mapping(&class, "find")?;

        let stored = {
            let tables = self.tables.read();
            let Some(table) = tables.get(&class) else {
                return Ok(None);
            };
            let by_identity = mapping
                .identity_key(&row)
                .and_then(|key| table.rows.get(&key));
            let by_lookup = || {
                let wanted: Option<Vec<(&String, String)>> = mapping
                    .lookup
                    .iter()
                    .map(|field| row_text(&row, field).map(|text| (field, text)))
                    .collect();
                let wanted = wanted.filter(|w| !w.is_empty())?;
                table.rows.values().find(|candidate| {
                    wanted
                        .iter()
                        .all(|(field, text)| row_text(candidate, field).as_deref() == Some(text.as_str()))
                })
            };
            by_identity.or_else(by_lookup).cloned()
        };

        Ok(stored.map(|row| {
            let mut loaded = DynamicObject::new(class);
            for (name, value) in row {
                loaded = loaded.with_field(name, value);
            }
            graph.insert(loaded)
        }))
    }

    fn mandatory_properties(
        &self,
        graph: &ObjectGraph,
        object: ObjectId,
    ) -> Result<Vec<String>, MergerError> {
        let (class, _) = Self::row_of(graph, object, "mandatory_properties")?;
        Ok(self.mapping(&class, "mandatory_properties")?.mandatory.clone())
    }

    fn flush(&mut self) -> Result<(), MergerError> {
        let staged = std::mem::take(&mut self.staged);
        let written = staged.len();
        let mut tables = self.tables.write();
        for (class, key, row) in staged {
            tables.entry(class).or_default().rows.insert(key, row);
        }
        self.flushes += 1;
        debug!(rows = written, "flushed staged rows");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::new()
            .with_mapping(
                EntityMapping::new("app.User", &["id"])
                    .with_mandatory(&["id", "name"])
                    .with_lookup(&["email"])
                    .generated(),
            )
            .with_mapping(EntityMapping::new("app.Tag", &["label"]))
    }

    #[test]
    fn test_merge_is_staged_until_flush() {
        let mut store = store();
        let mut graph = ObjectGraph::new();
        let user = graph.insert(
            DynamicObject::new("app.User")
                .with_field("id", 7i64)
                .with_field("name", "ann"),
        );

        assert_eq!(store.merge(&mut graph, user).unwrap(), Some(user));
        assert_eq!(store.count("app.User"), 0);
        assert_eq!(store.staged_len(), 1);

        store.flush().unwrap();
        assert_eq!(store.count("app.User"), 1);
        assert_eq!(store.flush_count(), 1);
        let row = store.get("app.User", "7").unwrap();
        assert!(row.contains(&("name".to_string(), Value::from("ann"))));
    }

    #[test]
    fn test_generated_identity() {
        let mut store = store();
        store
            .insert("app.User", vec![("id".into(), Value::Integer(4))])
            .unwrap();
        let mut graph = ObjectGraph::new();
        let user = graph.insert(DynamicObject::new("app.User").with_field("name", "bob"));

        store.merge(&mut graph, user).unwrap();
        assert_eq!(graph.field(user, "id"), Some(Value::Integer(5)));
    }

    #[test]
    fn test_missing_identity_without_generation() {
        let mut store = store();
        let mut graph = ObjectGraph::new();
        let tag = graph.insert(DynamicObject::new("app.Tag"));
        assert_eq!(store.merge(&mut graph, tag).unwrap(), None);
    }

    #[test]
    fn test_find_by_identity_then_lookup() {
        let mut store = store();
        store
            .insert(
                "app.User",
                vec![
                    ("id".into(), Value::Integer(1)),
                    ("name".into(), Value::from("ann")),
                    ("email".into(), Value::from("ann@example.com")),
                ],
            )
            .unwrap();

        let mut graph = ObjectGraph::new();
        let by_id = graph.insert(DynamicObject::new("app.User").with_field("id", 1i64));
        let found = store.find(&mut graph, by_id).unwrap().unwrap();
        assert_eq!(graph.field(found, "name"), Some(Value::from("ann")));

        let by_email =
            graph.insert(DynamicObject::new("app.User").with_field("email", "ann@example.com"));
        let found = store.find(&mut graph, by_email).unwrap().unwrap();
        assert_eq!(graph.field(found, "id"), Some(Value::Integer(1)));

        let stranger = graph.insert(DynamicObject::new("app.User").with_field("email", "x@y"));
        assert!(store.find(&mut graph, stranger).unwrap().is_none());
    }

    #[test]
    fn test_unmapped_class_is_a_store_error() {
        let mut store = store();
        let mut graph = ObjectGraph::new();
        let other = graph.insert(DynamicObject::new("app.Other"));
        let err = store.merge(&mut graph, other).unwrap_err();
        assert!(matches!(err, MergerError::Store { ref operation, .. } if operation == "merge"));
        assert!(store.mandatory_properties(&graph, other).is_err());
    }

    #[test]
    fn test_mandatory_properties() {
        let store = store();
        let mut graph = ObjectGraph::new();
        let user = graph.insert(DynamicObject::new("app.User"));
        assert_eq!(store.mandatory_properties(&graph, user).unwrap(), vec!["id", "name"]);
    }
}
