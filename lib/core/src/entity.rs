//! Field-description capability, object arena and class registry.

use crate::value::{FieldError, ObjectId, ScalarType, Value};
use ahash::AHashMap;
use std::any::Any;
use std::fmt;

/// Object-safe access to `Any`, so entities can be downcast from the arena.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Declared type of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Any,
    Scalar(ScalarType),
    Object,
    Collection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Any)
    }

    pub fn scalar(name: impl Into<String>, scalar: ScalarType) -> Self {
        Self::new(name, FieldKind::Scalar(scalar))
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Object)
    }

    pub fn collection(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Collection)
    }
}

/// A serializable object.
///
/// Implementors list their fields in declaration order and expose read/write
/// access by name regardless of Rust visibility. Object-valued fields hold
/// [`ObjectId`] handles into the same [`ObjectGraph`].
pub trait Entity: AsAny + fmt::Debug {
    /// Fully qualified class name, e.g. `app.model.User`.
    fn class_name(&self) -> &str;

    fn describe_fields(&self) -> Vec<FieldDescriptor>;

    /// Current value of a declared field, `None` if the name is not declared.
    fn get_field(&self, name: &str) -> Option<Value>;

    fn set_field(&mut self, name: &str, value: Value) -> Result<(), FieldError>;

    fn field_kind(&self, name: &str) -> Option<FieldKind> {
        self.describe_fields()
            .into_iter()
            .find(|f| f.name == name)
            .map(|f| f.kind)
    }
}

/// Entities that can be created without any constructor arguments.
pub trait Restorable: Entity + Sized {
    const CLASS: &'static str;

    /// Zero-value instance that the restorer then fills field by field.
    fn default_instance() -> Self;
}

/// Short display name of a class: the part after the last `.`, `\` or `::`.
pub fn short_class_name(class: &str) -> &str {
    class
        .rsplit(|c| c == '.' || c == '\\' || c == ':')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(class)
}

/// Arena owning every live object of one graph.
#[derive(Debug, Default)]
pub struct ObjectGraph {
    objects: Vec<Box<dyn Entity>>,
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            objects: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn insert<E: Entity>(&mut self, entity: E) -> ObjectId {
        self.insert_boxed(Box::new(entity))
    }

    pub fn insert_boxed(&mut self, entity: Box<dyn Entity>) -> ObjectId {
        let id = ObjectId(self.objects.len());
        self.objects.push(entity);
        id
    }

    #[inline]
    pub fn get(&self, id: ObjectId) -> Option<&dyn Entity> {
        self.objects.get(id.0).map(|b| &**b)
    }

    #[inline]
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut (dyn Entity + 'static)> {
        self.objects.get_mut(id.0).map(|b| &mut **b)
    }

    pub fn downcast_ref<T: Entity>(&self, id: ObjectId) -> Option<&T> {
        self.get(id).and_then(|e| e.as_any().downcast_ref::<T>())
    }

    pub fn downcast_mut<T: Entity>(&mut self, id: ObjectId) -> Option<&mut T> {
        self.get_mut(id).and_then(|e| e.as_any_mut().downcast_mut::<T>())
    }

    #[inline]
    pub fn contains(&self, id: ObjectId) -> bool {
        id.0 < self.objects.len()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        (0..self.objects.len()).map(ObjectId)
    }

    pub fn field(&self, id: ObjectId, name: &str) -> Option<Value> {
        self.get(id).and_then(|e| e.get_field(name))
    }

    pub fn set_field(&mut self, id: ObjectId, name: &str, value: Value) -> Result<(), FieldError> {
        match self.get_mut(id) {
            Some(entity) => entity.set_field(name, value),
            None => Err(FieldError::Unknown(name.to_string())),
        }
    }
}

type Factory = Box<dyn Fn() -> Box<dyn Entity>>;

/// Maps class names to zero-value factories.
#[derive(Default)]
pub struct ClassRegistry {
    factories: AHashMap<String, Factory>,
}

impl fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut classes: Vec<_> = self.factories.keys().collect();
        classes.sort();
        f.debug_struct("ClassRegistry").field("classes", &classes).finish()
    }
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Restorable>(&mut self) -> &mut Self {
        self.register_with(T::CLASS, || Box::new(T::default_instance()) as Box<dyn Entity>)
    }

    pub fn register_with<F>(&mut self, class: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Entity> + 'static,
    {
        self.factories.insert(class.into(), Box::new(factory));
        self
    }

    /// Restore the class as a schemaless [`DynamicObject`].
    pub fn register_dynamic(&mut self, class: impl Into<String>) -> &mut Self {
        let class = class.into();
        let name = class.clone();
        self.register_with(class, move || {
            Box::new(DynamicObject::new(name.clone())) as Box<dyn Entity>
        })
    }

    pub fn instantiate(&self, class: &str) -> Option<Box<dyn Entity>> {
        self.factories.get(class).map(|factory| factory())
    }

    pub fn contains(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// Schemaless entity: a class name plus ordered fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DynamicObject {
    class: String,
    fields: Vec<(String, Value)>,
}

impl DynamicObject {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.put(name.into(), value.into());
        self
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    fn put(&mut self, name: String, value: Value) {
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }
}

impl Entity for DynamicObject {
    fn class_name(&self) -> &str {
        &self.class
    }

    fn describe_fields(&self) -> Vec<FieldDescriptor> {
        self.fields
            .iter()
            .map(|(name, _)| FieldDescriptor::any(name.clone()))
            .collect()
    }

    fn get_field(&self, name: &str) -> Option<Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }

    fn set_field(&mut self, name: &str, value: Value) -> Result<(), FieldError> {
        self.put(name.to_string(), value);
        Ok(())
    }

    fn field_kind(&self, _name: &str) -> Option<FieldKind> {
        Some(FieldKind::Any)
    }
}
