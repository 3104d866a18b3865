use crate::{address_from_href, HREF_ATTR, KEY_ATTR, OBJECT_TYPE, TYPE_ATTR, VALUE_ATTR};
use ahash::AHashMap;
use objgraph_core::node::META_CLASS;
use objgraph_core::{
    short_class_name, CollectionKind, ExportOptions, ImporterError, Key, Node, NodeCollection,
    NodeId, NodeProperty, NodeRef, NodeValue, Result, ScalarType, Value,
};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, trace};

/// Reads XML documents back into node trees.
#[derive(Debug, Clone)]
pub struct Importer {
    meta_type_key: String,
}

impl Default for Importer {
    fn default() -> Self {
        Self::from_options(&ExportOptions::default())
    }
}

impl Importer {
    /// `meta_type_key` must match the exporter's; empty means the document
    /// carries no discriminator and element shapes are inferred.
    pub fn new(meta_type_key: impl Into<String>) -> Self {
        Self {
            meta_type_key: meta_type_key.into(),
        }
    }

    pub fn from_options(options: &ExportOptions) -> Self {
        Self::new(options.meta_type_key.clone())
    }

    pub fn import(&self, bytes: &[u8]) -> Result<Node> {
        let root = parse_document(bytes)?;
        let mut pass = ImportPass {
            meta_type_key: &self.meta_type_key,
            addresses: AHashMap::new(),
            next_id: 1,
        };

        let address = "/1";
        match pass.classify(&root, address)? {
            Shape::Object => {}
            _ => {
                return Err(ImporterError::UndeterminedNodeType {
                    address: address.to_string(),
                }
                .into())
            }
        }
        let node = pass.build_node(&root, address, root.name.clone())?;
        debug!(nodes = pass.addresses.len(), "imported node tree");
        Ok(node)
    }

    pub fn import_str(&self, xml: &str) -> Result<Node> {
        self.import(xml.as_bytes())
    }
}

/// Attribute-and-children view of one XML element.
#[derive(Debug)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> std::result::Result<Self, ImporterError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| ImporterError::Malformed(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| ImporterError::Malformed(e.to_string()))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            children: Vec::new(),
        })
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn attach(
    stack: &mut Vec<Element>,
    root: &mut Option<Element>,
    element: Element,
) -> std::result::Result<(), ImporterError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_some() => {
            return Err(ImporterError::Malformed(
                "document has more than one root element".into(),
            ))
        }
        None => *root = Some(element),
    }
    Ok(())
}

fn parse_document(bytes: &[u8]) -> std::result::Result<Element, ImporterError> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(start)) => stack.push(Element::from_start(&start)?),
            Ok(Event::Empty(start)) => {
                let element = Element::from_start(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| ImporterError::Malformed("unexpected closing tag".into()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ImporterError::Malformed(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(ImporterError::Malformed(format!(
            "element <{}> is never closed",
            open.name
        )));
    }
    root.ok_or_else(|| ImporterError::Malformed("document has no root element".into()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Object,
    Reference,
    Property,
    Collection,
}

struct ImportPass<'i> {
    meta_type_key: &'i str,
    /// Address → (id, name) of every object element seen so far.
    addresses: AHashMap<String, (NodeId, String)>,
    next_id: NodeId,
}

impl ImportPass<'_> {
    fn classify(&self, element: &Element, address: &str) -> std::result::Result<Shape, ImporterError> {
        let undetermined = || ImporterError::UndeterminedNodeType {
            address: address.to_string(),
        };

        if element.attr(HREF_ATTR).is_some() {
            return Ok(Shape::Reference);
        }
        if !self.meta_type_key.is_empty() {
            if let Some(meta_type) = element.attr(self.meta_type_key) {
                return match meta_type {
                    "object" => Ok(Shape::Object),
                    "property" => Ok(Shape::Property),
                    "collection" => Ok(Shape::Collection),
                    _ => Err(undetermined()),
                };
            }
        }

        if element.attr(VALUE_ATTR).is_some() {
            return Ok(Shape::Property);
        }
        let type_tag = element.attr(TYPE_ATTR);
        if element.attr(META_CLASS).is_some() || type_tag == Some(OBJECT_TYPE) {
            return Ok(Shape::Object);
        }
        if type_tag.and_then(CollectionKind::parse).is_some() {
            return Ok(Shape::Collection);
        }
        if !element.children.is_empty()
            && element.children.iter().all(|c| c.attr(KEY_ATTR).is_some())
        {
            return Ok(Shape::Collection);
        }
        Err(undetermined())
    }

    fn is_reserved(&self, attribute: &str) -> bool {
        attribute == TYPE_ATTR
            || attribute == KEY_ATTR
            || attribute == HREF_ATTR
            || attribute.starts_with("xmlns")
            || (!self.meta_type_key.is_empty() && attribute == self.meta_type_key)
    }

    fn build_node(&mut self, element: &Element, address: &str, name: String) -> Result<Node> {
        let id = self.next_id;
        self.next_id += 1;
        self.addresses.insert(address.to_string(), (id, name.clone()));

        let mut node = Node::new(id, name);
        for (key, value) in &element.attributes {
            if !self.is_reserved(key) {
                node.metadata_mut().insert(key.as_str(), value.as_str());
            }
        }
        for (position, child) in element.children.iter().enumerate() {
            let child_address = format!("{}/{}", address, position + 1);
            let value = self.build_value(child, &child_address, false)?;
            node.set_property(child.name.as_str(), value);
        }
        Ok(node)
    }

    fn build_value(&mut self, element: &Element, address: &str, in_collection: bool) -> Result<NodeValue> {
        match self.classify(element, address)? {
            Shape::Reference => self.build_reference(element, address),
            Shape::Object => {
                // Field elements are named after the field, items after the node.
                let name = if in_collection {
                    element.name.clone()
                } else {
                    element
                        .attr(META_CLASS)
                        .map(short_class_name)
                        .unwrap_or(element.name.as_str())
                        .to_string()
                };
                Ok(self.build_node(element, address, name)?.into())
            }
            Shape::Property => Ok(build_property(element, address)?.into()),
            Shape::Collection => Ok(self.build_collection(element, address)?.into()),
        }
    }

    fn build_reference(&self, element: &Element, address: &str) -> Result<NodeValue> {
        let href = element.attr(HREF_ATTR).unwrap_or_default();
        let target = address_from_href(href).unwrap_or(href);
        let (id, name) = self.addresses.get(target).cloned().ok_or_else(|| {
            ImporterError::UnresolvedReference {
                address: address.to_string(),
                target: target.to_string(),
            }
        })?;
        trace!(address, target, id, "resolved back-reference");
        Ok(NodeValue::Reference(NodeRef { id, name }))
    }

    fn build_collection(&mut self, element: &Element, address: &str) -> Result<NodeCollection> {
        let mut items = Vec::with_capacity(element.children.len());
        for (position, child) in element.children.iter().enumerate() {
            let child_address = format!("{}/{}", address, position + 1);
            let key = match child.attr(KEY_ATTR) {
                Some(tag) => Some(Key::parse_tag(tag).ok_or_else(|| {
                    ImporterError::Malformed(format!("invalid key '{}' at {}", tag, child_address))
                })?),
                None => None,
            };
            let value = self.build_value(child, &child_address, true)?;
            items.push((key, value));
        }

        let kind = element
            .attr(TYPE_ATTR)
            .and_then(CollectionKind::parse)
            .unwrap_or_else(|| {
                let positional = items
                    .iter()
                    .all(|(key, _)| !matches!(key, Some(Key::Name(_))));
                if positional {
                    CollectionKind::List
                } else {
                    CollectionKind::Map
                }
            });

        let mut collection = NodeCollection::new(kind);
        for (key, value) in items {
            collection.push(key, value);
        }
        Ok(collection)
    }
}

fn build_property(element: &Element, address: &str) -> std::result::Result<NodeProperty, ImporterError> {
    let text = element.attr(VALUE_ATTR).unwrap_or_default();
    let tag = element.attr(TYPE_ATTR).unwrap_or(ScalarType::String.as_str());
    let invalid = || ImporterError::InvalidScalar {
        address: address.to_string(),
        scalar: tag.to_string(),
        value: text.to_string(),
    };

    let scalar = ScalarType::parse(tag).ok_or_else(invalid)?;
    let value = Value::parse_scalar(scalar, text).ok_or_else(invalid)?;
    NodeProperty::from_value(value).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Exporter;
    use chrono::{TimeZone, Utc};
    use objgraph_core::Error;

    fn prop(value: impl Into<Value>) -> NodeProperty {
        NodeProperty::from_value(value.into()).unwrap()
    }

    fn sample() -> Node {
        let user = Node::new(2, "User")
            .with_class("app.User")
            .with_property("name", prop("ann & bob"))
            .with_property("age", prop(42i64))
            .with_property("joined", prop(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()));
        let mut employees = NodeCollection::new(CollectionKind::List);
        employees.push(Some(Key::Index(0)), user.into());
        let mut labels = NodeCollection::new(CollectionKind::Map);
        labels.push(Some(Key::from("tier")), prop(1.5).into());
        Node::new(1, "Company")
            .with_class("app.Company")
            .with_property("name", prop("rts"))
            .with_property("employees", employees)
            .with_property("labels", labels)
            .with_property(
                "auditor",
                NodeValue::Reference(NodeRef {
                    id: 2,
                    name: "User".into(),
                }),
            )
    }

    fn employees(node: &Node) -> &NodeCollection {
        node.property("employees")
            .and_then(NodeValue::as_collection)
            .unwrap()
    }

    #[test]
    fn test_import_exported_document() {
        let bytes = Exporter::default().export(&sample()).unwrap();
        let node = Importer::default().import(&bytes).unwrap();

        assert_eq!(node.name(), "Company");
        assert_eq!(node.class(), Some("app.Company"));
        assert_eq!(node.metadata().len(), 1);

        let user = employees(&node).items()[0].value.as_node().unwrap();
        assert_eq!(employees(&node).items()[0].key, Some(Key::Index(0)));
        assert_eq!(
            user.property("name").and_then(NodeValue::as_property).map(|p| p.value()),
            Some(&Value::from("ann & bob"))
        );
        assert_eq!(
            user.property("joined").and_then(NodeValue::as_property).map(|p| p.scalar_type()),
            Some(ScalarType::Date)
        );

        let auditor = node.property("auditor").and_then(NodeValue::as_reference).unwrap();
        assert_eq!(auditor.id, user.id());
        assert_eq!(auditor.name, "User");

        let labels = node.property("labels").and_then(NodeValue::as_collection).unwrap();
        assert_eq!(labels.kind(), CollectionKind::Map);
    }

    #[test]
    fn test_ids_follow_document_order() {
        let bytes = Exporter::default().export(&sample()).unwrap();
        let node = Importer::default().import(&bytes).unwrap();
        assert_eq!(node.id(), 1);
        assert_eq!(employees(&node).items()[0].value.object_id(), Some(2));
    }

    #[test]
    fn test_structural_inference_without_meta_type() {
        let options = ExportOptions::default().with_meta_type_key("");
        let bytes = Exporter::new(options.clone()).export(&sample()).unwrap();
        let inferred = Importer::from_options(&options).import(&bytes).unwrap();
        let tagged = Importer::default()
            .import(&Exporter::default().export(&sample()).unwrap())
            .unwrap();
        assert_eq!(inferred, tagged);
    }

    #[test]
    fn test_inference_from_keys_alone() {
        let xml = r#"<Team class="app.Team"><members><a class="app.A" key="i;0"/><b class="app.B" key="i;1"/></members></Team>"#;
        let node = Importer::new("").import_str(xml).unwrap();
        let members = node.property("members").and_then(NodeValue::as_collection).unwrap();
        assert_eq!(members.kind(), CollectionKind::List);
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn test_undetermined_node_type_names_address() {
        let xml = r#"<Team class="app.Team"><name value="x"/><mystery/></Team>"#;
        let err = Importer::new("").import_str(xml).unwrap_err();
        match err {
            Error::Importer(ImporterError::UndeterminedNodeType { address }) => {
                assert_eq!(address, "/1/2")
            }
            other => panic!("unexpected error: {other}"),
        }

        let xml = r#"<Team meta-type="object"><name meta-type="widget"/></Team>"#;
        let err = Importer::default().import_str(xml).unwrap_err();
        assert!(matches!(
            err,
            Error::Importer(ImporterError::UndeterminedNodeType { ref address }) if address == "/1/1"
        ));
    }

    #[test]
    fn test_unresolved_reference() {
        let xml = r##"<Team class="app.Team"><lead xlink:href="#element(/1/9)"/></Team>"##;
        let err = Importer::default().import_str(xml).unwrap_err();
        assert!(matches!(
            err,
            Error::Importer(ImporterError::UnresolvedReference { ref target, .. }) if target == "/1/9"
        ));
    }

    #[test]
    fn test_cyclic_reference_to_ancestor() {
        let xml = r##"<A class="app.A"><child class="app.B"><parent xlink:href="#element(/1)"/></child></A>"##;
        let node = Importer::new("").import_str(xml).unwrap();
        let child = node.property("child").and_then(NodeValue::as_node).unwrap();
        assert_eq!(child.name(), "B");
        let parent = child.property("parent").and_then(NodeValue::as_reference).unwrap();
        assert_eq!(parent.id, node.id());
    }

    #[test]
    fn test_invalid_scalar() {
        let xml = r#"<A class="app.A"><age type="integer" value="old"/></A>"#;
        let err = Importer::default().import_str(xml).unwrap_err();
        assert!(matches!(err, Error::Importer(ImporterError::InvalidScalar { .. })));
    }

    #[test]
    fn test_malformed_documents() {
        for xml in ["", "<A class=\"app.A\">", "<A class=\"app.A\"></B>", "<A/><B/>"] {
            let err = Importer::default().import_str(xml).unwrap_err();
            assert!(
                matches!(err, Error::Importer(ImporterError::Malformed(_))),
                "expected malformed for {:?}, got {:?}",
                xml,
                err
            );
        }
    }
}
