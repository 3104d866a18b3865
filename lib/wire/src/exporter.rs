use crate::{href_for, HREF_ATTR, KEY_ATTR, OBJECT_TYPE, TYPE_ATTR, VALUE_ATTR, XLINK_NS, XMLNS_XLINK_ATTR};
use ahash::AHashMap;
use objgraph_core::node::{ITEM_NAME, NESTED_COLLECTION_NAME};
use objgraph_core::{
    Error, ExportOptions, Key, Node, NodeCollection, NodeId, NodeProperty, NodeValue, Result,
};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use tracing::debug;

/// Writes node trees as XML.
#[derive(Debug, Clone, Default)]
pub struct Exporter {
    options: ExportOptions,
}

impl Exporter {
    pub fn new(options: ExportOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Serialize `node` and everything below it.
    ///
    /// Output is deterministic: attribute and child order follow the tree.
    pub fn export(&self, node: &Node) -> Result<Vec<u8>> {
        let writer = match self.options.indent {
            Some(width) => Writer::new_with_indent(Vec::new(), b' ', width),
            None => Writer::new(Vec::new()),
        };
        let mut pass = ExportPass {
            writer,
            options: &self.options,
            addresses: AHashMap::new(),
        };
        pass.emit(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        pass.write_node(node.name(), node, "/1".to_string(), None, true)?;

        debug!(nodes = pass.addresses.len(), "exported node tree");
        Ok(pass.writer.into_inner())
    }

    pub fn export_to_string(&self, node: &Node) -> Result<String> {
        let bytes = self.export(node)?;
        String::from_utf8(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}

fn item_tag(value: &NodeValue) -> &str {
    match value {
        NodeValue::Node(node) => node.name(),
        NodeValue::Reference(reference) => &reference.name,
        NodeValue::Property(_) => ITEM_NAME,
        NodeValue::Collection(_) => NESTED_COLLECTION_NAME,
    }
}

struct ExportPass<'o> {
    writer: Writer<Vec<u8>>,
    options: &'o ExportOptions,
    /// First address of every node written so far.
    addresses: AHashMap<NodeId, String>,
}

impl ExportPass<'_> {
    fn emit(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    fn push_meta_type(&self, start: &mut BytesStart<'_>, meta_type: &str) {
        if self.options.meta_type_enabled() {
            start.push_attribute((self.options.meta_type_key.as_str(), meta_type));
        }
    }

    fn push_key(start: &mut BytesStart<'_>, key: Option<&Key>) {
        if let Some(key) = key {
            start.push_attribute((KEY_ATTR, key.tag().as_str()));
        }
    }

    /// Write `start` as an empty element, or open it and run `children`.
    fn element<F>(&mut self, tag: &str, start: BytesStart<'_>, has_children: bool, children: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        if !has_children {
            return self.emit(Event::Empty(start));
        }
        self.emit(Event::Start(start))?;
        children(self)?;
        self.emit(Event::End(BytesEnd::new(tag)))
    }

    fn write_node(
        &mut self,
        tag: &str,
        node: &Node,
        address: String,
        key: Option<&Key>,
        root: bool,
    ) -> Result<()> {
        if let Some(first) = self.addresses.get(&node.id()).cloned() {
            return self.write_reference(tag, &first, key);
        }
        self.addresses.insert(node.id(), address.clone());

        let mut start = BytesStart::new(tag);
        if root {
            start.push_attribute((XMLNS_XLINK_ATTR, XLINK_NS));
        }
        start.push_attribute((TYPE_ATTR, OBJECT_TYPE));
        self.push_meta_type(&mut start, "object");
        for (name, value) in node.metadata().iter() {
            start.push_attribute((name, value));
        }
        Self::push_key(&mut start, key);

        self.element(tag, start, !node.properties().is_empty(), |pass| {
            for (position, (name, value)) in node.properties().iter().enumerate() {
                let child = format!("{}/{}", address, position + 1);
                pass.write_value(name, value, child, None)?;
            }
            Ok(())
        })
    }

    fn write_value(
        &mut self,
        tag: &str,
        value: &NodeValue,
        address: String,
        key: Option<&Key>,
    ) -> Result<()> {
        match value {
            NodeValue::Node(node) => self.write_node(tag, node, address, key, false),
            NodeValue::Reference(reference) => {
                let first = self.addresses.get(&reference.id).cloned().ok_or_else(|| {
                    Error::Serialization(format!(
                        "reference at {} to node {} precedes its definition",
                        address, reference.id
                    ))
                })?;
                self.write_reference(tag, &first, key)
            }
            NodeValue::Property(property) => self.write_property(tag, property, key),
            NodeValue::Collection(collection) => {
                self.write_collection(tag, collection, address, key)
            }
        }
    }

    fn write_reference(&mut self, tag: &str, target: &str, key: Option<&Key>) -> Result<()> {
        let mut start = BytesStart::new(tag);
        start.push_attribute((HREF_ATTR, href_for(target).as_str()));
        Self::push_key(&mut start, key);
        self.emit(Event::Empty(start))
    }

    fn write_property(&mut self, tag: &str, property: &NodeProperty, key: Option<&Key>) -> Result<()> {
        let mut start = BytesStart::new(tag);
        start.push_attribute((TYPE_ATTR, property.scalar_type().as_str()));
        start.push_attribute((VALUE_ATTR, property.wire_text().as_str()));
        self.push_meta_type(&mut start, "property");
        Self::push_key(&mut start, key);
        self.emit(Event::Empty(start))
    }

    fn write_collection(
        &mut self,
        tag: &str,
        collection: &NodeCollection,
        address: String,
        key: Option<&Key>,
    ) -> Result<()> {
        let mut start = BytesStart::new(tag);
        start.push_attribute((TYPE_ATTR, collection.kind().as_str()));
        self.push_meta_type(&mut start, "collection");
        Self::push_key(&mut start, key);

        self.element(tag, start, !collection.is_empty(), |pass| {
            for (position, item) in collection.items().iter().enumerate() {
                let child = format!("{}/{}", address, position + 1);
                pass.write_value(item_tag(&item.value), &item.value, child, item.key.as_ref())?;
            }
            Ok(())
        })
    }
}
