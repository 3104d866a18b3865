//! # objgraph Wire
//!
//! XML rendition of a [`Node`](objgraph_core::Node) tree.
//!
//! Every element has a sequence address: the 1-based positions of the
//! elements leading to it from the document root (`/1` is the root element,
//! `/1/2` its second child). A node that was already written is emitted again
//! only as a marker pointing at its first address:
//!
//! ```xml
//! <Company xmlns:xlink="http://www.w3.org/1999/xlink" type="object" meta-type="object" class="app.Company">
//!   <owner type="object" meta-type="object" class="app.User">...</owner>
//!   <auditor xlink:href="#element(/1/1)"/>
//! </Company>
//! ```

pub mod exporter;
pub mod importer;

pub use exporter::Exporter;
pub use importer::Importer;

use objgraph_core::{ExportOptions, Node, Result};

/// Namespace bound to the `xlink` prefix on the root element.
pub const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

pub(crate) const XMLNS_XLINK_ATTR: &str = "xmlns:xlink";
pub(crate) const HREF_ATTR: &str = "xlink:href";
pub(crate) const TYPE_ATTR: &str = "type";
pub(crate) const VALUE_ATTR: &str = "value";
pub(crate) const KEY_ATTR: &str = "key";
pub(crate) const OBJECT_TYPE: &str = "object";

/// `#element(/1/2)` for the address `/1/2`.
pub fn href_for(address: &str) -> String {
    format!("#element({})", address)
}

/// Address inside an `#element(...)` marker.
pub fn address_from_href(href: &str) -> Option<&str> {
    href.trim()
        .strip_prefix("#element(")
        .and_then(|rest| rest.strip_suffix(')'))
}

/// Export with `options`.
pub fn to_xml(node: &Node, options: &ExportOptions) -> Result<Vec<u8>> {
    Exporter::new(options.clone()).export(node)
}

/// Import a document written with the same `meta-type` key as `options`.
pub fn from_xml(bytes: &[u8], options: &ExportOptions) -> Result<Node> {
    Importer::new(options.meta_type_key.as_str()).import(bytes)
}
