//! Immutable XML documents
//!
//! A [`Document`] wraps one parsed XML tree together with the
//! [`NamespaceContext`] in effect for queries against it. It is a value:
//! cheap to clone, never mutated. Operations that "change" the context
//! (`register_ns`, `merge`) return a new `Document` sharing the same
//! canonical text.
//!
//! The canonical form is produced once at construction: attributes and
//! namespace declarations are sorted, comments and processing instructions
//! are dropped, text content is preserved verbatim and no indentation is
//! added. Parsing a rendered document and re-rendering it is therefore
//! byte-identical.

use crate::error::{Error, Result};
use crate::namespaces::{NamespaceBindings, NamespaceContext};
use crate::xpath::{self, Value};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

/// Immutable XML document with an active namespace context.
#[derive(Debug, Clone)]
pub struct Document {
    /// Canonical serialization of the tree
    xml: Arc<str>,
    /// Namespace context used by `xpath`/`nodes`
    context: NamespaceContext,
}

impl Document {
    /// Parse a document from text.
    ///
    /// The document starts with the default conventional context (see
    /// [`NamespaceContext::new`]). Malformed input fails with
    /// [`Error::Malformed`] carrying the parser diagnostic and position.
    pub fn from_string(text: &str) -> Result<Self> {
        let tree = parse_tree(text)?;
        let xml = serialize_document(&tree)?;
        Ok(Self {
            xml: xml.into(),
            context: NamespaceContext::new(),
        })
    }

    /// Parse a document from raw bytes (UTF-8).
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|e| Error::Malformed(format!("input is not valid UTF-8: {e}")))?;
        Self::from_string(text)
    }

    /// Read and parse a document from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_bytes(&data)
    }

    /// Read and parse a document from a reader. The reader is consumed.
    pub fn from_reader(mut reader: impl Read) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(&data)
    }

    /// Evaluate an XPath expression and return scalar results.
    ///
    /// Only text and attribute results are retrievable here; an expression
    /// that selects elements is an error pointing at [`Document::nodes`].
    /// A well-formed expression matching nothing returns an empty list.
    pub fn xpath(&self, expr: &str) -> Result<Vec<String>> {
        let tree = self.tree()?;
        let values = xpath::evaluate(&tree, expr, &self.context)?;
        let mut items = Vec::with_capacity(values.len());
        for value in values {
            match value {
                Value::Scalar(s) => items.push(s),
                Value::Element(_) => {
                    return Err(Error::InvalidExpression {
                        expression: expr.to_string(),
                        message: "only text() and attribute results are retrievable with \
                                  xpath(); use nodes() for elements"
                            .to_string(),
                    })
                }
            }
        }
        Ok(items)
    }

    /// Evaluate an XPath expression and return matched elements as
    /// sub-documents.
    ///
    /// Each sub-document carries this document's context and materializes
    /// the namespace declarations in scope on its root element, so it
    /// renders and queries standalone.
    pub fn nodes(&self, expr: &str) -> Result<Vec<Document>> {
        let tree = self.tree()?;
        let values = xpath::evaluate(&tree, expr, &self.context)?;
        let mut items = Vec::with_capacity(values.len());
        for value in values {
            match value {
                Value::Element(node) => {
                    let xml = serialize_subtree(&node)?;
                    items.push(Document {
                        xml: xml.into(),
                        context: self.context.clone(),
                    });
                }
                Value::Scalar(_) => {
                    return Err(Error::InvalidExpression {
                        expression: expr.to_string(),
                        message: "expression selects scalar values; use xpath() for text \
                                  and attributes"
                            .to_string(),
                    })
                }
            }
        }
        Ok(items)
    }

    /// Return a new document with one more namespace binding in its
    /// context.
    pub fn register_ns(&self, prefix: &str, uri: impl Into<String>) -> Result<Self> {
        Ok(Self {
            xml: Arc::clone(&self.xml),
            context: self.context.register(prefix, uri)?,
        })
    }

    /// Return a new document whose context is this context merged with
    /// `other`'s bindings.
    pub fn merge<P: NamespaceBindings + ?Sized>(&self, other: &P) -> Self {
        Self {
            xml: Arc::clone(&self.xml),
            context: self.context.merge(other),
        }
    }

    /// The namespace context in effect for queries.
    pub fn context(&self) -> &NamespaceContext {
        &self.context
    }

    /// The canonical textual serialization.
    pub fn render(&self) -> &str {
        &self.xml
    }

    /// Re-parse the canonical text. The text is our own render, so failure
    /// here would be a serializer defect; it is still propagated.
    fn tree(&self) -> Result<roxmltree::Document<'_>> {
        parse_tree(&self.xml)
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.xml)
    }
}

impl PartialEq for Document {
    /// Documents are equal when their canonical serializations are equal;
    /// the query context does not participate.
    fn eq(&self, other: &Self) -> bool {
        self.xml == other.xml
    }
}

impl Eq for Document {}

impl NamespaceBindings for Document {
    /// The namespace declarations in scope on the root element, in
    /// document order. Lets one document's declarations be merged into
    /// another document's query context.
    fn namespace_bindings(&self) -> Vec<(String, String)> {
        match parse_tree(&self.xml) {
            Ok(tree) => tree
                .root_element()
                .namespaces()
                .filter(|ns| ns.name() != Some("xml") && ns.name() != Some("xmlns"))
                .map(|ns| {
                    (
                        ns.name().unwrap_or_default().to_string(),
                        ns.uri().to_string(),
                    )
                })
                .collect(),
            // The stored text is our own canonical render; it re-parses.
            Err(_) => Vec::new(),
        }
    }
}

fn parse_tree(text: &str) -> Result<roxmltree::Document<'_>> {
    roxmltree::Document::parse(text).map_err(|e| {
        let pos = e.pos();
        Error::Malformed(format!("{} at {}:{}", e, pos.row, pos.col))
    })
}

/// Serialize a whole document (root element and below) canonically.
pub(crate) fn serialize_document(tree: &roxmltree::Document<'_>) -> Result<String> {
    serialize_subtree(&tree.root_element())
}

/// Serialize an element subtree canonically, declaring every namespace in
/// scope on the subtree root so the output stands alone.
pub(crate) fn serialize_subtree(root: &roxmltree::Node<'_, '_>) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    write_element(&mut writer, root, true)
        .map_err(|e| Error::Malformed(format!("serialization failed: {e}")))?;
    let bytes = writer.into_inner();
    String::from_utf8(bytes).map_err(|e| Error::Malformed(format!("non-UTF-8 output: {e}")))
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    node: &roxmltree::Node<'_, '_>,
    is_root: bool,
) -> quick_xml::Result<()> {
    let name = qualified_name(node);
    let mut start = BytesStart::new(name.clone());

    // Namespace declarations: everything in scope for the subtree root,
    // only the local declarations below it. Sorted by prefix.
    let mut declarations: Vec<(String, String)> = node
        .namespaces()
        .filter(|ns| ns.name() != Some("xml") && ns.name() != Some("xmlns"))
        .filter(|ns| {
            is_root
                || node
                    .parent()
                    .map(|p| {
                        !p.namespaces()
                            .any(|pn| pn.name() == ns.name() && pn.uri() == ns.uri())
                    })
                    .unwrap_or(true)
        })
        .map(|ns| {
            let attr = match ns.name() {
                Some(prefix) => format!("xmlns:{prefix}"),
                None => "xmlns".to_string(),
            };
            (attr, ns.uri().to_string())
        })
        .collect();
    declarations.sort();
    for (attr, uri) in &declarations {
        start.push_attribute((attr.as_str(), uri.as_str()));
    }

    // Attributes sorted by qualified name for a deterministic render.
    let mut attributes: Vec<(String, String)> = node
        .attributes()
        .map(|a| {
            let attr_name = match a.namespace().and_then(|uri| node.lookup_prefix(uri)) {
                Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, a.name()),
                _ => a.name().to_string(),
            };
            (attr_name, a.value().to_string())
        })
        .collect();
    attributes.sort();
    for (attr_name, value) in &attributes {
        start.push_attribute((attr_name.as_str(), value.as_str()));
    }

    let children: Vec<roxmltree::Node<'_, '_>> = node
        .children()
        .filter(|c| c.is_element() || c.is_text())
        .collect();
    if children.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    for child in children {
        if child.is_element() {
            write_element(writer, &child, false)?;
        } else if let Some(text) = child.text() {
            writer.write_event(Event::Text(BytesText::new(text)))?;
        }
    }
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn qualified_name(node: &roxmltree::Node<'_, '_>) -> String {
    let tag = node.tag_name();
    match tag.namespace().and_then(|uri| node.lookup_prefix(uri)) {
        Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, tag.name()),
        _ => tag.name().to_string(),
    }
}
