//! Fail-fast schema gating
//!
//! A [`StrictDocument`] is a [`Document`] that has been proven valid
//! against a schema at construction time. Construction is the only gate:
//! once a value exists, every read goes straight to the wrapped document
//! and validation never runs again. Holding a `StrictDocument` is the
//! type-level statement that the content conforms.

use crate::documents::Document;
use crate::error::{Error, Result, Violations};
use crate::namespaces::{NamespaceBindings, NamespaceContext};
use crate::schemas::Schema;
use std::fmt;

/// A document validated against a schema, exactly once, at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrictDocument {
    origin: Document,
}

impl StrictDocument {
    /// Validate `doc` against `schema` and wrap it.
    ///
    /// Fails with [`Error::SchemaViolation`] carrying every violation
    /// found; the violations are also logged before the error returns.
    pub fn new(doc: Document, schema: &Schema) -> Result<Self> {
        let violations = schema.validate(&doc);
        if !violations.is_empty() {
            for violation in &violations {
                log::warn!("schema violation: {violation}");
            }
            return Err(Error::SchemaViolation(Violations::new(violations)));
        }
        Ok(Self { origin: doc })
    }

    /// Validate `doc` against a schema given as an XSD document.
    ///
    /// Schema compilation failures surface as [`Error::InvalidSchema`]
    /// before any validation runs.
    pub fn against(doc: Document, xsd: &Document) -> Result<Self> {
        let schema = Schema::from_document(xsd)?;
        Self::new(doc, &schema)
    }

    /// Evaluate an XPath expression; see [`Document::xpath`].
    pub fn xpath(&self, expr: &str) -> Result<Vec<String>> {
        self.origin.xpath(expr)
    }

    /// Extract matching subtrees; see [`Document::nodes`].
    ///
    /// The extracted documents are plain [`Document`]s: a subtree of a
    /// valid document is not itself known to conform.
    pub fn nodes(&self, expr: &str) -> Result<Vec<Document>> {
        self.origin.nodes(expr)
    }

    /// The active namespace context.
    pub fn context(&self) -> &NamespaceContext {
        self.origin.context()
    }

    /// A plain document with one more namespace binding. The strict
    /// guarantee does not carry over, by construction.
    pub fn register_ns(&self, prefix: &str, uri: impl Into<String>) -> Result<Document> {
        self.origin.register_ns(prefix, uri)
    }

    /// A plain document with merged namespace bindings.
    pub fn merge<P: NamespaceBindings + ?Sized>(&self, other: &P) -> Document {
        self.origin.merge(other)
    }

    /// The canonical serialized form.
    pub fn render(&self) -> &str {
        self.origin.render()
    }

    /// Unwrap into the underlying document.
    pub fn into_inner(self) -> Document {
        self.origin
    }
}

impl fmt::Display for StrictDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.origin, f)
    }
}

impl AsRef<Document> for StrictDocument {
    fn as_ref(&self) -> &Document {
        &self.origin
    }
}

impl NamespaceBindings for StrictDocument {
    fn namespace_bindings(&self) -> Vec<(String, String)> {
        self.origin.namespace_bindings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
      <xs:element name="payment">
        <xs:complexType>
          <xs:sequence>
            <xs:element name="id" type="xs:integer"/>
          </xs:sequence>
        </xs:complexType>
      </xs:element>
    </xs:schema>"#;

    #[test]
    fn test_conformant_document_passes_and_delegates() {
        let schema = Schema::from_string(XSD).unwrap();
        let doc = Document::from_string("<payment><id>333</id></payment>").unwrap();
        let strict = StrictDocument::new(doc.clone(), &schema).unwrap();

        assert_eq!(strict.xpath("/payment/id/text()").unwrap(), vec!["333"]);
        assert_eq!(strict.render(), doc.render());
        assert_eq!(strict.to_string(), doc.to_string());
    }

    #[test]
    fn test_non_conformant_document_is_rejected() {
        let schema = Schema::from_string(XSD).unwrap();
        let doc = Document::from_string("<payment><id>abc</id></payment>").unwrap();
        match StrictDocument::new(doc, &schema) {
            Err(Error::SchemaViolation(violations)) => {
                assert_eq!(violations.len(), 1);
            }
            other => panic!("expected SchemaViolation, got {other:?}"),
        }
    }

    #[test]
    fn test_against_compiles_the_schema_first() {
        let xsd = Document::from_string(XSD).unwrap();
        let doc = Document::from_string("<payment><id>7</id></payment>").unwrap();
        assert!(StrictDocument::against(doc, &xsd).is_ok());

        let bad_xsd = Document::from_string("<not-a-schema/>").unwrap();
        let doc = Document::from_string("<payment><id>7</id></payment>").unwrap();
        assert!(matches!(
            StrictDocument::against(doc, &bad_xsd),
            Err(Error::InvalidSchema(_))
        ));
    }

    #[test]
    fn test_escape_hatches_return_plain_documents() {
        let schema = Schema::from_string(XSD).unwrap();
        let doc = Document::from_string("<payment><id>1</id></payment>").unwrap();
        let strict = StrictDocument::new(doc, &schema).unwrap();

        let rebound: Document = strict.register_ns("p", "urn:pay").unwrap();
        assert_eq!(rebound.context().uri("p"), Some("urn:pay"));

        let unwrapped = strict.into_inner();
        assert_eq!(unwrapped.xpath("/payment/id/text()").unwrap(), vec!["1"]);
    }
}
