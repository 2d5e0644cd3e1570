//! XML Schema compilation and validation
//!
//! A [`Schema`] is compiled once from an XSD document and then applied to
//! any number of documents. Validation never fails as an operation: it
//! returns the list of [`Violation`]s found, empty for a conformant
//! document. Structural problems in the schema itself surface at
//! compilation as [`Error::InvalidSchema`].
//!
//! The compiler covers the XSD subset this crate works with: global
//! `xs:element` declarations, named and inline `xs:complexType` with
//! `xs:sequence` particles (`minOccurs`/`maxOccurs`), required attributes
//! and the common built-in simple types. `xs:include` and `xs:import` are
//! resolved through a [`Sources`] resolver.

use crate::documents::Document;
use crate::error::{Error, Result, Violation};
use crate::sources::Sources;
use crate::XSD_NAMESPACE;
use indexmap::IndexMap;
use std::path::Path;
use std::sync::Arc;

/// A compiled schema, ready to validate documents.
#[derive(Debug, Clone)]
pub struct Schema {
    /// Namespace the schema's declarations live in
    target_namespace: Option<String>,
    /// Global element declarations by local name
    elements: IndexMap<String, ElementDecl>,
    /// Named complex types by local name
    types: IndexMap<String, ComplexType>,
}

#[derive(Debug, Clone)]
struct ElementDecl {
    name: String,
    type_ref: TypeRef,
}

#[derive(Debug, Clone)]
enum TypeRef {
    /// One of the built-in simple types
    Simple(SimpleType),
    /// Reference to a named complex type
    Named(String),
    /// Anonymous complex type declared inline
    Inline(Box<ComplexType>),
    /// No type given: anything is accepted
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimpleType {
    String,
    Integer,
    Decimal,
    Boolean,
    AnyUri,
}

#[derive(Debug, Clone)]
struct ComplexType {
    /// Child element particles, in sequence order
    particles: Vec<Particle>,
    attributes: Vec<AttributeDecl>,
}

#[derive(Debug, Clone)]
struct Particle {
    element: ElementDecl,
    min: u32,
    max: Occurs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Occurs {
    Bounded(u32),
    Unbounded,
}

#[derive(Debug, Clone)]
struct AttributeDecl {
    name: String,
    required: bool,
    simple: SimpleType,
}

fn schema_error(message: impl Into<String>) -> Error {
    Error::InvalidSchema(message.into())
}

fn is_xs(node: &roxmltree::Node<'_, '_>, local: &str) -> bool {
    node.is_element()
        && node.tag_name().namespace() == Some(XSD_NAMESPACE)
        && node.tag_name().name() == local
}

impl Schema {
    /// Compile a schema from XSD text, with no include/import resolution.
    pub fn from_string(xsd: &str) -> Result<Self> {
        Self::compile(xsd, "/", &crate::sources::DUMMY)
    }

    /// Compile a schema from an XSD document, with no include/import
    /// resolution.
    pub fn from_document(xsd: &Document) -> Result<Self> {
        Self::from_string(xsd.render())
    }

    /// Compile a schema from an XSD document, resolving `xs:include` and
    /// `xs:import` through `sources`.
    pub fn from_document_with_sources(xsd: &Document, sources: Arc<dyn Sources>) -> Result<Self> {
        Self::compile(xsd.render(), "/", sources.as_ref())
    }

    /// Compile a schema read from a file; nested references resolve
    /// relative to the file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let xsd = std::fs::read_to_string(path)?;
        let sources = crate::sources::FileSources::in_dir(
            path.parent().unwrap_or_else(|| Path::new("")),
        );
        Self::compile(&xsd, &path.to_string_lossy(), &sources)
    }

    fn compile(xsd: &str, base: &str, sources: &dyn Sources) -> Result<Self> {
        let mut resolved_chain = vec![base.to_string()];
        Self::compile_nested(xsd, base, sources, &mut resolved_chain)
    }

    /// `resolved_chain` holds every location on the current include path;
    /// a repeat means the schemas reference each other in a cycle.
    fn compile_nested(
        xsd: &str,
        base: &str,
        sources: &dyn Sources,
        resolved_chain: &mut Vec<String>,
    ) -> Result<Self> {
        let tree = roxmltree::Document::parse(xsd)
            .map_err(|e| schema_error(format!("schema is not well-formed XML: {e}")))?;
        let root = tree.root_element();
        if !is_xs(&root, "schema") {
            return Err(schema_error(format!(
                "root element '{}' is not xs:schema",
                root.tag_name().name()
            )));
        }

        let mut schema = Self {
            target_namespace: root.attribute("targetNamespace").map(str::to_string),
            elements: IndexMap::new(),
            types: IndexMap::new(),
        };

        for child in root.children().filter(|c| c.is_element()) {
            if is_xs(&child, "element") {
                let decl = compile_element(&child)?;
                schema.elements.insert(decl.name.clone(), decl);
            } else if is_xs(&child, "complexType") {
                let name = child
                    .attribute("name")
                    .ok_or_else(|| schema_error("top-level xs:complexType requires a name"))?;
                schema
                    .types
                    .insert(name.to_string(), compile_complex_type(&child)?);
            } else if is_xs(&child, "include") || is_xs(&child, "import") {
                let location = child.attribute("schemaLocation").ok_or_else(|| {
                    schema_error("xs:include/import requires a schemaLocation attribute")
                })?;
                // Resolver failures propagate unchanged.
                let resolved = sources.resolve(location, Some(base))?;
                if resolved_chain.contains(&resolved.location) {
                    return Err(schema_error(format!(
                        "cyclic include of '{location}': '{}' is already being compiled",
                        resolved.location
                    )));
                }
                let nested_xsd = std::str::from_utf8(&resolved.bytes).map_err(|e| {
                    schema_error(format!("included schema '{location}' is not UTF-8: {e}"))
                })?;
                resolved_chain.push(resolved.location.clone());
                let nested =
                    Self::compile_nested(nested_xsd, &resolved.location, sources, resolved_chain)?;
                resolved_chain.pop();
                for (name, decl) in nested.elements {
                    schema.elements.entry(name).or_insert(decl);
                }
                for (name, ctype) in nested.types {
                    schema.types.entry(name).or_insert(ctype);
                }
                if schema.target_namespace.is_none() {
                    schema.target_namespace = nested.target_namespace;
                }
            } else if child.tag_name().namespace() == Some(XSD_NAMESPACE) {
                log::debug!("ignoring top-level xs:{}", child.tag_name().name());
            } else {
                return Err(schema_error(format!(
                    "unexpected top-level element '{}'",
                    child.tag_name().name()
                )));
            }
        }

        schema.check_references()?;
        Ok(schema)
    }

    /// Every named type reference must resolve; a dangling reference is a
    /// schema defect, not a document defect.
    fn check_references(&self) -> Result<()> {
        fn check(schema: &Schema, decl: &ElementDecl) -> Result<()> {
            match &decl.type_ref {
                TypeRef::Named(name) if !schema.types.contains_key(name) => Err(schema_error(
                    format!("element '{}' references undefined type '{}'", decl.name, name),
                )),
                TypeRef::Inline(ctype) => {
                    for particle in &ctype.particles {
                        check(schema, &particle.element)?;
                    }
                    Ok(())
                }
                _ => Ok(()),
            }
        }
        for decl in self.elements.values() {
            check(self, decl)?;
        }
        for ctype in self.types.values() {
            for particle in &ctype.particles {
                check(self, &particle.element)?;
            }
        }
        Ok(())
    }

    /// Validate a document against this schema.
    ///
    /// Returns every violation found; an empty list means the document
    /// conforms. This operation itself never fails.
    pub fn validate(&self, doc: &Document) -> Vec<Violation> {
        let tree = match roxmltree::Document::parse(doc.render()) {
            Ok(tree) => tree,
            // The document was canonicalized at construction; a re-parse
            // failure here would be a bug, surface it as a violation.
            Err(e) => return vec![Violation::new(format!("document re-parse failed: {e}"))],
        };
        let mut violations = Vec::new();
        let root = tree.root_element();
        let path = format!("/{}", root.tag_name().name());

        if root.tag_name().namespace().map(str::to_string) != self.target_namespace {
            violations.push(
                Violation::new(format!(
                    "root element '{}' is not in the schema's target namespace",
                    root.tag_name().name()
                ))
                .with_path(&path)
                .with_line(line_of(&tree, &root)),
            );
            return violations;
        }
        match self.elements.get(root.tag_name().name()) {
            Some(decl) => self.validate_element(&tree, &root, decl, &path, &mut violations),
            None => violations.push(
                Violation::new(format!(
                    "no declaration found for element '{}'",
                    root.tag_name().name()
                ))
                .with_path(&path)
                .with_line(line_of(&tree, &root)),
            ),
        }
        violations
    }

    fn validate_element(
        &self,
        tree: &roxmltree::Document<'_>,
        node: &roxmltree::Node<'_, '_>,
        decl: &ElementDecl,
        path: &str,
        violations: &mut Vec<Violation>,
    ) {
        match &decl.type_ref {
            TypeRef::Any => {}
            TypeRef::Simple(simple) => {
                if node.children().any(|c| c.is_element()) {
                    violations.push(
                        Violation::new(format!(
                            "element '{}' has a simple type and must not contain elements",
                            decl.name
                        ))
                        .with_path(path)
                        .with_line(line_of(tree, node)),
                    );
                    return;
                }
                let text = node.text().unwrap_or_default().trim().to_string();
                if let Some(message) = simple.check(&text) {
                    violations.push(
                        Violation::new(format!("element '{}': {message}", decl.name))
                            .with_path(path)
                            .with_line(line_of(tree, node)),
                    );
                }
            }
            TypeRef::Named(name) => {
                // Reference checked at compile time.
                if let Some(ctype) = self.types.get(name) {
                    self.validate_complex(tree, node, ctype, path, violations);
                }
            }
            TypeRef::Inline(ctype) => {
                self.validate_complex(tree, node, ctype, path, violations);
            }
        }
    }

    fn validate_complex(
        &self,
        tree: &roxmltree::Document<'_>,
        node: &roxmltree::Node<'_, '_>,
        ctype: &ComplexType,
        path: &str,
        violations: &mut Vec<Violation>,
    ) {
        for attr_decl in &ctype.attributes {
            match node.attribute(attr_decl.name.as_str()) {
                Some(value) => {
                    if let Some(message) = attr_decl.simple.check(value.trim()) {
                        violations.push(
                            Violation::new(format!(
                                "attribute '{}': {message}",
                                attr_decl.name
                            ))
                            .with_path(path)
                            .with_line(line_of(tree, node)),
                        );
                    }
                }
                None if attr_decl.required => violations.push(
                    Violation::new(format!(
                        "required attribute '{}' is missing",
                        attr_decl.name
                    ))
                    .with_path(path)
                    .with_line(line_of(tree, node)),
                ),
                None => {}
            }
        }

        // Children must follow the sequence: every child maps to a particle
        // and particle positions never go backwards.
        let mut last_particle = 0usize;
        let mut counts = vec![0u32; ctype.particles.len()];
        let mut sibling_tally: IndexMap<&str, u32> = IndexMap::new();
        for child in node.children().filter(|c| c.is_element()) {
            let child_name = child.tag_name().name();
            let ordinal = {
                let entry = sibling_tally.entry(child_name).or_insert(0);
                *entry += 1;
                *entry
            };
            let position = ctype
                .particles
                .iter()
                .position(|p| p.element.name == child_name);
            let same_name_total = node
                .children()
                .filter(|c| c.is_element() && c.tag_name().name() == child_name)
                .count();
            let child_path = if same_name_total > 1 {
                format!("{path}/{child_name}[{ordinal}]")
            } else {
                format!("{path}/{child_name}")
            };
            match position {
                Some(index) => {
                    if index < last_particle {
                        violations.push(
                            Violation::new(format!(
                                "element '{child_name}' is out of sequence order"
                            ))
                            .with_path(&child_path)
                            .with_line(line_of(tree, &child)),
                        );
                    }
                    last_particle = last_particle.max(index);
                    counts[index] += 1;
                    self.validate_element(
                        tree,
                        &child,
                        &ctype.particles[index].element,
                        &child_path,
                        violations,
                    );
                }
                None => violations.push(
                    Violation::new(format!("element '{child_name}' is not allowed here"))
                        .with_path(&child_path)
                        .with_line(line_of(tree, &child)),
                ),
            }
        }

        for (index, particle) in ctype.particles.iter().enumerate() {
            let count = counts[index];
            if count < particle.min {
                violations.push(
                    Violation::new(format!(
                        "element '{}' occurs {count} time(s), expected at least {}",
                        particle.element.name, particle.min
                    ))
                    .with_path(path)
                    .with_line(line_of(tree, node)),
                );
            }
            if let Occurs::Bounded(max) = particle.max {
                if count > max {
                    violations.push(
                        Violation::new(format!(
                            "element '{}' occurs {count} time(s), expected at most {max}",
                            particle.element.name
                        ))
                        .with_path(path)
                        .with_line(line_of(tree, node)),
                    );
                }
            }
        }
    }
}

impl SimpleType {
    fn check(self, value: &str) -> Option<String> {
        match self {
            SimpleType::String | SimpleType::AnyUri => None,
            SimpleType::Integer => value
                .parse::<i64>()
                .is_err()
                .then(|| format!("'{value}' is not a valid integer")),
            SimpleType::Decimal => value
                .parse::<f64>()
                .is_err()
                .then(|| format!("'{value}' is not a valid decimal")),
            SimpleType::Boolean => (!matches!(value, "true" | "false" | "1" | "0"))
                .then(|| format!("'{value}' is not a valid boolean")),
        }
    }

    fn by_name(local: &str) -> Option<Self> {
        match local {
            "string" | "token" | "normalizedString" => Some(SimpleType::String),
            "integer" | "int" | "long" | "short" | "nonNegativeInteger" | "positiveInteger" => {
                Some(SimpleType::Integer)
            }
            "decimal" | "double" | "float" => Some(SimpleType::Decimal),
            "boolean" => Some(SimpleType::Boolean),
            "anyURI" => Some(SimpleType::AnyUri),
            _ => None,
        }
    }
}

fn compile_element(node: &roxmltree::Node<'_, '_>) -> Result<ElementDecl> {
    let name = node
        .attribute("name")
        .ok_or_else(|| schema_error("xs:element requires a name attribute"))?;
    let type_ref = match node.attribute("type") {
        Some(type_name) => resolve_type_name(node, type_name)?,
        None => match node.children().find(|c| is_xs(c, "complexType")) {
            Some(inline) => TypeRef::Inline(Box::new(compile_complex_type(&inline)?)),
            None => TypeRef::Any,
        },
    };
    Ok(ElementDecl {
        name: name.to_string(),
        type_ref,
    })
}

fn resolve_type_name(node: &roxmltree::Node<'_, '_>, type_name: &str) -> Result<TypeRef> {
    let (prefix, local) = match type_name.split_once(':') {
        Some((p, l)) => (Some(p), l),
        None => (None, type_name),
    };
    let uri = match prefix {
        Some(p) => Some(node.lookup_namespace_uri(Some(p)).ok_or_else(|| {
            schema_error(format!("type prefix '{p}' is not declared"))
        })?),
        None => node.lookup_namespace_uri(None),
    };
    if uri == Some(XSD_NAMESPACE) {
        if local == "anyType" {
            return Ok(TypeRef::Any);
        }
        return SimpleType::by_name(local).map(TypeRef::Simple).ok_or_else(|| {
            schema_error(format!("unsupported built-in type 'xs:{local}'"))
        });
    }
    Ok(TypeRef::Named(local.to_string()))
}

fn compile_complex_type(node: &roxmltree::Node<'_, '_>) -> Result<ComplexType> {
    let mut particles = Vec::new();
    let mut attributes = Vec::new();
    for child in node.children().filter(|c| c.is_element()) {
        if is_xs(&child, "sequence") {
            for member in child.children().filter(|c| c.is_element()) {
                if !is_xs(&member, "element") {
                    return Err(schema_error(format!(
                        "unsupported particle '{}' inside xs:sequence",
                        member.tag_name().name()
                    )));
                }
                particles.push(compile_particle(&member)?);
            }
        } else if is_xs(&child, "attribute") {
            attributes.push(compile_attribute(&child)?);
        } else {
            return Err(schema_error(format!(
                "unsupported content '{}' inside xs:complexType",
                child.tag_name().name()
            )));
        }
    }
    Ok(ComplexType {
        particles,
        attributes,
    })
}

fn compile_particle(node: &roxmltree::Node<'_, '_>) -> Result<Particle> {
    let min = match node.attribute("minOccurs") {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| schema_error(format!("invalid minOccurs '{raw}'")))?,
        None => 1,
    };
    let max = match node.attribute("maxOccurs") {
        Some("unbounded") => Occurs::Unbounded,
        Some(raw) => Occurs::Bounded(
            raw.parse::<u32>()
                .map_err(|_| schema_error(format!("invalid maxOccurs '{raw}'")))?,
        ),
        None => Occurs::Bounded(1),
    };
    if let Occurs::Bounded(bound) = max {
        if bound < min {
            return Err(schema_error(format!(
                "maxOccurs {bound} is smaller than minOccurs {min}"
            )));
        }
    }
    Ok(Particle {
        element: compile_element(node)?,
        min,
        max,
    })
}

fn compile_attribute(node: &roxmltree::Node<'_, '_>) -> Result<AttributeDecl> {
    let name = node
        .attribute("name")
        .ok_or_else(|| schema_error("xs:attribute requires a name attribute"))?;
    let simple = match node.attribute("type") {
        Some(type_name) => match resolve_type_name(node, type_name)? {
            TypeRef::Simple(simple) => simple,
            _ => {
                return Err(schema_error(format!(
                    "attribute '{name}' must have a built-in simple type"
                )))
            }
        },
        None => SimpleType::String,
    };
    Ok(AttributeDecl {
        name: name.to_string(),
        required: node.attribute("use") == Some("required"),
        simple,
    })
}

fn line_of(tree: &roxmltree::Document<'_>, node: &roxmltree::Node<'_, '_>) -> usize {
    tree.text_pos_at(node.range().start).row as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::BundleSources;

    const SIMPLE_XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
      <xs:element name="payment">
        <xs:complexType>
          <xs:sequence>
            <xs:element name="id" type="xs:integer"/>
            <xs:element name="date" type="xs:string" minOccurs="0"/>
          </xs:sequence>
          <xs:attribute name="currency" type="xs:string" use="required"/>
        </xs:complexType>
      </xs:element>
    </xs:schema>"#;

    #[test]
    fn test_conformant_document_has_no_violations() {
        let schema = Schema::from_string(SIMPLE_XSD).unwrap();
        let doc =
            Document::from_string("<payment currency=\"EUR\"><id>333</id></payment>").unwrap();
        assert!(schema.validate(&doc).is_empty());
    }

    #[test]
    fn test_missing_required_attribute() {
        let schema = Schema::from_string(SIMPLE_XSD).unwrap();
        let doc = Document::from_string("<payment><id>333</id></payment>").unwrap();
        let violations = schema.validate(&doc);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message().contains("currency"));
        assert_eq!(violations[0].path(), Some("/payment"));
    }

    #[test]
    fn test_simple_type_mismatch() {
        let schema = Schema::from_string(SIMPLE_XSD).unwrap();
        let doc = Document::from_string(
            "<payment currency=\"EUR\"><id>not-a-number</id></payment>",
        )
        .unwrap();
        let violations = schema.validate(&doc);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message().contains("not a valid integer"));
        assert_eq!(violations[0].path(), Some("/payment/id"));
    }

    #[test]
    fn test_unexpected_element_and_occurrence() {
        let schema = Schema::from_string(SIMPLE_XSD).unwrap();
        let doc = Document::from_string(
            "<payment currency=\"EUR\"><bogus/><id>1</id><id>2</id></payment>",
        )
        .unwrap();
        let violations = schema.validate(&doc);
        let messages: Vec<&str> = violations.iter().map(|v| v.message()).collect();
        assert!(messages.iter().any(|m| m.contains("not allowed")));
        assert!(messages.iter().any(|m| m.contains("at most 1")));
    }

    #[test]
    fn test_sequence_order_enforced() {
        let schema = Schema::from_string(SIMPLE_XSD).unwrap();
        let doc = Document::from_string(
            "<payment currency=\"EUR\"><date>d</date><id>1</id></payment>",
        )
        .unwrap();
        let violations = schema.validate(&doc);
        assert!(violations
            .iter()
            .any(|v| v.message().contains("out of sequence order")));
    }

    #[test]
    fn test_undeclared_root() {
        let schema = Schema::from_string(SIMPLE_XSD).unwrap();
        let doc = Document::from_string("<refund/>").unwrap();
        let violations = schema.validate(&doc);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message().contains("no declaration"));
    }

    #[test]
    fn test_target_namespace_checked() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
            targetNamespace="urn:pay">
          <xs:element name="payment" type="xs:string"/>
        </xs:schema>"#;
        let schema = Schema::from_string(xsd).unwrap();

        let wrong = Document::from_string("<payment>x</payment>").unwrap();
        assert!(!schema.validate(&wrong).is_empty());

        let right = Document::from_string("<payment xmlns=\"urn:pay\">x</payment>").unwrap();
        assert!(schema.validate(&right).is_empty());
    }

    #[test]
    fn test_named_type_reference() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
          <xs:element name="order" type="OrderType"/>
          <xs:complexType name="OrderType">
            <xs:sequence>
              <xs:element name="total" type="xs:decimal"/>
            </xs:sequence>
          </xs:complexType>
        </xs:schema>"#;
        let schema = Schema::from_string(xsd).unwrap();
        let doc = Document::from_string("<order><total>9.99</total></order>").unwrap();
        assert!(schema.validate(&doc).is_empty());
    }

    #[test]
    fn test_dangling_type_reference_is_schema_error() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
          <xs:element name="order" type="MissingType"/>
        </xs:schema>"#;
        assert!(matches!(Schema::from_string(xsd), Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn test_malformed_schema() {
        assert!(matches!(
            Schema::from_string("<xs:schema"),
            Err(Error::InvalidSchema(_))
        ));
    }

    #[test]
    fn test_include_resolved_through_sources() {
        let shared = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
          <xs:complexType name="ItemType">
            <xs:sequence>
              <xs:element name="sku" type="xs:string"/>
            </xs:sequence>
          </xs:complexType>
        </xs:schema>"#;
        let main = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
          <xs:include schemaLocation="shared.xsd"/>
          <xs:element name="item" type="ItemType"/>
        </xs:schema>"#;
        let xsd = Document::from_string(main).unwrap();
        let sources = Arc::new(BundleSources::new().with_resource("shared.xsd", shared));
        let schema = Schema::from_document_with_sources(&xsd, sources).unwrap();
        let doc = Document::from_string("<item><sku>a-1</sku></item>").unwrap();
        assert!(schema.validate(&doc).is_empty());
    }

    #[test]
    fn test_from_file_resolves_sibling_includes() {
        let shared = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
          <xs:complexType name="ItemType">
            <xs:sequence>
              <xs:element name="sku" type="xs:string"/>
            </xs:sequence>
          </xs:complexType>
        </xs:schema>"#;
        let main = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
          <xs:include schemaLocation="shared.xsd"/>
          <xs:element name="item" type="ItemType"/>
        </xs:schema>"#;
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("shared.xsd"), shared).unwrap();
        std::fs::write(dir.path().join("main.xsd"), main).unwrap();

        let schema = Schema::from_file(dir.path().join("main.xsd")).unwrap();
        let doc = Document::from_string("<item><sku>a-1</sku></item>").unwrap();
        assert!(schema.validate(&doc).is_empty());
    }

    #[test]
    fn test_cyclic_include_is_schema_error() {
        let alpha = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
          <xs:include schemaLocation="beta.xsd"/>
        </xs:schema>"#;
        let beta = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
          <xs:include schemaLocation="alpha.xsd"/>
        </xs:schema>"#;
        let xsd = Document::from_string(alpha).unwrap();
        let sources = Arc::new(
            BundleSources::new()
                .with_resource("alpha.xsd", alpha)
                .with_resource("beta.xsd", beta),
        );
        match Schema::from_document_with_sources(&xsd, sources) {
            Err(Error::InvalidSchema(msg)) => assert!(msg.contains("cyclic")),
            other => panic!("expected InvalidSchema, got {other:?}"),
        }
    }

    #[test]
    fn test_include_with_dummy_sources_fails_not_found() {
        let main = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
          <xs:include schemaLocation="shared.xsd"/>
        </xs:schema>"#;
        assert!(matches!(
            Schema::from_string(main),
            Err(Error::ResourceNotFound { .. })
        ));
    }
}
