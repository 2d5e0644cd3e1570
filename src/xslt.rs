//! XSLT transformation
//!
//! A [`Stylesheet`] is one transformation program: source text, a base
//! locator, an ordered parameter map and the [`Sources`] resolver used for
//! `xsl:import`/`xsl:include`. It compiles lazily (memoized) and applies
//! itself to a [`Document`], producing a new `Document`. A
//! [`TransformChain`] composes transforms in order and satisfies the same
//! [`Transform`] contract, so chains nest.
//!
//! The execution engine carries an XSLT 1.0 subset: template matching on
//! `/`, names, `*` and `text()`, `apply-templates`, `value-of`, `for-each`,
//! `if`, `choose`, `copy-of`, `text`, top-level `param`, `message` and
//! literal result elements with `{…}` attribute value templates.

use crate::documents::{serialize_subtree, Document};
use crate::error::{Error, Result};
use crate::namespaces::NamespaceContext;
use crate::sources::Sources;
use crate::xpath::{self, Value};
use crate::XSLT_NAMESPACE;
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// A transformation parameter value: an opaque scalar fixed at
/// construction time.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// String value
    Text(String),
    /// Numeric value
    Number(f64),
    /// Boolean value
    Flag(bool),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Text(s) => f.write_str(s),
            ParamValue::Number(n) if n.fract() == 0.0 => write!(f, "{}", *n as i64),
            ParamValue::Number(n) => write!(f, "{n}"),
            ParamValue::Flag(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Number(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Number(value as f64)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Flag(value)
    }
}

/// One transformation step: applies itself to a document and yields a new
/// one. Implemented by [`Stylesheet`] and [`TransformChain`].
pub trait Transform: Send + Sync {
    /// Apply the transformation to `input`.
    ///
    /// The output document carries the default conventional namespace
    /// context, not the input's.
    fn apply_to(&self, input: &Document) -> Result<Document>;

    /// A new transform with one more parameter bound. On a chain, the
    /// parameter is injected into every member.
    fn with_param(&self, name: &str, value: ParamValue) -> Box<dyn Transform>;

    /// A new transform resolving external references through `sources`.
    fn with_sources(&self, sources: Arc<dyn Sources>) -> Box<dyn Transform>;

    /// Clone into a boxed trait object.
    fn boxed(&self) -> Box<dyn Transform>;
}

/// One XSLT stylesheet with bound parameters and a source resolver.
///
/// Immutable: the `with_*` builders return new values. Compilation happens
/// on first application and is memoized; a compile failure is reported on
/// every call without poisoning the value.
#[derive(Debug, Clone)]
pub struct Stylesheet {
    /// Stylesheet source text
    src: String,
    /// Base locator used when resolving imports/includes
    base: String,
    /// Resolver for xsl:import / xsl:include
    sources: Arc<dyn Sources>,
    /// Bound parameters, in binding order
    params: IndexMap<String, ParamValue>,
    /// Memoized compilation result
    compiled: OnceCell<Compiled>,
}

impl Stylesheet {
    /// Stylesheet from source text, with no source resolution configured
    /// (imports fail with `ResourceNotFound`).
    pub fn from_string(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            base: "/".to_string(),
            sources: Arc::new(crate::sources::DUMMY),
            params: IndexMap::new(),
            compiled: OnceCell::new(),
        }
    }

    /// Stylesheet from an XML document.
    pub fn from_document(doc: &Document) -> Self {
        Self::from_string(doc.render())
    }

    /// Stylesheet read from a file; the file path becomes the base
    /// locator.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path)?;
        Ok(Self::from_string(src).with_base(path.to_string_lossy()))
    }

    /// Set the base locator (system id) used for import resolution.
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self.compiled = OnceCell::new();
        self
    }

    /// Bind a source resolver.
    pub fn with_sources(mut self, sources: Arc<dyn Sources>) -> Self {
        self.sources = sources;
        self.compiled = OnceCell::new();
        self
    }

    /// Bind one parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    fn compiled(&self) -> Result<&Compiled> {
        self.compiled
            .get_or_try_init(|| compile(&self.src, &self.base, self.sources.as_ref()))
    }
}

impl fmt::Display for Stylesheet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Document::from_string(&self.src) {
            Ok(doc) => write!(f, "{doc}"),
            Err(_) => f.write_str(&self.src),
        }
    }
}

impl Transform for Stylesheet {
    fn apply_to(&self, input: &Document) -> Result<Document> {
        let compiled = self.compiled()?;
        let tree = roxmltree::Document::parse(input.render())
            .map_err(|e| Error::TransformExecution(format!("input re-parse failed: {e}")))?;

        let mut effective = compiled.param_defaults.clone();
        for (name, value) in &self.params {
            effective.insert(name.clone(), value.to_string());
        }

        let started = Instant::now();
        let output = execute(compiled, &tree, &effective)?;
        log::trace!("transformed XML in {:?}", started.elapsed());

        Document::from_string(&output).map_err(|e| {
            Error::TransformExecution(format!(
                "transformation output is not a well-formed document: {e}"
            ))
        })
    }

    fn with_param(&self, name: &str, value: ParamValue) -> Box<dyn Transform> {
        Box::new(self.clone().with_param(name, value))
    }

    fn with_sources(&self, sources: Arc<dyn Sources>) -> Box<dyn Transform> {
        Box::new(self.clone().with_sources(sources))
    }

    fn boxed(&self) -> Box<dyn Transform> {
        Box::new(self.clone())
    }
}

/// Ordered composition of transforms; itself a [`Transform`].
///
/// Members run strictly left to right, each consuming the previous
/// member's output. The empty chain is the identity transform.
pub struct TransformChain {
    sheets: Vec<Box<dyn Transform>>,
}

impl TransformChain {
    /// The empty (identity) chain.
    pub fn new() -> Self {
        Self { sheets: Vec::new() }
    }

    /// Chain over the given members, in order.
    pub fn of(sheets: Vec<Box<dyn Transform>>) -> Self {
        Self { sheets }
    }

    /// A new chain with `transform` appended as the final stage.
    pub fn then(&self, transform: Box<dyn Transform>) -> Self {
        let mut sheets: Vec<Box<dyn Transform>> = self.sheets.iter().map(|s| s.boxed()).collect();
        sheets.push(transform);
        Self { sheets }
    }

    /// A new chain with the parameter bound on every member.
    pub fn with_param(&self, name: &str, value: ParamValue) -> Self {
        Self {
            sheets: self
                .sheets
                .iter()
                .map(|s| s.with_param(name, value.clone()))
                .collect(),
        }
    }

    /// A new chain with the resolver bound on every member.
    pub fn with_sources(&self, sources: Arc<dyn Sources>) -> Self {
        Self {
            sheets: self
                .sheets
                .iter()
                .map(|s| s.with_sources(Arc::clone(&sources)))
                .collect(),
        }
    }

    /// Number of member transforms.
    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    /// Whether the chain is the identity.
    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }
}

impl Default for TransformChain {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for TransformChain {
    fn clone(&self) -> Self {
        Self {
            sheets: self.sheets.iter().map(|s| s.boxed()).collect(),
        }
    }
}

impl fmt::Debug for TransformChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformChain")
            .field("len", &self.sheets.len())
            .finish()
    }
}

impl Transform for TransformChain {
    /// Apply every member in order; fail fast with the first member's
    /// error, unchanged. An empty chain returns its input.
    fn apply_to(&self, input: &Document) -> Result<Document> {
        let mut output = input.clone();
        for sheet in &self.sheets {
            output = sheet.apply_to(&output)?;
        }
        Ok(output)
    }

    fn with_param(&self, name: &str, value: ParamValue) -> Box<dyn Transform> {
        Box::new(TransformChain::with_param(self, name, value))
    }

    fn with_sources(&self, sources: Arc<dyn Sources>) -> Box<dyn Transform> {
        Box::new(TransformChain::with_sources(self, sources))
    }

    fn boxed(&self) -> Box<dyn Transform> {
        Box::new(self.clone())
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Compiled {
    /// Templates in match order: main stylesheet first, imports after
    templates: Vec<Template>,
    /// Top-level xsl:param defaults
    param_defaults: IndexMap<String, String>,
    /// Prefixes declared on the stylesheet root, used for select paths
    context: NamespaceContext,
}

#[derive(Debug, Clone)]
struct Template {
    pattern: Pattern,
    body: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq)]
enum Pattern {
    /// `match="/"`
    Root,
    /// `match="*"`
    AnyElement,
    /// `match="name"` / `match="p:name"` with the prefix resolved at
    /// compile time
    Name { uri: Option<String>, local: String },
    /// `match="text()"`
    TextNodes,
}

#[derive(Debug, Clone)]
enum Instruction {
    Literal {
        name: String,
        namespaces: Vec<(String, String)>,
        attrs: Vec<(String, Vec<AvtPart>)>,
        body: Vec<Instruction>,
    },
    Text(String),
    ValueOf(Select),
    ApplyTemplates {
        select: Option<String>,
    },
    ForEach {
        select: String,
        body: Vec<Instruction>,
    },
    If {
        test: Condition,
        body: Vec<Instruction>,
    },
    Choose {
        whens: Vec<(Condition, Vec<Instruction>)>,
        otherwise: Vec<Instruction>,
    },
    CopyOf {
        select: String,
    },
    Message {
        terminate: bool,
        body: Vec<Instruction>,
    },
}

#[derive(Debug, Clone)]
enum Select {
    /// `$name`
    Variable(String),
    /// `'literal'`
    Literal(String),
    /// A location path
    Path(String),
}

#[derive(Debug, Clone)]
enum Condition {
    Exists(String),
    NotExists(String),
    Equals(Select, String),
}

#[derive(Debug, Clone)]
enum AvtPart {
    Literal(String),
    Expr(Select),
}

fn compile_error(message: impl Into<String>) -> Error {
    Error::StylesheetCompile(message.into())
}

fn check_path(expr: &str) -> Result<()> {
    xpath::validate(expr).map_err(|e| compile_error(e.to_string()))
}

fn is_xsl(node: &roxmltree::Node<'_, '_>, local: &str) -> bool {
    node.is_element()
        && node.tag_name().namespace() == Some(XSLT_NAMESPACE)
        && node.tag_name().name() == local
}

fn compile(src: &str, base: &str, sources: &dyn Sources) -> Result<Compiled> {
    let mut resolved_chain = vec![base.to_string()];
    compile_nested(src, base, sources, &mut resolved_chain)
}

/// `resolved_chain` holds every location on the current import path;
/// a repeat means the stylesheets reference each other in a cycle.
fn compile_nested(
    src: &str,
    base: &str,
    sources: &dyn Sources,
    resolved_chain: &mut Vec<String>,
) -> Result<Compiled> {
    let tree = roxmltree::Document::parse(src)
        .map_err(|e| compile_error(format!("stylesheet is not well-formed XML: {e}")))?;
    let root = tree.root_element();
    if root.tag_name().namespace() != Some(XSLT_NAMESPACE)
        || !matches!(root.tag_name().name(), "stylesheet" | "transform")
    {
        return Err(compile_error(format!(
            "root element '{}' is not an XSLT stylesheet",
            root.tag_name().name()
        )));
    }

    let mut context = NamespaceContext::empty();
    for ns in root.namespaces() {
        if let Some(prefix) = ns.name() {
            if prefix != "xml" && prefix != "xmlns" {
                context = context.register(prefix, ns.uri())?;
            }
        }
    }

    let mut templates = Vec::new();
    let mut imported = Vec::new();
    let mut param_defaults = IndexMap::new();

    for child in root.children().filter(|c| c.is_element()) {
        if is_xsl(&child, "template") {
            templates.push(compile_template(&child)?);
        } else if is_xsl(&child, "param") {
            let name = child
                .attribute("name")
                .ok_or_else(|| compile_error("xsl:param requires a name attribute"))?;
            param_defaults.insert(name.to_string(), param_default(&child)?);
        } else if is_xsl(&child, "import") || is_xsl(&child, "include") {
            let href = child
                .attribute("href")
                .ok_or_else(|| compile_error("xsl:import/include requires an href attribute"))?;
            // Resolver failures propagate unchanged so a missing import
            // surfaces as ResourceNotFound, not a re-wrapped compile error.
            let resolved = sources.resolve(href, Some(base))?;
            if resolved_chain.contains(&resolved.location) {
                return Err(compile_error(format!(
                    "cyclic import of '{href}': '{}' is already being compiled",
                    resolved.location
                )));
            }
            let nested_src = std::str::from_utf8(&resolved.bytes).map_err(|e| {
                compile_error(format!("imported stylesheet '{href}' is not UTF-8: {e}"))
            })?;
            resolved_chain.push(resolved.location.clone());
            let nested = compile_nested(nested_src, &resolved.location, sources, resolved_chain)?;
            resolved_chain.pop();
            if is_xsl(&child, "include") {
                templates.extend(nested.templates);
            } else {
                imported.extend(nested.templates);
            }
            for (name, value) in nested.param_defaults {
                param_defaults.entry(name).or_insert(value);
            }
            context = context.merge(&nested.context);
        } else if child.tag_name().namespace() == Some(XSLT_NAMESPACE) {
            // xsl:output and friends carry no meaning for this engine.
            log::debug!("ignoring top-level xsl:{}", child.tag_name().name());
        } else {
            return Err(compile_error(format!(
                "unexpected top-level element '{}'",
                child.tag_name().name()
            )));
        }
    }

    // Imports have lower precedence than the importing stylesheet.
    templates.extend(imported);
    Ok(Compiled {
        templates,
        param_defaults,
        context,
    })
}

fn param_default(node: &roxmltree::Node<'_, '_>) -> Result<String> {
    if let Some(select) = node.attribute("select") {
        return match parse_select(select)? {
            Select::Literal(s) => Ok(s),
            Select::Variable(_) | Select::Path(_) => Err(compile_error(
                "xsl:param defaults must be quoted string literals",
            )),
        };
    }
    Ok(node.text().unwrap_or_default().to_string())
}

fn compile_template(node: &roxmltree::Node<'_, '_>) -> Result<Template> {
    let pattern = node
        .attribute("match")
        .ok_or_else(|| compile_error("xsl:template without a match attribute"))?;
    Ok(Template {
        pattern: compile_pattern(node, pattern)?,
        body: compile_body(node)?,
    })
}

fn compile_pattern(node: &roxmltree::Node<'_, '_>, pattern: &str) -> Result<Pattern> {
    match pattern.trim() {
        "/" => Ok(Pattern::Root),
        "*" => Ok(Pattern::AnyElement),
        "text()" => Ok(Pattern::TextNodes),
        name => {
            if name.contains('/') || name.contains('[') {
                return Err(compile_error(format!(
                    "unsupported match pattern '{name}': only '/', '*', 'text()' and \
                     element names are supported"
                )));
            }
            let (prefix, local) = match name.split_once(':') {
                Some((p, l)) => (Some(p), l),
                None => (None, name),
            };
            if !crate::namespaces::is_ncname(local) {
                return Err(compile_error(format!(
                    "'{local}' is not a valid element name in a match pattern"
                )));
            }
            let uri = match prefix {
                Some(p) => Some(
                    node.lookup_namespace_uri(Some(p))
                        .ok_or_else(|| {
                            compile_error(format!("match pattern prefix '{p}' is not declared"))
                        })?
                        .to_string(),
                ),
                None => None,
            };
            Ok(Pattern::Name {
                uri,
                local: local.to_string(),
            })
        }
    }
}

fn compile_body(parent: &roxmltree::Node<'_, '_>) -> Result<Vec<Instruction>> {
    let mut body = Vec::new();
    for child in parent.children() {
        if child.is_text() {
            let text = child.text().unwrap_or_default();
            // Whitespace-only text between instructions is stylesheet
            // formatting, not output.
            if !text.trim().is_empty() {
                body.push(Instruction::Text(text.to_string()));
            }
            continue;
        }
        if !child.is_element() {
            continue;
        }
        if child.tag_name().namespace() == Some(XSLT_NAMESPACE) {
            body.push(compile_instruction(&child)?);
        } else {
            body.push(compile_literal(&child)?);
        }
    }
    Ok(body)
}

fn compile_instruction(node: &roxmltree::Node<'_, '_>) -> Result<Instruction> {
    match node.tag_name().name() {
        "value-of" => {
            let select = node
                .attribute("select")
                .ok_or_else(|| compile_error("xsl:value-of requires a select attribute"))?;
            Ok(Instruction::ValueOf(parse_select(select)?))
        }
        "text" => Ok(Instruction::Text(
            node.text().unwrap_or_default().to_string(),
        )),
        "apply-templates" => {
            if let Some(select) = node.attribute("select") {
                check_path(select)?;
                Ok(Instruction::ApplyTemplates {
                    select: Some(select.to_string()),
                })
            } else {
                Ok(Instruction::ApplyTemplates { select: None })
            }
        }
        "for-each" => {
            let select = node
                .attribute("select")
                .ok_or_else(|| compile_error("xsl:for-each requires a select attribute"))?;
            check_path(select)?;
            Ok(Instruction::ForEach {
                select: select.to_string(),
                body: compile_body(node)?,
            })
        }
        "if" => {
            let test = node
                .attribute("test")
                .ok_or_else(|| compile_error("xsl:if requires a test attribute"))?;
            Ok(Instruction::If {
                test: parse_condition(test)?,
                body: compile_body(node)?,
            })
        }
        "choose" => {
            let mut whens = Vec::new();
            let mut otherwise = Vec::new();
            for child in node.children().filter(|c| c.is_element()) {
                if is_xsl(&child, "when") {
                    let test = child
                        .attribute("test")
                        .ok_or_else(|| compile_error("xsl:when requires a test attribute"))?;
                    whens.push((parse_condition(test)?, compile_body(&child)?));
                } else if is_xsl(&child, "otherwise") {
                    otherwise = compile_body(&child)?;
                } else {
                    return Err(compile_error(format!(
                        "unexpected element '{}' inside xsl:choose",
                        child.tag_name().name()
                    )));
                }
            }
            Ok(Instruction::Choose { whens, otherwise })
        }
        "copy-of" => {
            let select = node
                .attribute("select")
                .ok_or_else(|| compile_error("xsl:copy-of requires a select attribute"))?;
            check_path(select)?;
            Ok(Instruction::CopyOf {
                select: select.to_string(),
            })
        }
        "message" => Ok(Instruction::Message {
            terminate: node.attribute("terminate") == Some("yes"),
            body: compile_body(node)?,
        }),
        other => Err(compile_error(format!(
            "unsupported instruction xsl:{other}"
        ))),
    }
}

fn compile_literal(node: &roxmltree::Node<'_, '_>) -> Result<Instruction> {
    let tag = node.tag_name();
    let name = match tag.namespace().and_then(|uri| node.lookup_prefix(uri)) {
        Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, tag.name()),
        _ => tag.name().to_string(),
    };

    // Declare namespaces introduced by this element (the XSLT namespace
    // itself never reaches the output).
    let mut namespaces = Vec::new();
    for ns in node.namespaces() {
        if ns.uri() == XSLT_NAMESPACE || ns.name() == Some("xml") || ns.name() == Some("xmlns") {
            continue;
        }
        // XSLT ancestors are not part of the output tree, so a literal
        // element directly under an instruction re-declares what it
        // inherits.
        let declared_on_parent = node
            .parent()
            .map(|p| {
                p.is_element()
                    && p.tag_name().namespace() != Some(XSLT_NAMESPACE)
                    && p.namespaces()
                        .any(|pn| pn.name() == ns.name() && pn.uri() == ns.uri())
            })
            .unwrap_or(false);
        if !declared_on_parent {
            let attr = match ns.name() {
                Some(prefix) => format!("xmlns:{prefix}"),
                None => "xmlns".to_string(),
            };
            namespaces.push((attr, ns.uri().to_string()));
        }
    }
    namespaces.sort();

    let mut attrs = Vec::new();
    for attr in node.attributes() {
        if attr.namespace() == Some(XSLT_NAMESPACE) {
            continue;
        }
        let attr_name = match attr.namespace().and_then(|uri| node.lookup_prefix(uri)) {
            Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, attr.name()),
            _ => attr.name().to_string(),
        };
        attrs.push((attr_name, parse_avt(attr.value())?));
    }

    Ok(Instruction::Literal {
        name,
        namespaces,
        attrs,
        body: compile_body(node)?,
    })
}

fn parse_select(select: &str) -> Result<Select> {
    let select = select.trim();
    if let Some(name) = select.strip_prefix('$') {
        if !crate::namespaces::is_ncname(name) {
            return Err(compile_error(format!(
                "'{select}' is not a valid variable reference"
            )));
        }
        return Ok(Select::Variable(name.to_string()));
    }
    if let Some(inner) = select
        .strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
        .or_else(|| select.strip_prefix('"').and_then(|r| r.strip_suffix('"')))
    {
        return Ok(Select::Literal(inner.to_string()));
    }
    check_path(select)?;
    Ok(Select::Path(select.to_string()))
}

fn parse_condition(test: &str) -> Result<Condition> {
    let test = test.trim();
    if let Some(inner) = test.strip_prefix("not(").and_then(|r| r.strip_suffix(')')) {
        check_path(inner)?;
        return Ok(Condition::NotExists(inner.trim().to_string()));
    }
    if let Some((lhs, rhs)) = test.split_once('=') {
        let rhs = rhs.trim();
        let literal = rhs
            .strip_prefix('\'')
            .and_then(|r| r.strip_suffix('\''))
            .or_else(|| rhs.strip_prefix('"').and_then(|r| r.strip_suffix('"')))
            .ok_or_else(|| {
                compile_error(format!(
                    "unsupported test '{test}': comparison value must be a quoted literal"
                ))
            })?;
        return Ok(Condition::Equals(
            parse_select(lhs.trim())?,
            literal.to_string(),
        ));
    }
    check_path(test)?;
    Ok(Condition::Exists(test.to_string()))
}

/// Split an attribute value template into literal and `{expr}` parts.
/// `{{` and `}}` escape literal braces.
fn parse_avt(value: &str) -> Result<Vec<AvtPart>> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                if !literal.is_empty() {
                    parts.push(AvtPart::Literal(std::mem::take(&mut literal)));
                }
                let mut expr = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => expr.push(c),
                        None => {
                            return Err(compile_error(format!(
                                "unterminated '{{' in attribute value template '{value}'"
                            )))
                        }
                    }
                }
                parts.push(AvtPart::Expr(parse_select(&expr)?));
            }
            '}' => {
                return Err(compile_error(format!(
                    "unmatched '}}' in attribute value template '{value}'"
                )))
            }
            _ => literal.push(c),
        }
    }
    if !literal.is_empty() {
        parts.push(AvtPart::Literal(literal));
    }
    Ok(parts)
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

fn execution_error(message: impl Into<String>) -> Error {
    Error::TransformExecution(message.into())
}

fn execute(
    compiled: &Compiled,
    tree: &roxmltree::Document<'_>,
    params: &IndexMap<String, String>,
) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    apply_node(compiled, tree.root(), params, &mut writer)?;
    String::from_utf8(writer.into_inner())
        .map_err(|e| execution_error(format!("non-UTF-8 output: {e}")))
}

/// Apply the best-matching template to one node, falling back to the
/// built-in rules (recurse through elements, copy text through).
fn apply_node(
    compiled: &Compiled,
    node: roxmltree::Node<'_, '_>,
    params: &IndexMap<String, String>,
    writer: &mut Writer<Vec<u8>>,
) -> Result<()> {
    if let Some(template) = find_template(compiled, &node) {
        return run_body(compiled, &template.body, node, params, writer);
    }
    if node.is_text() {
        if let Some(text) = node.text() {
            writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(|e| execution_error(format!("write failed: {e}")))?;
        }
        return Ok(());
    }
    // Built-in rule for the root and unmatched elements.
    for child in node.children() {
        if child.is_element() || child.is_text() {
            apply_node(compiled, child, params, writer)?;
        }
    }
    Ok(())
}

fn find_template<'a>(compiled: &'a Compiled, node: &roxmltree::Node<'_, '_>) -> Option<&'a Template> {
    if node.is_text() {
        return compiled
            .templates
            .iter()
            .find(|t| t.pattern == Pattern::TextNodes);
    }
    if node.is_root() {
        return compiled.templates.iter().find(|t| t.pattern == Pattern::Root);
    }
    if !node.is_element() {
        return None;
    }
    // A name match beats a wildcard regardless of declaration order.
    compiled
        .templates
        .iter()
        .find(|t| match &t.pattern {
            Pattern::Name { uri, local } => {
                node.tag_name().name() == local && node.tag_name().namespace() == uri.as_deref()
            }
            _ => false,
        })
        .or_else(|| {
            compiled
                .templates
                .iter()
                .find(|t| t.pattern == Pattern::AnyElement)
        })
}

fn run_body(
    compiled: &Compiled,
    body: &[Instruction],
    node: roxmltree::Node<'_, '_>,
    params: &IndexMap<String, String>,
    writer: &mut Writer<Vec<u8>>,
) -> Result<()> {
    for instruction in body {
        run_instruction(compiled, instruction, node, params, writer)?;
    }
    Ok(())
}

fn run_instruction(
    compiled: &Compiled,
    instruction: &Instruction,
    node: roxmltree::Node<'_, '_>,
    params: &IndexMap<String, String>,
    writer: &mut Writer<Vec<u8>>,
) -> Result<()> {
    match instruction {
        Instruction::Text(text) => writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(|e| execution_error(format!("write failed: {e}"))),
        Instruction::ValueOf(select) => {
            let value = string_value(compiled, select, node, params)?;
            writer
                .write_event(Event::Text(BytesText::new(&value)))
                .map_err(|e| execution_error(format!("write failed: {e}")))
        }
        Instruction::ApplyTemplates { select } => {
            match select {
                Some(path) => {
                    for value in xpath::evaluate_at(node, path, &compiled.context)? {
                        match value {
                            Value::Element(child) => {
                                apply_node(compiled, child, params, writer)?
                            }
                            Value::Scalar(text) => writer
                                .write_event(Event::Text(BytesText::new(&text)))
                                .map_err(|e| execution_error(format!("write failed: {e}")))?,
                        }
                    }
                }
                None => {
                    for child in node.children() {
                        if child.is_element() || child.is_text() {
                            apply_node(compiled, child, params, writer)?;
                        }
                    }
                }
            }
            Ok(())
        }
        Instruction::ForEach { select, body } => {
            for value in xpath::evaluate_at(node, select, &compiled.context)? {
                match value {
                    Value::Element(child) => run_body(compiled, body, child, params, writer)?,
                    Value::Scalar(_) => {
                        return Err(execution_error(format!(
                            "xsl:for-each select '{select}' yields scalar values"
                        )))
                    }
                }
            }
            Ok(())
        }
        Instruction::If { test, body } => {
            if check_condition(compiled, test, node, params)? {
                run_body(compiled, body, node, params, writer)?;
            }
            Ok(())
        }
        Instruction::Choose { whens, otherwise } => {
            for (test, body) in whens {
                if check_condition(compiled, test, node, params)? {
                    return run_body(compiled, body, node, params, writer);
                }
            }
            run_body(compiled, otherwise, node, params, writer)
        }
        Instruction::CopyOf { select } => {
            for value in xpath::evaluate_at(node, select, &compiled.context)? {
                match value {
                    Value::Element(child) => {
                        let xml = serialize_subtree(&child)
                            .map_err(|e| execution_error(format!("copy-of failed: {e}")))?;
                        writer
                            .write_event(Event::Text(BytesText::from_escaped(xml.as_str())))
                            .map_err(|e| execution_error(format!("write failed: {e}")))?;
                    }
                    Value::Scalar(text) => writer
                        .write_event(Event::Text(BytesText::new(&text)))
                        .map_err(|e| execution_error(format!("write failed: {e}")))?,
                }
            }
            Ok(())
        }
        Instruction::Message { terminate, body } => {
            let mut nested = Writer::new(Vec::new());
            run_body(compiled, body, node, params, &mut nested)?;
            let message = String::from_utf8(nested.into_inner())
                .map_err(|e| execution_error(format!("non-UTF-8 message: {e}")))?;
            if *terminate {
                return Err(execution_error(format!(
                    "terminated by xsl:message: {message}"
                )));
            }
            log::warn!("xsl:message: {message}");
            Ok(())
        }
        Instruction::Literal {
            name,
            namespaces,
            attrs,
            body,
        } => {
            let mut start = BytesStart::new(name.as_str());
            for (attr, uri) in namespaces {
                start.push_attribute((attr.as_str(), uri.as_str()));
            }
            for (attr_name, parts) in attrs {
                let mut value = String::new();
                for part in parts {
                    match part {
                        AvtPart::Literal(s) => value.push_str(s),
                        AvtPart::Expr(select) => {
                            value.push_str(&string_value(compiled, select, node, params)?)
                        }
                    }
                }
                start.push_attribute((attr_name.as_str(), value.as_str()));
            }
            if body.is_empty() {
                return writer
                    .write_event(Event::Empty(start))
                    .map_err(|e| execution_error(format!("write failed: {e}")));
            }
            writer
                .write_event(Event::Start(start))
                .map_err(|e| execution_error(format!("write failed: {e}")))?;
            run_body(compiled, body, node, params, writer)?;
            writer
                .write_event(Event::End(BytesEnd::new(name.as_str())))
                .map_err(|e| execution_error(format!("write failed: {e}")))
        }
    }
}

fn string_value(
    compiled: &Compiled,
    select: &Select,
    node: roxmltree::Node<'_, '_>,
    params: &IndexMap<String, String>,
) -> Result<String> {
    match select {
        Select::Variable(name) => params
            .get(name)
            .cloned()
            .ok_or_else(|| execution_error(format!("parameter '${name}' is not bound"))),
        Select::Literal(s) => Ok(s.clone()),
        Select::Path(path) => {
            // "." is the string value of the current node, whatever its kind.
            if path == "." {
                return Ok(node_text(node));
            }
            let values = xpath::evaluate_at(node, path, &compiled.context)?;
            Ok(match values.into_iter().next() {
                Some(Value::Scalar(s)) => s,
                Some(Value::Element(e)) => xpath::text_of(&e),
                None => String::new(),
            })
        }
    }
}

fn node_text(node: roxmltree::Node<'_, '_>) -> String {
    if node.is_text() {
        node.text().unwrap_or_default().to_string()
    } else {
        xpath::text_of(&node)
    }
}

fn check_condition(
    compiled: &Compiled,
    test: &Condition,
    node: roxmltree::Node<'_, '_>,
    params: &IndexMap<String, String>,
) -> Result<bool> {
    match test {
        Condition::Exists(path) => {
            Ok(!xpath::evaluate_at(node, path, &compiled.context)?.is_empty())
        }
        Condition::NotExists(path) => {
            Ok(xpath::evaluate_at(node, path, &compiled.context)?.is_empty())
        }
        Condition::Equals(select, literal) => {
            Ok(string_value(compiled, select, node, params)? == *literal)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{BundleSources, DUMMY};

    const IDENTITY_ISH: &str = r#"<xsl:stylesheet version="1.0"
        xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
      <xsl:template match="/">
        <out><xsl:apply-templates/></out>
      </xsl:template>
    </xsl:stylesheet>"#;

    #[test]
    fn test_simple_transform() {
        let xsl = Stylesheet::from_string(IDENTITY_ISH);
        let doc = Document::from_string("<r>hello</r>").unwrap();
        let out = xsl.apply_to(&doc).unwrap();
        assert_eq!(out.render(), "<out>hello</out>");
    }

    #[test]
    fn test_value_of_and_for_each() {
        let xsl = Stylesheet::from_string(
            r#"<xsl:stylesheet version="1.0"
                xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
              <xsl:template match="/">
                <names>
                  <xsl:for-each select="/team/member">
                    <name><xsl:value-of select="@id"/></name>
                  </xsl:for-each>
                </names>
              </xsl:template>
            </xsl:stylesheet>"#,
        );
        let doc =
            Document::from_string("<team><member id=\"a\"/><member id=\"b\"/></team>").unwrap();
        let out = xsl.apply_to(&doc).unwrap();
        assert_eq!(out.render(), "<names><name>a</name><name>b</name></names>");
    }

    #[test]
    fn test_parameters_override_defaults() {
        let xsl = Stylesheet::from_string(
            r#"<xsl:stylesheet version="1.0"
                xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
              <xsl:param name="who" select="'nobody'"/>
              <xsl:template match="/">
                <greeting><xsl:value-of select="$who"/></greeting>
              </xsl:template>
            </xsl:stylesheet>"#,
        );
        let doc = Document::from_string("<r/>").unwrap();

        let default = xsl.apply_to(&doc).unwrap();
        assert_eq!(default.render(), "<greeting>nobody</greeting>");

        let bound = xsl.clone().with_param("who", "world");
        assert_eq!(bound.apply_to(&doc).unwrap().render(), "<greeting>world</greeting>");
    }

    #[test]
    fn test_import_with_dummy_sources_fails_not_found() {
        let xsl = Stylesheet::from_string(
            r#"<xsl:stylesheet version="1.0"
                xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
              <xsl:import href="lib.xsl"/>
              <xsl:template match="/"><out/></xsl:template>
            </xsl:stylesheet>"#,
        );
        let doc = Document::from_string("<r/>").unwrap();
        let result = xsl.apply_to(&doc);
        assert!(matches!(result, Err(Error::ResourceNotFound { .. })));
    }

    #[test]
    fn test_import_resolved_through_bundle() {
        let lib = r#"<xsl:stylesheet version="1.0"
            xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
          <xsl:template match="item"><entry><xsl:value-of select="."/></entry></xsl:template>
        </xsl:stylesheet>"#;
        let main = r#"<xsl:stylesheet version="1.0"
            xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
          <xsl:import href="lib.xsl"/>
          <xsl:template match="/"><list><xsl:apply-templates select="/r/item"/></list></xsl:template>
        </xsl:stylesheet>"#;
        let xsl = Stylesheet::from_string(main)
            .with_sources(Arc::new(BundleSources::new().with_resource("lib.xsl", lib)));
        let doc = Document::from_string("<r><item>x</item></r>").unwrap();
        assert_eq!(xsl.apply_to(&doc).unwrap().render(), "<list><entry>x</entry></list>");
    }

    #[test]
    fn test_cyclic_import_is_compile_error() {
        let alpha = r#"<xsl:stylesheet version="1.0"
            xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
          <xsl:import href="beta.xsl"/>
          <xsl:template match="/"><out/></xsl:template>
        </xsl:stylesheet>"#;
        let beta = r#"<xsl:stylesheet version="1.0"
            xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
          <xsl:import href="alpha.xsl"/>
        </xsl:stylesheet>"#;
        let xsl = Stylesheet::from_string(alpha).with_sources(Arc::new(
            BundleSources::new()
                .with_resource("alpha.xsl", alpha)
                .with_resource("beta.xsl", beta),
        ));
        let doc = Document::from_string("<r/>").unwrap();
        match xsl.apply_to(&doc) {
            Err(Error::StylesheetCompile(msg)) => assert!(msg.contains("cyclic")),
            other => panic!("expected StylesheetCompile, got {other:?}"),
        }
    }

    #[test]
    fn test_self_import_is_compile_error() {
        let main = r#"<xsl:stylesheet version="1.0"
            xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
          <xsl:include href="me.xsl"/>
        </xsl:stylesheet>"#;
        let me = r#"<xsl:stylesheet version="1.0"
            xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
          <xsl:include href="me.xsl"/>
        </xsl:stylesheet>"#;
        let xsl = Stylesheet::from_string(main)
            .with_sources(Arc::new(BundleSources::new().with_resource("me.xsl", me)));
        let doc = Document::from_string("<r/>").unwrap();
        assert!(matches!(
            xsl.apply_to(&doc),
            Err(Error::StylesheetCompile(_))
        ));
    }

    #[test]
    fn test_malformed_stylesheet_is_compile_error() {
        let xsl = Stylesheet::from_string("<xsl:stylesheet");
        let doc = Document::from_string("<r/>").unwrap();
        assert!(matches!(
            xsl.apply_to(&doc),
            Err(Error::StylesheetCompile(_))
        ));
    }

    #[test]
    fn test_non_stylesheet_root_is_compile_error() {
        let xsl = Stylesheet::from_string("<not-a-stylesheet/>");
        let doc = Document::from_string("<r/>").unwrap();
        assert!(matches!(
            xsl.apply_to(&doc),
            Err(Error::StylesheetCompile(_))
        ));
    }

    #[test]
    fn test_message_terminate_is_execution_error() {
        let xsl = Stylesheet::from_string(
            r#"<xsl:stylesheet version="1.0"
                xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
              <xsl:template match="/">
                <xsl:message terminate="yes">boom</xsl:message>
              </xsl:template>
            </xsl:stylesheet>"#,
        );
        let doc = Document::from_string("<r/>").unwrap();
        match xsl.apply_to(&doc) {
            Err(Error::TransformExecution(msg)) => assert!(msg.contains("boom")),
            other => panic!("expected TransformExecution, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let chain = TransformChain::new();
        let doc = Document::from_string("<r><a>1</a></r>").unwrap();
        let out = chain.apply_to(&doc).unwrap();
        assert_eq!(out, doc);
    }

    #[test]
    fn test_chain_equals_sequential_application() {
        let first = Stylesheet::from_string(IDENTITY_ISH);
        let second = Stylesheet::from_string(
            r#"<xsl:stylesheet version="1.0"
                xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
              <xsl:template match="/"><wrapped><xsl:copy-of select="/out"/></wrapped></xsl:template>
            </xsl:stylesheet>"#,
        );
        let doc = Document::from_string("<r>t</r>").unwrap();

        let chained = TransformChain::new()
            .then(first.boxed())
            .then(second.boxed())
            .apply_to(&doc)
            .unwrap();
        let sequential = second.apply_to(&first.apply_to(&doc).unwrap()).unwrap();
        assert_eq!(chained, sequential);
        assert_eq!(chained.render(), "<wrapped><out>t</out></wrapped>");
    }

    #[test]
    fn test_chain_short_circuits() {
        let failing = Stylesheet::from_string("<broken");
        let counting = Stylesheet::from_string(IDENTITY_ISH);
        let chain = TransformChain::new()
            .then(failing.boxed())
            .then(counting.boxed());
        let doc = Document::from_string("<r/>").unwrap();
        assert!(matches!(
            chain.apply_to(&doc),
            Err(Error::StylesheetCompile(_))
        ));
    }

    #[test]
    fn test_chain_with_param_reaches_every_member() {
        let greet = r#"<xsl:stylesheet version="1.0"
            xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
          <xsl:param name="who" select="'x'"/>
          <xsl:template match="/">
            <g><xsl:value-of select="$who"/></g>
          </xsl:template>
        </xsl:stylesheet>"#;
        let chain = TransformChain::new()
            .then(Stylesheet::from_string(greet).boxed())
            .with_param("who", ParamValue::from("team"));
        let doc = Document::from_string("<r/>").unwrap();
        assert_eq!(chain.apply_to(&doc).unwrap().render(), "<g>team</g>");
    }

    #[test]
    fn test_choose_and_if() {
        let xsl = Stylesheet::from_string(
            r#"<xsl:stylesheet version="1.0"
                xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
              <xsl:template match="/">
                <out>
                  <xsl:if test="/r/a"><has-a/></xsl:if>
                  <xsl:choose>
                    <xsl:when test="/r/b"><b-branch/></xsl:when>
                    <xsl:otherwise><no-b/></xsl:otherwise>
                  </xsl:choose>
                </out>
              </xsl:template>
            </xsl:stylesheet>"#,
        );
        let doc = Document::from_string("<r><a/></r>").unwrap();
        assert_eq!(xsl.apply_to(&doc).unwrap().render(), "<out><has-a/><no-b/></out>");
    }

    #[test]
    fn test_attribute_value_template() {
        let xsl = Stylesheet::from_string(
            r#"<xsl:stylesheet version="1.0"
                xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
              <xsl:template match="/">
                <out id="{/r/@id}" fixed="v"/>
              </xsl:template>
            </xsl:stylesheet>"#,
        );
        let doc = Document::from_string("<r id=\"seven\"/>").unwrap();
        assert_eq!(xsl.apply_to(&doc).unwrap().render(), "<out fixed=\"v\" id=\"seven\"/>");
    }

    #[test]
    fn test_from_file_applies() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("wrap.xsl");
        std::fs::write(&path, IDENTITY_ISH).unwrap();
        let xsl = Stylesheet::from_file(&path).unwrap();
        let doc = Document::from_string("<r>file</r>").unwrap();
        assert_eq!(xsl.apply_to(&doc).unwrap().render(), "<out>file</out>");
    }

    #[test]
    fn test_dummy_is_default_sources() {
        let xsl = Stylesheet::from_string(IDENTITY_ISH);
        // No imports, so the DUMMY resolver is never consulted.
        let _ = DUMMY;
        let doc = Document::from_string("<r/>").unwrap();
        assert!(xsl.apply_to(&doc).is_ok());
    }

    #[test]
    fn test_param_value_display() {
        assert_eq!(ParamValue::from("x").to_string(), "x");
        assert_eq!(ParamValue::from(3.0).to_string(), "3");
        assert_eq!(ParamValue::from(3.5).to_string(), "3.5");
        assert_eq!(ParamValue::from(true).to_string(), "true");
    }
}
