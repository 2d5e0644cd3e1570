//! Internal XPath 1.0 subset evaluator
//!
//! Location paths over a roxmltree tree, with prefixes resolved through the
//! active [`NamespaceContext`]. Supports absolute/relative paths, `//`,
//! `.` and `..`, name tests (optionally prefixed), `*`, `@attr` and
//! `text()` terminal steps, and positional/attribute/child-value
//! predicates. Everything outside the subset fails with
//! [`Error::InvalidExpression`]; a well-formed expression that matches
//! nothing yields an empty sequence.

use crate::error::{Error, Result};
use crate::namespaces::{is_ncname, NamespaceContext};
use roxmltree::Node;

/// One match produced by evaluation.
pub(crate) enum Value<'a, 'input> {
    /// An element node
    Element(Node<'a, 'input>),
    /// A text or attribute value
    Scalar(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Axis {
    Child,
    Descendant,
    SelfAxis,
    Parent,
}

#[derive(Debug, Clone, PartialEq)]
enum Test {
    Name {
        prefix: Option<String>,
        local: String,
    },
    Wildcard,
    Text,
    Attribute {
        prefix: Option<String>,
        local: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Index(usize),
    Last,
    HasAttr(String),
    AttrEquals(String, String),
    ChildEquals(String, String),
}

#[derive(Debug, Clone)]
struct Step {
    axis: Axis,
    test: Test,
    predicates: Vec<Predicate>,
}

fn invalid(expression: &str, message: impl Into<String>) -> Error {
    Error::InvalidExpression {
        expression: expression.to_string(),
        message: message.into(),
    }
}

/// Check that `expr` is within the supported subset without evaluating it.
pub(crate) fn validate(expr: &str) -> Result<()> {
    parse(expr).map(|_| ())
}

/// Evaluate `expr` against the document, starting at the document root.
pub(crate) fn evaluate<'a, 'input>(
    doc: &'a roxmltree::Document<'input>,
    expr: &str,
    ctx: &NamespaceContext,
) -> Result<Vec<Value<'a, 'input>>> {
    evaluate_at(doc.root(), expr, ctx)
}

/// Evaluate `expr` relative to `start`. Absolute expressions still begin
/// at the document root.
pub(crate) fn evaluate_at<'a, 'input>(
    start: Node<'a, 'input>,
    expr: &str,
    ctx: &NamespaceContext,
) -> Result<Vec<Value<'a, 'input>>> {
    let path = parse(expr)?;
    let origin = if path.absolute {
        start.document().root()
    } else {
        start
    };
    let steps = path.steps;
    let mut current: Vec<Node<'a, 'input>> = vec![origin];
    let mut scalars: Vec<Value<'a, 'input>> = Vec::new();

    for (idx, step) in steps.iter().enumerate() {
        let terminal = idx == steps.len() - 1;
        match &step.test {
            Test::Text => {
                if !terminal {
                    return Err(invalid(expr, "text() must be the final step"));
                }
                for node in &current {
                    for child in node.children().filter(|c| c.is_text()) {
                        if let Some(text) = child.text() {
                            scalars.push(Value::Scalar(text.to_string()));
                        }
                    }
                }
                return Ok(scalars);
            }
            Test::Attribute { prefix, local } => {
                if !terminal {
                    return Err(invalid(expr, "attribute steps must be the final step"));
                }
                let uri = resolve_prefix(expr, prefix.as_deref(), ctx)?;
                for node in &current {
                    for attr in node.attributes() {
                        let matches = (local == "*" || attr.name() == local)
                            && attr.namespace() == uri.as_deref();
                        if matches {
                            scalars.push(Value::Scalar(attr.value().to_string()));
                        }
                    }
                }
                return Ok(scalars);
            }
            _ => {
                current = apply_element_step(expr, &current, step, ctx)?;
            }
        }
    }

    Ok(current.into_iter().map(Value::Element).collect())
}

/// Apply one element-producing step to every context node.
fn apply_element_step<'a, 'input>(
    expr: &str,
    context_nodes: &[Node<'a, 'input>],
    step: &Step,
    ctx: &NamespaceContext,
) -> Result<Vec<Node<'a, 'input>>> {
    let mut output = Vec::new();
    for node in context_nodes {
        let candidates: Vec<Node<'a, 'input>> = match step.axis {
            Axis::Child => node.children().filter(|c| c.is_element()).collect(),
            Axis::Descendant => node
                .descendants()
                .skip(1)
                .filter(|c| c.is_element())
                .collect(),
            Axis::SelfAxis => vec![*node],
            Axis::Parent => node.parent().into_iter().collect(),
        };
        let mut matched: Vec<Node<'a, 'input>> = Vec::new();
        for candidate in candidates {
            if matches_test(expr, &candidate, &step.test, ctx)? {
                matched.push(candidate);
            }
        }
        // Positional predicates are relative to each context node's own
        // match list, per XPath semantics.
        for predicate in &step.predicates {
            matched = apply_predicate(expr, matched, predicate, ctx)?;
        }
        output.extend(matched);
    }
    Ok(output)
}

fn matches_test(
    expr: &str,
    node: &Node<'_, '_>,
    test: &Test,
    ctx: &NamespaceContext,
) -> Result<bool> {
    match test {
        Test::Wildcard => Ok(node.is_element()),
        Test::Name { prefix, local } => {
            if !node.is_element() {
                return Ok(false);
            }
            let uri = resolve_prefix(expr, prefix.as_deref(), ctx)?;
            Ok(node.tag_name().name() == local && node.tag_name().namespace() == uri.as_deref())
        }
        _ => Ok(false),
    }
}

/// Resolve a name-test prefix to a namespace URI.
///
/// No prefix means no namespace, per XPath 1.0. An unknown prefix is an
/// expression error (it cannot be resolved, not merely unmatched).
fn resolve_prefix(
    expr: &str,
    prefix: Option<&str>,
    ctx: &NamespaceContext,
) -> Result<Option<String>> {
    match prefix {
        None => Ok(None),
        Some(p) => match ctx.uri(p) {
            Some(uri) => Ok(Some(uri.to_string())),
            None => Err(invalid(
                expr,
                format!("prefix '{p}' is not bound in the namespace context"),
            )),
        },
    }
}

fn apply_predicate<'a, 'input>(
    expr: &str,
    matched: Vec<Node<'a, 'input>>,
    predicate: &Predicate,
    ctx: &NamespaceContext,
) -> Result<Vec<Node<'a, 'input>>> {
    Ok(match predicate {
        Predicate::Index(n) => matched.into_iter().skip(n - 1).take(1).collect(),
        Predicate::Last => matched.into_iter().last().into_iter().collect(),
        Predicate::HasAttr(name) => matched
            .into_iter()
            .filter(|n| n.attributes().any(|a| a.name() == name.as_str()))
            .collect(),
        Predicate::AttrEquals(name, value) => matched
            .into_iter()
            .filter(|n| {
                n.attributes()
                    .any(|a| a.name() == name.as_str() && a.value() == value)
            })
            .collect(),
        Predicate::ChildEquals(name, value) => {
            let mut kept = Vec::new();
            for node in matched {
                let step = Step {
                    axis: Axis::Child,
                    test: parse_name_test(expr, name)?,
                    predicates: Vec::new(),
                };
                let children = apply_element_step(expr, &[node], &step, ctx)?;
                if children.iter().any(|c| text_of(c) == *value) {
                    kept.push(node);
                }
            }
            kept
        }
    })
}

/// The concatenated text content of an element.
pub(crate) fn text_of(node: &Node<'_, '_>) -> String {
    let mut out = String::new();
    for descendant in node.descendants() {
        if descendant.is_text() {
            if let Some(text) = descendant.text() {
                out.push_str(text);
            }
        }
    }
    out
}

#[derive(Debug, Clone)]
struct Path {
    absolute: bool,
    steps: Vec<Step>,
}

fn parse(expr: &str) -> Result<Path> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err(invalid(expr, "empty expression"));
    }
    let mut steps = Vec::new();
    for raw in split_steps(expr)? {
        steps.push(parse_step(expr, &raw)?);
    }
    if steps.is_empty() {
        return Err(invalid(expr, "expression has no steps"));
    }
    Ok(Path {
        absolute: trimmed.starts_with('/'),
        steps,
    })
}

/// Split a path on `/`, respecting predicate brackets; `//` becomes a
/// descendant marker step.
fn split_steps(expr: &str) -> Result<Vec<String>> {
    let path = expr.trim();
    let mut parts: Vec<String> = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    let mut pending_descendant = path.starts_with("//");

    let rest: &str = if let Some(stripped) = path.strip_prefix("//") {
        stripped
    } else if let Some(stripped) = path.strip_prefix('/') {
        stripped
    } else {
        path
    };
    let mut chars = rest.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '[' => {
                depth += 1;
                current.push(c);
            }
            ']' => {
                depth -= 1;
                if depth < 0 {
                    return Err(invalid(expr, "unbalanced ']' in predicate"));
                }
                current.push(c);
            }
            '/' if depth == 0 => {
                if current.is_empty() {
                    return Err(invalid(expr, "empty step"));
                }
                if pending_descendant {
                    parts.push(format!("//{current}"));
                    pending_descendant = false;
                } else {
                    parts.push(std::mem::take(&mut current));
                }
                current = String::new();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    pending_descendant = true;
                }
            }
            _ => current.push(c),
        }
    }
    if depth != 0 {
        return Err(invalid(expr, "unterminated predicate"));
    }
    if current.is_empty() {
        return Err(invalid(expr, "expression ends with '/'"));
    }
    if pending_descendant {
        parts.push(format!("//{current}"));
    } else {
        parts.push(current);
    }
    Ok(parts)
}

fn parse_step(expr: &str, raw: &str) -> Result<Step> {
    let (axis, rest) = if let Some(stripped) = raw.strip_prefix("//") {
        (Axis::Descendant, stripped)
    } else {
        (Axis::Child, raw)
    };

    if rest == "." {
        return Ok(Step {
            axis: Axis::SelfAxis,
            test: Test::Wildcard,
            predicates: Vec::new(),
        });
    }
    if rest == ".." {
        return Ok(Step {
            axis: Axis::Parent,
            test: Test::Wildcard,
            predicates: Vec::new(),
        });
    }

    // Peel trailing predicates.
    let mut predicates = Vec::new();
    let mut name_part = rest;
    if let Some(bracket) = rest.find('[') {
        if !rest.ends_with(']') {
            return Err(invalid(expr, "unterminated predicate"));
        }
        name_part = &rest[..bracket];
        for raw_pred in split_predicates(&rest[bracket..]) {
            predicates.push(parse_predicate(expr, &raw_pred)?);
        }
    }

    let test = if name_part == "text()" {
        Test::Text
    } else if let Some(attr) = name_part.strip_prefix('@') {
        let (prefix, local) = split_qname(expr, attr)?;
        Test::Attribute { prefix, local }
    } else if name_part == "*" {
        Test::Wildcard
    } else {
        parse_name_test(expr, name_part)?
    };

    if matches!(test, Test::Text | Test::Attribute { .. }) {
        if !predicates.is_empty() {
            return Err(invalid(expr, "predicates on text()/attribute steps are not supported"));
        }
        if axis == Axis::Descendant {
            return Err(invalid(expr, "'//' cannot precede a text()/attribute step"));
        }
    }

    Ok(Step {
        axis,
        test,
        predicates,
    })
}

fn parse_name_test(expr: &str, name: &str) -> Result<Test> {
    if name == "*" {
        return Ok(Test::Wildcard);
    }
    let (prefix, local) = split_qname(expr, name)?;
    Ok(Test::Name { prefix, local })
}

fn split_qname(expr: &str, name: &str) -> Result<(Option<String>, String)> {
    let (prefix, local) = match name.split_once(':') {
        Some((p, l)) => (Some(p.to_string()), l.to_string()),
        None => (None, name.to_string()),
    };
    if let Some(ref p) = prefix {
        if !is_ncname(p) {
            return Err(invalid(expr, format!("'{p}' is not a valid prefix")));
        }
    }
    if local != "*" && !is_ncname(&local) {
        return Err(invalid(expr, format!("'{local}' is not a valid name test")));
    }
    Ok((prefix, local))
}

/// Split `[a][b]...` into the inner predicate strings.
fn split_predicates(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in raw.chars() {
        match c {
            '[' => {
                if depth > 0 {
                    current.push(c);
                }
                depth += 1;
            }
            ']' => {
                depth -= 1;
                if depth > 0 {
                    current.push(c);
                } else {
                    parts.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    parts
}

fn parse_predicate(expr: &str, raw: &str) -> Result<Predicate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(invalid(expr, "empty predicate"));
    }
    if raw == "last()" {
        return Ok(Predicate::Last);
    }
    if let Ok(index) = raw.parse::<usize>() {
        if index == 0 {
            return Err(invalid(expr, "positions are 1-based"));
        }
        return Ok(Predicate::Index(index));
    }
    if let Some((lhs, rhs)) = raw.split_once('=') {
        let lhs = lhs.trim();
        let rhs = rhs.trim();
        let value = rhs
            .strip_prefix('\'')
            .and_then(|r| r.strip_suffix('\''))
            .or_else(|| rhs.strip_prefix('"').and_then(|r| r.strip_suffix('"')))
            .ok_or_else(|| invalid(expr, "comparison value must be a quoted literal"))?;
        if let Some(attr) = lhs.strip_prefix('@') {
            return Ok(Predicate::AttrEquals(attr.to_string(), value.to_string()));
        }
        return Ok(Predicate::ChildEquals(lhs.to_string(), value.to_string()));
    }
    if let Some(attr) = raw.strip_prefix('@') {
        if is_ncname(attr) {
            return Ok(Predicate::HasAttr(attr.to_string()));
        }
    }
    Err(invalid(expr, format!("unsupported predicate '[{raw}]'")))
}
