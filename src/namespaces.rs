//! XML namespace handling
//!
//! This module provides the [`NamespaceContext`] used by every XPath query
//! and validation run in the crate, and the [`NamespaceBindings`] trait that
//! lets contexts absorb bindings from other sources (other contexts,
//! documents) through [`NamespaceContext::merge`].

use crate::error::{Error, Result};
use crate::{XHTML_NAMESPACE, XMLNS_NAMESPACE, XML_NAMESPACE, XSD_NAMESPACE, XSI_NAMESPACE};
use crate::{SVG_NAMESPACE, XSLT_NAMESPACE};
use std::fmt;

/// Anything that can expose an ordered set of prefix-to-URI bindings.
///
/// Implemented by [`NamespaceContext`] itself and by
/// [`Document`](crate::Document), whose bindings are the namespace
/// declarations in scope on its root element.
pub trait NamespaceBindings {
    /// The bindings, in registration/declaration order.
    fn namespace_bindings(&self) -> Vec<(String, String)>;
}

/// Immutable namespace context: an ordered sequence of prefix-to-URI
/// bindings.
///
/// A prefix may be bound to several URIs; lookups return the
/// first-registered one. All "mutating" operations return a new context.
/// The reserved `xml` and `xmlns` prefixes resolve even in an empty
/// context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceContext {
    /// Ordered (prefix, uri) pairs. Deliberately not a map: a prefix bound
    /// twice keeps both bindings, first one wins on lookup.
    bindings: Vec<(String, String)>,
}

impl NamespaceContext {
    /// Create a context with the conventional prefixes pre-bound:
    ///
    /// ```text
    /// xhtml: http://www.w3.org/1999/xhtml
    /// xs:    http://www.w3.org/2001/XMLSchema
    /// xsi:   http://www.w3.org/2001/XMLSchema-instance
    /// xsl:   http://www.w3.org/1999/XSL/Transform
    /// svg:   http://www.w3.org/2000/svg
    /// ```
    pub fn new() -> Self {
        Self {
            bindings: vec![
                ("xhtml".to_string(), XHTML_NAMESPACE.to_string()),
                ("xs".to_string(), XSD_NAMESPACE.to_string()),
                ("xsi".to_string(), XSI_NAMESPACE.to_string()),
                ("xsl".to_string(), XSLT_NAMESPACE.to_string()),
                ("svg".to_string(), SVG_NAMESPACE.to_string()),
            ],
        }
    }

    /// Create a context with no explicit bindings.
    pub fn empty() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Look up the URI bound to `prefix`.
    ///
    /// Returns the first-registered URI, the reserved `xml`/`xmlns`
    /// bindings as a fallback, or `None`. Never fails.
    pub fn uri(&self, prefix: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(p, _)| p == prefix)
            .map(|(_, u)| u.as_str())
            .or(match prefix {
                "xml" => Some(XML_NAMESPACE),
                "xmlns" => Some(XMLNS_NAMESPACE),
                _ => None,
            })
    }

    /// All prefixes bound to `uri`, in registration order.
    ///
    /// The reserved prefixes are appended when `uri` is one of the reserved
    /// namespaces. Empty when nothing matches.
    pub fn prefixes(&self, uri: &str) -> Vec<&str> {
        let mut found: Vec<&str> = self
            .bindings
            .iter()
            .filter(|(_, u)| u == uri)
            .map(|(p, _)| p.as_str())
            .collect();
        if uri == XML_NAMESPACE {
            found.push("xml");
        }
        if uri == XMLNS_NAMESPACE {
            found.push("xmlns");
        }
        found
    }

    /// Return a new context with one more binding appended.
    ///
    /// An exact duplicate (same prefix and URI) is a no-op. The empty
    /// prefix binds the default namespace. An empty URI or a prefix that
    /// is not an NCName fails with [`Error::InvalidBinding`].
    pub fn register(&self, prefix: &str, uri: impl Into<String>) -> Result<Self> {
        let uri = uri.into();
        if uri.trim().is_empty() {
            return Err(Error::InvalidBinding {
                prefix: prefix.to_string(),
                message: "namespace URI must not be empty".to_string(),
            });
        }
        if !prefix.is_empty() && !is_ncname(prefix) {
            return Err(Error::InvalidBinding {
                prefix: prefix.to_string(),
                message: "prefix is not a valid NCName".to_string(),
            });
        }
        if prefix == "xml" || prefix == "xmlns" {
            return Err(Error::InvalidBinding {
                prefix: prefix.to_string(),
                message: "prefix is reserved".to_string(),
            });
        }
        let mut bindings = self.bindings.clone();
        if !bindings.iter().any(|(p, u)| p == prefix && *u == uri) {
            bindings.push((prefix.to_string(), uri));
        }
        Ok(Self { bindings })
    }

    /// Return a new context with the receiver's bindings followed by all of
    /// `other`'s bindings that are not already present.
    ///
    /// A binding already present (same prefix and URI) is skipped, so
    /// merging the same source twice is idempotent. A known prefix with a
    /// different URI is an additional binding behind the existing one, not
    /// a replacement.
    pub fn merge<P: NamespaceBindings + ?Sized>(&self, other: &P) -> Self {
        let mut bindings = self.bindings.clone();
        for (prefix, uri) in other.namespace_bindings() {
            if !bindings.iter().any(|(p, u)| *p == prefix && *u == uri) {
                bindings.push((prefix, uri));
            }
        }
        Self { bindings }
    }

    /// Number of explicit bindings (reserved prefixes not counted).
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether the context has no explicit bindings.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl Default for NamespaceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceBindings for NamespaceContext {
    fn namespace_bindings(&self) -> Vec<(String, String)> {
        self.bindings.clone()
    }
}

impl fmt::Display for NamespaceContext {
    /// Deterministic rendering: all bindings sorted by prefix, one
    /// `prefix=uri` pair per line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sorted: Vec<&(String, String)> = self.bindings.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        let mut first = true;
        for (prefix, uri) in sorted {
            if !first {
                writeln!(f)?;
            }
            write!(f, "{prefix}={uri}")?;
            first = false;
        }
        Ok(())
    }
}

/// Check if a string is a valid NCName (non-colonized name).
pub(crate) fn is_ncname(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
}
