//! Error types for xmlwrap
//!
//! This module defines all error types used throughout the library.
//! Every construction-time failure (parsing a document, compiling a
//! stylesheet or schema, validating) surfaces here immediately; nothing is
//! swallowed or replaced with a generic failure.

use std::fmt;
use thiserror::Error;

/// Result type alias using xmlwrap Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for xmlwrap operations
#[derive(Error, Debug)]
pub enum Error {
    /// Input is not well-formed XML
    #[error("malformed XML document: {0}")]
    Malformed(String),

    /// XPath expression syntax error or unsupported construct
    #[error("invalid XPath expression '{expression}': {message}")]
    InvalidExpression {
        /// The offending expression
        expression: String,
        /// What was wrong with it
        message: String,
    },

    /// Bad namespace registration
    #[error("invalid namespace binding for prefix '{prefix}': {message}")]
    InvalidBinding {
        /// The prefix being registered
        prefix: String,
        /// Why the binding was rejected
        message: String,
    },

    /// A referenced resource could not be located
    #[error("resource '{href}' not found (base: {}): {detail}", .base.as_deref().unwrap_or("none"))]
    ResourceNotFound {
        /// The reference as it appeared in the stylesheet/schema
        href: String,
        /// Base location of the referencing document, if any
        base: Option<String>,
        /// Resolver-specific diagnostic
        detail: String,
    },

    /// A resource exists but could not be read
    #[error("resource '{href}' is not readable: {detail}")]
    ResourceUnreadable {
        /// The reference that resolved to an unreadable resource
        href: String,
        /// Underlying I/O diagnostic
        detail: String,
    },

    /// Stylesheet compilation error (malformed stylesheet, bad pattern)
    #[error("failed to compile stylesheet: {0}")]
    StylesheetCompile(String),

    /// Runtime failure during transformation
    #[error("transformation failed: {0}")]
    TransformExecution(String),

    /// Schema document is well-formed XML but not a usable schema
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// The document does not conform to its schema
    #[error("schema validation failed: {0}")]
    SchemaViolation(Violations),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single schema violation with location information
#[derive(Debug, Clone)]
pub struct Violation {
    /// Error message
    message: String,
    /// Path to the element that failed validation
    path: Option<String>,
    /// Source line in the instance document
    line: Option<usize>,
}

impl Violation {
    /// Create a new violation
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            line: None,
        }
    }

    /// Set the instance path where validation failed
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the source line number
    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    /// The violation message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Path to the offending element, if known
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Source line of the offending element, if known
    pub fn line(&self) -> Option<usize> {
        self.line
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(line) = self.line {
            write!(f, "#{line} ")?;
        }
        write!(f, "{}", self.message)?;
        if let Some(ref path) = self.path {
            write!(f, " (at {path})")?;
        }
        Ok(())
    }
}

/// The full list of violations reported by one validation run
#[derive(Debug, Clone)]
pub struct Violations(Vec<Violation>);

impl Violations {
    /// Wrap a non-empty violation list
    pub fn new(violations: Vec<Violation>) -> Self {
        Self(violations)
    }

    /// The individual violations
    pub fn iter(&self) -> impl Iterator<Item = &Violation> {
        self.0.iter()
    }

    /// Number of violations
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s) in XML document: ", self.0.len())?;
        let mut first = true;
        for violation in &self.0 {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{violation}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_display() {
        let violation = Violation::new("element 'foo' is not allowed here")
            .with_path("/root/foo")
            .with_line(3);

        let msg = format!("{}", violation);
        assert!(msg.contains("#3"));
        assert!(msg.contains("element 'foo' is not allowed here"));
        assert!(msg.contains("/root/foo"));
    }

    #[test]
    fn test_violations_display_joins_all() {
        let violations = Violations::new(vec![
            Violation::new("first"),
            Violation::new("second").with_path("/a/b"),
        ]);

        let msg = format!("{}", violations);
        assert!(msg.starts_with("2 error(s)"));
        assert!(msg.contains("first; second"));
    }

    #[test]
    fn test_resource_not_found_display() {
        let err = Error::ResourceNotFound {
            href: "import.xsl".to_string(),
            base: None,
            detail: "no source resolution configured".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("'import.xsl'"));
        assert!(msg.contains("base: none"));
    }

    #[test]
    fn test_invalid_expression_names_the_expression() {
        let err = Error::InvalidExpression {
            expression: "//a[".to_string(),
            message: "unterminated predicate".to_string(),
        };
        assert!(format!("{}", err).contains("//a["));
    }
}
