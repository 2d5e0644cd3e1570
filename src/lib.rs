//! # xmlwrap
//!
//! Immutable, namespace-aware XML documents with XPath querying, XSLT
//! transformation chains and strict XSD validation.
//!
//! Everything in this crate is a value: a [`Document`] never changes once
//! built, and every operation that looks like a mutation (registering a
//! namespace, merging a context, transforming) returns a new value instead.
//! Derived capabilities compose by wrapping: [`StrictDocument`] adds a
//! validation gate around a document, [`TransformChain`] turns a sequence of
//! stylesheets into one transform.
//!
//! ## Example
//!
//! ```rust,ignore
//! use xmlwrap::{Document, Stylesheet, Transform};
//!
//! let doc = Document::from_string("<r xmlns:x='urn:x'><x:a>1</x:a></r>")?
//!     .register_ns("x", "urn:x")?;
//! let values = doc.xpath("/r/x:a/text()")?;
//! assert_eq!(values, vec!["1"]);
//!
//! let xsl = Stylesheet::from_file("to-report.xsl")?;
//! let report = xsl.apply_to(&doc)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Foundation
pub mod error;
pub mod namespaces;

// Resource resolution
pub mod sources;

// Documents and querying
pub mod documents;
mod xpath;

// Transformation
pub mod xslt;

// Validation
pub mod schemas;
pub mod strict;

// Re-exports for convenience
pub use documents::Document;
pub use error::{Error, Result, Violation, Violations};
pub use namespaces::{NamespaceBindings, NamespaceContext};
pub use schemas::Schema;
pub use sources::{BundleSources, FileSources, Resolved, Sources, DUMMY};
pub use strict::StrictDocument;
pub use xslt::{ParamValue, Stylesheet, Transform, TransformChain};

/// Version of the xmlwrap library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// XML namespace
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// XMLNS namespace
pub const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

/// XSD namespace
pub const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";

/// XSD instance namespace
pub const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// XSLT namespace
pub const XSLT_NAMESPACE: &str = "http://www.w3.org/1999/XSL/Transform";

/// XHTML namespace
pub const XHTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// SVG namespace
pub const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";
