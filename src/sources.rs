//! Resource resolution for stylesheets and schemas
//!
//! Stylesheets reference other stylesheets through `xsl:import` and
//! `xsl:include`, and schemas through `xs:include`/`xs:import`. The
//! [`Sources`] trait is the sole boundary through which those references
//! are fetched. Resolvers are plain values passed explicitly; the
//! degenerate "nothing is resolvable" case is the named constant [`DUMMY`].

use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

/// The result of resolving a reference: the byte content plus the locator
/// that identifies where it came from (used as the base for nested
/// references).
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Raw byte content of the resolved resource
    pub bytes: Vec<u8>,
    /// Identifying locator of the resource
    pub location: String,
}

impl Resolved {
    /// Create a resolved resource
    pub fn new(bytes: Vec<u8>, location: impl Into<String>) -> Self {
        Self {
            bytes,
            location: location.into(),
        }
    }
}

/// Strategy for resolving a `(href, base)` reference to byte content.
pub trait Sources: Send + Sync + std::fmt::Debug {
    /// Resolve `href` relative to `base` (the referencing document's own
    /// locator, when known).
    ///
    /// Fails with [`Error::ResourceNotFound`] when the reference cannot be
    /// located and [`Error::ResourceUnreadable`] when it exists but cannot
    /// be read. Any file handle opened during resolution is released
    /// before this returns.
    fn resolve(&self, href: &str, base: Option<&str>) -> Result<Resolved>;
}

/// Resolver with no strategy configured: every call fails.
///
/// Use this (via [`DUMMY`]) to assert that a stylesheet or schema is fully
/// self-contained; any `xsl:import` or `xs:include` then surfaces as
/// [`Error::ResourceNotFound`] instead of a silent default lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DummySources;

/// The shared no-resolution resolver.
pub const DUMMY: DummySources = DummySources;

impl Sources for DummySources {
    fn resolve(&self, href: &str, base: Option<&str>) -> Result<Resolved> {
        Err(Error::ResourceNotFound {
            href: href.to_string(),
            base: base.map(str::to_string),
            detail: "no source resolution configured".to_string(),
        })
    }
}

/// Resolver backed by the file system.
///
/// Looks for `href` under the configured root directory first, then
/// relative to the referencing document's base location.
///
/// ```rust,ignore
/// let xsl = Stylesheet::from_string(input)
///     .with_sources(Arc::new(FileSources::in_dir("/tmp/my-resources")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSources {
    /// Root directory for lookups
    root: PathBuf,
}

impl FileSources {
    /// Resolver rooted at the current working directory.
    pub fn new() -> Self {
        Self::in_dir("")
    }

    /// Resolver rooted at `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { root: dir.into() }
    }

    /// Candidate paths for a reference, in probe order.
    fn candidates(&self, href: &str, base: Option<&str>) -> Vec<PathBuf> {
        let mut paths = vec![self.root.join(href)];
        if let Some(base) = base {
            let base_path = Path::new(base);
            // The base is the referencing document's own locator; siblings
            // of that document are resolved against its directory.
            if let Some(parent) = base_path.parent() {
                paths.push(parent.join(href));
            }
            paths.push(base_path.join(href));
        }
        paths
    }
}

impl Default for FileSources {
    fn default() -> Self {
        Self::new()
    }
}

impl Sources for FileSources {
    fn resolve(&self, href: &str, base: Option<&str>) -> Result<Resolved> {
        // Remote references are out of scope for a file-system resolver.
        if let Ok(url) = Url::parse(href) {
            if url.scheme() != "file" && url.scheme().len() > 1 {
                return Err(Error::ResourceNotFound {
                    href: href.to_string(),
                    base: base.map(str::to_string),
                    detail: format!("remote scheme '{}' is not resolvable", url.scheme()),
                });
            }
        }
        for path in self.candidates(href, base) {
            if !path.exists() {
                continue;
            }
            log::debug!("resolving '{}' from file {}", href, path.display());
            return match fs::read(&path) {
                Ok(bytes) => Ok(Resolved::new(bytes, path.to_string_lossy())),
                Err(err) => Err(Error::ResourceUnreadable {
                    href: href.to_string(),
                    detail: format!("{}: {}", path.display(), err),
                }),
            };
        }
        Err(Error::ResourceNotFound {
            href: href.to_string(),
            base: base.map(str::to_string),
            detail: format!("not found under '{}'", self.root.display()),
        })
    }
}

/// Resolver backed by an in-memory bundle of registered resources.
///
/// This is the analogue of loading from a bundled resource namespace:
/// callers register named resources (typically `include_bytes!` data) under
/// a configured prefix, and references resolve against that registry only.
#[derive(Debug, Clone, Default)]
pub struct BundleSources {
    /// Prefix prepended to every href before lookup
    prefix: String,
    /// Registered resources by full name, in registration order
    entries: IndexMap<String, Vec<u8>>,
}

impl BundleSources {
    /// Empty bundle with no prefix.
    pub fn new() -> Self {
        Self::with_prefix("")
    }

    /// Empty bundle whose lookups are rooted at `prefix`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            entries: IndexMap::new(),
        }
    }

    /// Register a resource under `name` (relative to the prefix).
    pub fn with_resource(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.entries
            .insert(format!("{}{}", self.prefix, name.into()), bytes.into());
        self
    }
}

impl Sources for BundleSources {
    fn resolve(&self, href: &str, base: Option<&str>) -> Result<Resolved> {
        let direct = format!("{}{}", self.prefix, href);
        if let Some(bytes) = self.entries.get(&direct) {
            log::debug!("resolving '{}' from bundle entry '{}'", href, direct);
            return Ok(Resolved::new(bytes.clone(), direct));
        }
        if let Some(base) = base {
            let based = format!("{base}{href}");
            if let Some(bytes) = self.entries.get(&based) {
                return Ok(Resolved::new(bytes.clone(), based));
            }
        }
        Err(Error::ResourceNotFound {
            href: href.to_string(),
            base: base.map(str::to_string),
            detail: format!("no bundled resource with prefix '{}'", self.prefix),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_dummy_always_fails() {
        let result = DUMMY.resolve("import.xsl", Some("/base.xsl"));
        assert!(matches!(result, Err(Error::ResourceNotFound { .. })));
    }

    #[test]
    fn test_file_sources_resolves_under_root() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lib.xsl");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "<stub/>").unwrap();

        let sources = FileSources::in_dir(dir.path());
        let resolved = sources.resolve("lib.xsl", None).unwrap();
        assert_eq!(resolved.bytes, b"<stub/>\n");
        assert!(resolved.location.ends_with("lib.xsl"));
    }

    #[test]
    fn test_file_sources_falls_back_to_base_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared.xsl");
        fs::write(&path, "<stub/>").unwrap();

        let sources = FileSources::in_dir("/nonexistent-root");
        let base = dir.path().join("main.xsl");
        let resolved = sources
            .resolve("shared.xsl", Some(&base.to_string_lossy()))
            .unwrap();
        assert_eq!(resolved.bytes, b"<stub/>");
    }

    #[test]
    fn test_file_sources_missing_file() {
        let sources = FileSources::in_dir("/nonexistent-root");
        let result = sources.resolve("missing.xsl", None);
        assert!(matches!(result, Err(Error::ResourceNotFound { .. })));
    }

    #[test]
    fn test_file_sources_rejects_remote() {
        let sources = FileSources::new();
        let result = sources.resolve("http://example.com/a.xsl", None);
        assert!(matches!(result, Err(Error::ResourceNotFound { .. })));
    }

    #[test]
    fn test_bundle_sources_prefix_lookup() {
        let sources = BundleSources::with_prefix("xsl/").with_resource("lib.xsl", "<stub/>");
        let resolved = sources.resolve("lib.xsl", None).unwrap();
        assert_eq!(resolved.location, "xsl/lib.xsl");

        let missing = sources.resolve("other.xsl", None);
        assert!(matches!(missing, Err(Error::ResourceNotFound { .. })));
    }
}
