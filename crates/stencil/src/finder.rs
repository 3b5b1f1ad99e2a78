//! View resolution.
//!
//! A [`ViewFinder`] maps a logical view name to a source identity and loads
//! the source behind it. Names are dotted (`layouts.app`) and may carry a
//! namespace (`admin::dashboard`).
//!
//! # Resolution
//!
//! [`FileViewFinder`] turns dots into directory separators and tries each
//! search root with each extension, in order:
//!
//! | Priority | Extension |
//! |----------|-----------|
//! | 1 (highest) | `.stencil.html` |
//! | 2 | `.html` |
//!
//! With roots `["./views"]`, `"layouts.app"` resolves to
//! `./views/layouts/app.stencil.html` if it exists, otherwise
//! `./views/layouts/app.html`. A namespaced name searches only the
//! directories registered for that namespace.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{Error, Result};

/// Separates a namespace from the view name.
pub const NAMESPACE_DELIMITER: &str = "::";

/// Recognized view file extensions in priority order.
pub const VIEW_EXTENSIONS: &[&str] = &["stencil.html", "html"];

/// Loaded template source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSource {
    /// Stable key for the source, used as the cache key.
    pub identity: String,
    pub text: String,
    pub last_modified: SystemTime,
}

/// Locates and loads view sources.
pub trait ViewFinder {
    /// Resolves `name` to a source identity, or `None` if there is no such view.
    fn locate(&self, name: &str) -> Option<String>;

    /// Resolves `name`, failing with [`Error::ViewNotFound`].
    fn find(&self, name: &str) -> Result<String> {
        self.locate(name).ok_or_else(|| Error::ViewNotFound {
            name: name.to_string(),
        })
    }

    /// Reads the source behind an identity returned by [`ViewFinder::locate`].
    fn load(&self, identity: &str) -> Result<TemplateSource>;

    /// Adds a search root. Finders without roots ignore it.
    fn add_location(&mut self, _path: PathBuf) {}

    /// Adds a search root for a namespace, after any existing ones.
    fn add_namespace(&mut self, _namespace: &str, _paths: Vec<PathBuf>) {}

    /// Adds a search root for a namespace, before any existing ones.
    fn prepend_namespace(&mut self, _namespace: &str, _paths: Vec<PathBuf>) {}
}

/// Splits `ns::name` into its namespace and name.
pub fn split_namespace(name: &str) -> (Option<&str>, &str) {
    match name.split_once(NAMESPACE_DELIMITER) {
        Some((namespace, rest)) => (Some(namespace), rest),
        None => (None, name),
    }
}

/// Reads a template file along with its modification time.
pub fn load_file(path: impl AsRef<Path>) -> Result<TemplateSource> {
    let path = path.as_ref();
    let io_error = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };
    let text = fs::read_to_string(path).map_err(io_error)?;
    let last_modified = fs::metadata(path).and_then(|m| m.modified()).map_err(io_error)?;
    Ok(TemplateSource {
        identity: path.to_string_lossy().into_owned(),
        text,
        last_modified,
    })
}

/// Finds views on the filesystem.
#[derive(Debug, Clone)]
pub struct FileViewFinder {
    paths: Vec<PathBuf>,
    hints: HashMap<String, Vec<PathBuf>>,
    extensions: Vec<String>,
}

impl Default for FileViewFinder {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            hints: HashMap::new(),
            extensions: VIEW_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
        }
    }
}

impl FileViewFinder {
    pub fn new<P: Into<PathBuf>>(paths: impl IntoIterator<Item = P>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Registers an extension with the highest priority.
    pub fn add_extension(&mut self, extension: &str) {
        let extension = extension.trim_start_matches('.').to_string();
        self.extensions.retain(|ext| *ext != extension);
        self.extensions.insert(0, extension);
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Candidate files for `name` in resolution order.
    fn candidates(&self, name: &str) -> Vec<PathBuf> {
        let (namespace, name) = split_namespace(name);
        let roots = match namespace {
            Some(namespace) => self.hints.get(namespace).map(Vec::as_slice).unwrap_or(&[]),
            None => self.paths.as_slice(),
        };
        let relative = name.replace('.', "/");

        roots
            .iter()
            .flat_map(|root| {
                let relative = &relative;
                self.extensions
                    .iter()
                    .map(move |ext| root.join(format!("{}.{}", relative, ext)))
            })
            .collect()
    }
}

impl ViewFinder for FileViewFinder {
    fn locate(&self, name: &str) -> Option<String> {
        let found = self
            .candidates(name)
            .into_iter()
            .find(|path| path.is_file())?;
        log::trace!("view {} resolved to {}", name, found.display());
        Some(found.to_string_lossy().into_owned())
    }

    fn load(&self, identity: &str) -> Result<TemplateSource> {
        load_file(identity)
    }

    fn add_location(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    fn add_namespace(&mut self, namespace: &str, paths: Vec<PathBuf>) {
        self.hints.entry(namespace.to_string()).or_default().extend(paths);
    }

    fn prepend_namespace(&mut self, namespace: &str, paths: Vec<PathBuf>) {
        let hints = self.hints.entry(namespace.to_string()).or_default();
        let existing = std::mem::replace(hints, paths);
        hints.extend(existing);
    }
}

/// Views held in memory, keyed by logical name.
///
/// # Example
///
/// ```rust
/// use stencil::{MemoryFinder, ViewFinder};
///
/// let mut finder = MemoryFinder::new();
/// finder.add("home", "Hello");
/// assert_eq!(finder.locate("home").as_deref(), Some("home"));
/// assert!(finder.locate("missing").is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryFinder {
    views: HashMap<String, (String, SystemTime)>,
}

impl MemoryFinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a view, stamped with the current time.
    pub fn add(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.add_with_mtime(name, text, SystemTime::now());
    }

    /// Adds or replaces a view with an explicit modification time.
    pub fn add_with_mtime(&mut self, name: impl Into<String>, text: impl Into<String>, modified: SystemTime) {
        self.views.insert(name.into(), (text.into(), modified));
    }

    /// Builder form of [`MemoryFinder::add`].
    pub fn with(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.add(name, text);
        self
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

impl ViewFinder for MemoryFinder {
    fn locate(&self, name: &str) -> Option<String> {
        self.views.contains_key(name).then(|| name.to_string())
    }

    fn load(&self, identity: &str) -> Result<TemplateSource> {
        let (text, modified) = self.views.get(identity).ok_or_else(|| Error::ViewNotFound {
            name: identity.to_string(),
        })?;
        Ok(TemplateSource {
            identity: identity.to_string(),
            text: text.clone(),
            last_modified: *modified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, relative: &str, text: &str) -> PathBuf {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn dotted_names_map_to_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "layouts/app.stencil.html", "layout");
        let finder = FileViewFinder::new([dir.path()]);
        assert_eq!(finder.locate("layouts.app"), Some(path.to_string_lossy().into_owned()));
    }

    #[test]
    fn extension_priority() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "page.html", "plain");
        let preferred = write(dir.path(), "page.stencil.html", "stencil");
        let finder = FileViewFinder::new([dir.path()]);
        assert_eq!(finder.locate("page"), Some(preferred.to_string_lossy().into_owned()));
    }

    #[test]
    fn roots_searched_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        write(second.path(), "a.html", "second");
        let mut finder = FileViewFinder::new([first.path()]);
        finder.add_location(second.path().to_path_buf());
        let identity = finder.find("a").unwrap();
        assert_eq!(finder.load(&identity).unwrap().text, "second");
    }

    #[test]
    fn namespaces() {
        let base = tempfile::tempdir().unwrap();
        let vendor = tempfile::tempdir().unwrap();
        write(base.path(), "panel.html", "base");
        write(vendor.path(), "panel.html", "vendor");
        let override_dir = tempfile::tempdir().unwrap();
        write(override_dir.path(), "panel.html", "override");

        let mut finder = FileViewFinder::new([base.path()]);
        finder.add_namespace("admin", vec![vendor.path().to_path_buf()]);
        let identity = finder.find("admin::panel").unwrap();
        assert_eq!(finder.load(&identity).unwrap().text, "vendor");

        finder.prepend_namespace("admin", vec![override_dir.path().to_path_buf()]);
        let identity = finder.find("admin::panel").unwrap();
        assert_eq!(finder.load(&identity).unwrap().text, "override");

        assert!(finder.locate("other::panel").is_none());
    }

    #[test]
    fn missing_view_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let finder = FileViewFinder::new([dir.path()]);
        assert!(matches!(finder.find("nope"), Err(Error::ViewNotFound { name }) if name == "nope"));
    }

    #[test]
    fn custom_extension_first() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "x.html", "html");
        write(dir.path(), "x.tpl", "tpl");
        let mut finder = FileViewFinder::new([dir.path()]);
        finder.add_extension(".tpl");
        assert_eq!(finder.extensions()[0], "tpl");
        let identity = finder.find("x").unwrap();
        assert_eq!(finder.load(&identity).unwrap().text, "tpl");
    }

    #[test]
    fn memory_finder_keeps_mtime() {
        let stamp = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(42);
        let mut finder = MemoryFinder::new();
        finder.add_with_mtime("a", "text", stamp);
        let source = finder.load("a").unwrap();
        assert_eq!(source.last_modified, stamp);
        assert_eq!(source.text, "text");
        assert!(matches!(finder.load("b"), Err(Error::ViewNotFound { .. })));
    }

    #[test]
    fn split_namespace_forms() {
        assert_eq!(split_namespace("ns::a.b"), (Some("ns"), "a.b"));
        assert_eq!(split_namespace("a.b"), (None, "a.b"));
    }
}
