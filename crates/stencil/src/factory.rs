//! The view factory.
//!
//! A [`Factory`] is the environment every view renders in. It owns the finder,
//! the compiled-program cache, the directive registry, the expression
//! environment, shared data and the section state of the current render tree.
//! Section state lives as long as one top-level render: it is flushed when
//! the outermost [`View::render`] returns.
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use stencil::{Factory, MemoryFinder};
//!
//! let finder = MemoryFinder::new()
//!     .with("layout", "<title>@yield('title')</title>@yield('content')")
//!     .with("home", "@extends('layout')@section('title', 'Home')@section('content')Hi {{ name }}@endsection");
//!
//! let env = Factory::new(finder);
//! let html = env.make("home", json!({"name": "Ada"})).unwrap().render(&env).unwrap();
//! assert_eq!(html, "<title>Home</title>Hi Ada");
//! ```

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use minijinja::value::Value;
use minijinja::Environment;
use serde::Serialize;

use crate::cache::{CompiledCache, FileCache, MemoryCache};
use crate::compiler::Compiler;
use crate::config::Config;
use crate::directive::DirectiveRegistry;
use crate::error::{CompileError, Error, Result};
use crate::executor;
use crate::expr::{self, Escaper, Evaluator, Scope};
use crate::finder::{split_namespace, ViewFinder, NAMESPACE_DELIMITER};
use crate::program::CompiledProgram;
use crate::sections::Sections;
use crate::view::{Binding, Data, View};

/// Prefix of an `@each` empty fallback that is output verbatim instead of
/// being rendered as a view.
pub const RAW_FALLBACK_PREFIX: &str = "raw|";

pub struct Factory {
    config: Config,
    finder: Box<dyn ViewFinder>,
    cache: Box<dyn CompiledCache>,
    directives: DirectiveRegistry,
    /// When a directive was last registered.
    directives_changed: SystemTime,
    evaluator: Evaluator,
    escaper: Escaper,
    shared: Data,
    names: HashMap<String, String>,
    aliases: HashMap<String, String>,
    sections: RefCell<Sections>,
    render_count: Cell<usize>,
}

impl Factory {
    /// Creates a factory with the default configuration and an in-memory cache.
    pub fn new(finder: impl ViewFinder + 'static) -> Self {
        Self::build(Config::default(), Box::new(finder), Box::new(MemoryCache::new()))
    }

    /// Creates a factory from a configuration.
    ///
    /// Uses a [`FileCache`] in `cache_path` when set, a [`MemoryCache`]
    /// otherwise.
    pub fn from_config(config: Config, finder: impl ViewFinder + 'static) -> Result<Self> {
        config.validate()?;
        let cache: Box<dyn CompiledCache> = match &config.cache_path {
            Some(path) => Box::new(FileCache::new(path.clone())),
            None => Box::new(MemoryCache::new()),
        };
        Ok(Self::build(config, Box::new(finder), cache))
    }

    fn build(config: Config, finder: Box<dyn ViewFinder>, cache: Box<dyn CompiledCache>) -> Self {
        Self {
            evaluator: Evaluator::new(config.strict_variables),
            sections: RefCell::new(Sections::new(config.tags.statement_marker)),
            config,
            finder,
            cache,
            directives: DirectiveRegistry::new(),
            directives_changed: SystemTime::UNIX_EPOCH,
            escaper: expr::html_escape,
            shared: Data::new(),
            names: HashMap::new(),
            aliases: HashMap::new(),
            render_count: Cell::new(0),
        }
    }

    /// Replaces the compiled-program cache.
    pub fn with_cache(mut self, cache: impl CompiledCache + 'static) -> Self {
        self.cache = Box::new(cache);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ----- Views -----

    /// Resolves `name` and returns a view bound to `data`.
    pub fn make(&self, name: &str, data: impl Into<Data>) -> Result<View> {
        self.make_with(name, data, Data::new())
    }

    /// Like [`Factory::make`], with defaults that `data` overrides.
    pub fn make_with(&self, name: &str, data: impl Into<Data>, merge_data: Data) -> Result<View> {
        let name = self.resolve_name(name);
        let path = self.finder.find(&name)?;
        let mut bindings = merge_data;
        bindings.merge(data.into());
        Ok(View::new(name, path, bindings))
    }

    /// A view for a template file outside the finder's roots.
    pub fn file(&self, path: impl AsRef<Path>, data: impl Into<Data>) -> View {
        View::from_file(path.as_ref().to_string_lossy().into_owned(), data.into())
    }

    /// True if `name` resolves to a view.
    pub fn exists(&self, name: &str) -> bool {
        self.finder.locate(&self.resolve_name(name)).is_some()
    }

    /// Makes the view registered under `name` with [`Factory::name`].
    pub fn of(&self, name: &str, data: impl Into<Data>) -> Result<View> {
        let view = self.names.get(name).ok_or_else(|| Error::ViewNotFound {
            name: name.to_string(),
        })?;
        self.make(view, data)
    }

    /// Registers `view` under a short `name` for [`Factory::of`].
    pub fn name(&mut self, view: &str, name: &str) {
        self.names.insert(name.to_string(), view.to_string());
    }

    /// Makes `alias` resolve to `view`.
    pub fn alias(&mut self, view: &str, alias: &str) {
        self.aliases.insert(alias.to_string(), view.to_string());
    }

    /// Renders `view` once per entry of `items`.
    ///
    /// Each render binds `key` to the entry's index or map key and
    /// `iterator` to its value. With no entries, `empty` is rendered as a
    /// view name, or output verbatim after a `raw|` prefix.
    pub fn render_each<T: Serialize + ?Sized>(&self, view: &str, items: &T, iterator: &str, empty: &str) -> Result<String> {
        self.render_each_value(view, &Value::from_serialize(items), iterator, empty)
    }

    pub(crate) fn render_each_value(&self, view: &str, items: &Value, iterator: &str, empty: &str) -> Result<String> {
        let entries = expr::entries(items).map_err(|err| Error::expression(iterator, err))?;

        if entries.is_empty() {
            return match empty.strip_prefix(RAW_FALLBACK_PREFIX) {
                Some(text) => Ok(text.to_string()),
                None => self.make(empty, Data::new())?.render(self),
            };
        }

        let mut output = String::new();
        for (key, value) in entries {
            let mut data = Data::new();
            data.set("key", key);
            data.set(iterator, value);
            output.push_str(&self.make(view, data)?.render(self)?);
        }
        Ok(output)
    }

    /// Applies aliases and normalizes `a/b` to `a.b`, keeping any namespace.
    fn resolve_name(&self, name: &str) -> String {
        let name = self.aliases.get(name).map(String::as_str).unwrap_or(name);
        match split_namespace(name) {
            (Some(namespace), rest) => format!("{}{}{}", namespace, NAMESPACE_DELIMITER, rest.replace('/', ".")),
            (None, rest) => rest.replace('/', "."),
        }
    }

    // ----- Shared data -----

    /// Binds `key` in every view rendered by this factory.
    pub fn share(&mut self, key: impl Into<String>, value: impl Into<Binding>) {
        self.shared.set(key, value);
    }

    pub fn shared(&self, key: &str) -> Option<&Binding> {
        self.shared.get(key)
    }

    pub fn get_shared(&self) -> &Data {
        &self.shared
    }

    // ----- Finder -----

    pub fn add_location(&mut self, path: impl Into<PathBuf>) {
        self.finder.add_location(path.into());
    }

    pub fn add_namespace<P: Into<PathBuf>>(&mut self, namespace: &str, paths: impl IntoIterator<Item = P>) {
        self.finder
            .add_namespace(namespace, paths.into_iter().map(Into::into).collect());
    }

    pub fn prepend_namespace<P: Into<PathBuf>>(&mut self, namespace: &str, paths: impl IntoIterator<Item = P>) {
        self.finder
            .prepend_namespace(namespace, paths.into_iter().map(Into::into).collect());
    }

    pub fn finder(&self) -> &dyn ViewFinder {
        self.finder.as_ref()
    }

    // ----- Sections -----

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.borrow().has(name)
    }

    /// Completed sections of the current render tree.
    pub fn sections(&self) -> HashMap<String, String> {
        self.sections.borrow().completed().clone()
    }

    pub fn yield_content(&self, name: &str, default: &str) -> String {
        self.sections.borrow().yield_content(name, default)
    }

    pub fn flush_sections(&self) {
        self.sections.borrow_mut().flush();
    }

    /// Flushes section state unless a render is in progress.
    pub fn flush_sections_if_done_rendering(&self) {
        if self.done_rendering() {
            self.flush_sections();
        }
    }

    /// Number of renders currently in progress.
    pub fn render_count(&self) -> usize {
        self.render_count.get()
    }

    pub fn done_rendering(&self) -> bool {
        self.render_count.get() == 0
    }

    // ----- Compilation -----

    /// Registers a custom directive. See [`DirectiveRegistry::register`].
    ///
    /// Programs this factory compiled earlier are treated as stale and are
    /// recompiled on their next render. Cached programs are keyed by source
    /// identity alone, so a [`FileCache`] directory must not be shared by
    /// factories with different tags or directives.
    pub fn directive<F>(&mut self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.directives.register(name, handler)?;
        self.directives_changed = SystemTime::now();
        Ok(())
    }

    pub fn directives(&self) -> &DirectiveRegistry {
        &self.directives
    }

    /// The expression environment, for adding filters and functions.
    pub fn expressions_mut(&mut self) -> &mut Environment<'static> {
        self.evaluator.environment_mut()
    }

    /// Replaces the function applied to escaped echoes.
    pub fn set_escaper(&mut self, escaper: Escaper) {
        self.escaper = escaper;
    }

    /// Compiles `source` with this factory's tags and directives.
    pub fn compile(&self, source: &str) -> std::result::Result<CompiledProgram, CompileError> {
        self.compiler().compile(source)
    }

    pub(crate) fn compiler(&self) -> Compiler<'_> {
        Compiler::new(&self.config.tags, &self.directives).with_max_expansion_depth(self.config.max_expansion_depth)
    }

    // ----- Rendering internals -----

    pub(crate) fn cache(&self) -> &dyn CompiledCache {
        self.cache.as_ref()
    }

    /// Programs compiled at or before this time predate a directive.
    pub(crate) fn directives_changed(&self) -> SystemTime {
        self.directives_changed
    }

    pub(crate) fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub(crate) fn escaper(&self) -> Escaper {
        self.escaper
    }

    pub(crate) fn section_state(&self) -> &RefCell<Sections> {
        &self.sections
    }

    /// Renders `view` without flushing sections.
    pub(crate) fn render_contents(&self, view: &View) -> Result<String> {
        self.render_count.set(self.render_count.get() + 1);
        let result = self
            .gather_data(view)
            .and_then(|scope| executor::evaluate(self, view, scope));
        self.render_count.set(self.render_count.get() - 1);
        result
    }

    /// Shared data overlaid with the view's data, sub-views rendered.
    fn gather_data(&self, view: &View) -> Result<Scope> {
        let mut scope = Scope::new();
        for (key, binding) in self.shared.iter().chain(view.data().iter()) {
            let value = match binding {
                Binding::Value(value) => value.clone(),
                Binding::View(nested) => Value::from(nested.render(self)?),
            };
            scope.set(key, value);
        }
        Ok(scope)
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("config", &self.config)
            .field("directives", &self.directives)
            .field("shared", &self.shared)
            .field("render_count", &self.render_count.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::finder::MemoryFinder;

    fn env(views: &[(&str, &str)]) -> Factory {
        let mut finder = MemoryFinder::new();
        for (name, text) in views {
            finder.add(*name, *text);
        }
        Factory::new(finder)
    }

    #[test]
    fn make_resolves_and_merges() {
        let env = env(&[("pages.home", "x")]);
        let view = env
            .make_with("pages/home", json!({"a": 1}), [("a", 0i64), ("b", 2i64)].into_iter().collect())
            .unwrap();
        assert_eq!(view.name(), "pages.home");
        assert_eq!(view.get("a").and_then(Binding::as_value), Some(&Value::from(1)));
        assert!(view.has("b"));
    }

    #[test]
    fn make_missing_view() {
        let env = env(&[]);
        assert!(matches!(env.make("nope", Data::new()), Err(Error::ViewNotFound { name }) if name == "nope"));
        assert!(!env.exists("nope"));
    }

    #[test]
    fn namespace_kept_when_normalizing() {
        let env = env(&[("admin::users.index", "ok")]);
        assert!(env.exists("admin::users/index"));
    }

    #[test]
    fn names_and_aliases() {
        let mut env = env(&[("emails.welcome", "Welcome")]);
        env.name("emails.welcome", "welcome");
        env.alias("emails.welcome", "hello");
        assert_eq!(env.of("welcome", Data::new()).unwrap().name(), "emails.welcome");
        assert_eq!(env.make("hello", Data::new()).unwrap().name(), "emails.welcome");
        assert!(matches!(env.of("other", Data::new()), Err(Error::ViewNotFound { .. })));
    }

    #[test]
    fn shared_data() {
        let mut env = env(&[]);
        env.share("app", "stencil");
        assert_eq!(
            env.shared("app").and_then(Binding::as_value),
            Some(&Value::from("stencil"))
        );
        assert_eq!(env.get_shared().len(), 1);
    }

    #[test]
    fn directive_collision_surfaces() {
        let mut env = env(&[]);
        env.directive("upper", |args| args.to_string()).unwrap();
        assert!(matches!(env.directive("upper", |_| String::new()), Err(Error::Directive(_))));
    }

    #[test]
    fn from_config_picks_file_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            cache_path: Some(dir.path().join("compiled")),
            ..Config::default()
        };
        let env = Factory::from_config(config, MemoryFinder::new().with("a", "hi")).unwrap();
        assert_eq!(env.make("a", Data::new()).unwrap().render(&env).unwrap(), "hi");
        assert!(env.cache().exists("a"));
        assert!(dir.path().join("compiled").is_dir());
    }

    #[test]
    fn render_count_starts_at_zero() {
        let env = env(&[]);
        assert_eq!(env.render_count(), 0);
        assert!(env.done_rendering());
    }
}
