//! Views and their data.
//!
//! A [`View`] is a resolved template plus the data it renders with. Data is a
//! keyed set of [`Binding`]s; a binding is either a value or another view,
//! which is rendered just before the owning view runs and bound as text.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use minijinja::value::{Value, ValueKind};
use serde::Serialize;

use crate::error::Result;
use crate::expr::Scope;
use crate::factory::Factory;

/// One data entry of a view.
#[derive(Debug, Clone)]
pub enum Binding {
    Value(Value),
    /// A view rendered into the binding when the owning view renders.
    View(View),
}

impl Binding {
    /// Converts any serializable value into a binding.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Self {
        Binding::Value(Value::from_serialize(value))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Binding::Value(value) => Some(value),
            Binding::View(_) => None,
        }
    }

    pub fn as_view(&self) -> Option<&View> {
        match self {
            Binding::View(view) => Some(view),
            Binding::Value(_) => None,
        }
    }
}

impl From<Value> for Binding {
    fn from(value: Value) -> Self {
        Binding::Value(value)
    }
}

impl From<View> for Binding {
    fn from(view: View) -> Self {
        Binding::View(view)
    }
}

impl From<serde_json::Value> for Binding {
    fn from(value: serde_json::Value) -> Self {
        Binding::from_serialize(&value)
    }
}

impl From<&str> for Binding {
    fn from(value: &str) -> Self {
        Binding::Value(Value::from(value))
    }
}

impl From<String> for Binding {
    fn from(value: String) -> Self {
        Binding::Value(Value::from(value))
    }
}

impl From<bool> for Binding {
    fn from(value: bool) -> Self {
        Binding::Value(Value::from(value))
    }
}

impl From<i64> for Binding {
    fn from(value: i64) -> Self {
        Binding::Value(Value::from(value))
    }
}

impl From<f64> for Binding {
    fn from(value: f64) -> Self {
        Binding::Value(Value::from(value))
    }
}

/// Keyed view data.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use stencil::Data;
///
/// let mut data = Data::from(json!({"title": "Home"}));
/// data.set("count", 3i64);
/// assert!(data.has("title"));
/// assert_eq!(data.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Data {
    entries: BTreeMap<String, Binding>,
}

impl Data {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Binding> {
        self.entries.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Binding>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Binding> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Binding)> {
        self.entries.iter().map(|(key, binding)| (key.as_str(), binding))
    }

    /// Adds every entry of `other`, replacing entries with the same key.
    pub fn merge(&mut self, other: Data) {
        self.entries.extend(other.entries);
    }

    pub(crate) fn from_scope(scope: &Scope) -> Self {
        scope
            .vars()
            .iter()
            .map(|(key, value)| (key.clone(), Binding::Value(value.clone())))
            .collect()
    }

    /// Adds the entries of a map value.
    pub(crate) fn extend_from_value(&mut self, value: &Value) -> std::result::Result<(), minijinja::Error> {
        if value.kind() != ValueKind::Map {
            return Err(minijinja::Error::new(
                minijinja::ErrorKind::InvalidOperation,
                "view data must be a map",
            ));
        }
        for key in value.try_iter()? {
            let item = value.get_item(&key)?;
            let key = match key.as_str() {
                Some(key) => key.to_string(),
                None => key.to_string(),
            };
            self.entries.insert(key, Binding::Value(item));
        }
        Ok(())
    }
}

impl From<serde_json::Value> for Data {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(map) => map
                .into_iter()
                .map(|(key, value)| (key, Binding::from(value)))
                .collect(),
            serde_json::Value::Null => Data::new(),
            other => {
                log::warn!("ignoring non-object view data {}", other);
                Data::new()
            }
        }
    }
}

impl<K: Into<String>, V: Into<Binding>> FromIterator<(K, V)> for Data {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// A template ready to render.
///
/// Views are created by [`Factory::make`] and rendered against the factory
/// that made them.
#[derive(Debug, Clone)]
pub struct View {
    name: String,
    path: String,
    data: Data,
    from_file: bool,
    last_output: RefCell<Option<String>>,
}

impl View {
    pub(crate) fn new(name: String, path: String, data: Data) -> Self {
        Self {
            name,
            path,
            data,
            from_file: false,
            last_output: RefCell::new(None),
        }
    }

    pub(crate) fn from_file(path: String, data: Data) -> Self {
        Self {
            from_file: true,
            ..Self::new(path.clone(), path, data)
        }
    }

    pub(crate) fn is_file(&self) -> bool {
        self.from_file
    }

    /// Renders the view.
    pub fn render(&self, env: &Factory) -> Result<String> {
        self.render_with(env, |_, _| None)
    }

    /// Renders the view and passes the output to `callback`.
    ///
    /// If the callback returns text, that text is returned instead of the
    /// rendered output. The callback runs before section state is flushed,
    /// so it can still inspect the sections the render produced.
    pub fn render_with<F>(&self, env: &Factory, callback: F) -> Result<String>
    where
        F: FnOnce(&View, &str) -> Option<String>,
    {
        let result = env.render_contents(self).map(|contents| {
            let response = callback(self, &contents);
            (contents, response)
        });
        env.flush_sections_if_done_rendering();

        let (contents, response) = result?;
        *self.last_output.borrow_mut() = Some(contents.clone());
        Ok(response.unwrap_or(contents))
    }

    /// Renders the view and returns the sections it defined.
    pub fn render_sections(&self, env: &Factory) -> Result<HashMap<String, String>> {
        let mut sections = HashMap::new();
        self.render_with(env, |_, _| {
            sections = env.sections();
            None
        })?;
        Ok(sections)
    }

    /// Adds a data entry.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Binding>) -> Self {
        self.data.set(key, value);
        self
    }

    /// Adds several data entries.
    pub fn with_all(mut self, data: impl Into<Data>) -> Self {
        self.data.merge(data.into());
        self
    }

    /// Binds the view `view`, made with `data`, under `key`.
    pub fn nest(self, env: &Factory, key: impl Into<String>, view: &str, data: impl Into<Data>) -> Result<Self> {
        let nested = env.make(view, data)?;
        Ok(self.with(key, nested))
    }

    pub fn get(&self, key: &str) -> Option<&Binding> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Binding>) {
        self.data.set(key, value);
    }

    pub fn has(&self, key: &str) -> bool {
        self.data.has(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Binding> {
        self.data.remove(key)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source identity the view was resolved to.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn data(&self) -> &Data {
        &self.data
    }

    /// Output of the most recent successful render.
    pub fn last_output(&self) -> Option<String> {
        self.last_output.borrow().clone()
    }
}
