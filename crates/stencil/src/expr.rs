//! Expression evaluation.
//!
//! Echo tags and directive arguments hold minijinja expressions. They are
//! compiled and evaluated against the current [`Scope`] when the instruction
//! runs, so the same compiled program can render any data.

use std::collections::BTreeMap;

use minijinja::value::{Value, ValueKind};
use minijinja::{Environment, Expression};

use crate::error::{Error, Result};

/// The escape function applied to escaped echoes.
pub type Escaper = fn(&str) -> String;

/// HTML-escapes `text`. The default [`Escaper`].
pub fn html_escape(text: &str) -> String {
    minijinja::HtmlEscape(text).to_string()
}

/// Converts a value to output text. Undefined and none print nothing.
pub fn display(value: &Value) -> String {
    if value.is_undefined() || value.is_none() {
        String::new()
    } else {
        value.to_string()
    }
}

/// Key and value pairs of an iterable: map keys, or sequence indices.
///
/// Undefined and none yield no entries.
pub fn entries(value: &Value) -> std::result::Result<Vec<(Value, Value)>, minijinja::Error> {
    if value.is_undefined() || value.is_none() {
        return Ok(Vec::new());
    }
    match value.kind() {
        ValueKind::Map => value
            .try_iter()?
            .map(|key| {
                let item = value.get_item(&key)?;
                Ok((key, item))
            })
            .collect(),
        _ => Ok(value
            .try_iter()?
            .enumerate()
            .map(|(index, item)| (Value::from(index), item))
            .collect()),
    }
}

/// Variables visible to a running program.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: BTreeMap<String, Value>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    pub fn vars(&self) -> &BTreeMap<String, Value> {
        &self.vars
    }

    /// Records the current bindings of `names` so [`Scope::restore`] can put
    /// them back after a loop rebinds them.
    pub(crate) fn save(&self, names: &[&str]) -> Vec<(String, Option<Value>)> {
        names
            .iter()
            .map(|name| (name.to_string(), self.vars.get(*name).cloned()))
            .collect()
    }

    pub(crate) fn restore(&mut self, saved: Vec<(String, Option<Value>)>) {
        for (name, value) in saved {
            match value {
                Some(value) => self.vars.insert(name, value),
                None => self.vars.remove(&name),
            };
        }
    }
}

impl FromIterator<(String, Value)> for Scope {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

/// Evaluates expressions with a minijinja environment.
///
/// Filters and functions added to [`Evaluator::environment_mut`] are available
/// in every expression.
#[derive(Debug)]
pub struct Evaluator {
    env: Environment<'static>,
    strict: bool,
}

impl Evaluator {
    pub fn new(strict: bool) -> Self {
        Self {
            env: Environment::new(),
            strict,
        }
    }

    pub fn environment_mut(&mut self) -> &mut Environment<'static> {
        &mut self.env
    }

    /// Compiles `expression` for repeated evaluation with
    /// [`Evaluator::eval_compiled`].
    pub fn compile(&self, expression: &str) -> Result<Expression<'_, 'static>> {
        self.env
            .compile_expression_owned(expression.to_string())
            .map_err(|err| Error::expression(expression, err))
    }

    /// Evaluates `expression` against `scope`.
    pub fn eval(&self, expression: &str, scope: &Scope) -> Result<Value> {
        let compiled = self.compile(expression)?;
        self.eval_compiled(&compiled, expression, scope)
    }

    /// Evaluates an expression compiled by [`Evaluator::compile`]; `source`
    /// names it in errors.
    pub fn eval_compiled(&self, compiled: &Expression<'_, 'static>, source: &str, scope: &Scope) -> Result<Value> {
        let value = compiled
            .eval(scope.vars())
            .map_err(|err| Error::expression(source, err))?;
        if self.strict && value.is_undefined() {
            return Err(Error::Undefined {
                expression: source.to_string(),
            });
        }
        Ok(value)
    }

    /// Evaluates `expression` and converts the result to text.
    pub fn eval_string(&self, expression: &str, scope: &Scope) -> Result<String> {
        self.eval(expression, scope).map(|value| display(&value))
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(false)
    }
}
