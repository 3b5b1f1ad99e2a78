//! Directive registry.
//!
//! Built-in directives are fixed and compiled into structural instructions.
//! Custom directives are text rewriters: at compile time the handler receives
//! the raw argument text (including its parentheses, or an empty string when
//! there are none) and returns template source that is compiled in its place.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use stencil_lexer::is_identifier;

use crate::error::DirectiveError;

/// A custom directive handler.
pub type DirectiveHandler = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Directives built into the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    If,
    ElseIf,
    Else,
    EndIf,
    Unless,
    EndUnless,
    ForEach,
    EndForEach,
    For,
    EndFor,
    While,
    EndWhile,
    Set,
    Section,
    EndSection,
    Stop,
    Show,
    Overwrite,
    Append,
    Yield,
    Parent,
    Extends,
    Include,
    Each,
}

const BUILTINS: &[(&str, Builtin)] = &[
    ("if", Builtin::If),
    ("elseif", Builtin::ElseIf),
    ("else", Builtin::Else),
    ("endif", Builtin::EndIf),
    ("unless", Builtin::Unless),
    ("endunless", Builtin::EndUnless),
    ("foreach", Builtin::ForEach),
    ("endforeach", Builtin::EndForEach),
    ("for", Builtin::For),
    ("endfor", Builtin::EndFor),
    ("while", Builtin::While),
    ("endwhile", Builtin::EndWhile),
    ("set", Builtin::Set),
    ("section", Builtin::Section),
    ("endsection", Builtin::EndSection),
    ("stop", Builtin::Stop),
    ("show", Builtin::Show),
    ("overwrite", Builtin::Overwrite),
    ("append", Builtin::Append),
    ("yield", Builtin::Yield),
    ("parent", Builtin::Parent),
    ("extends", Builtin::Extends),
    ("include", Builtin::Include),
    ("each", Builtin::Each),
];

static BUILTIN_INDEX: Lazy<HashMap<&'static str, Builtin>> =
    Lazy::new(|| BUILTINS.iter().copied().collect());

impl Builtin {
    /// Looks up a built-in by directive name.
    pub fn from_name(name: &str) -> Option<Builtin> {
        BUILTIN_INDEX.get(name).copied()
    }

    pub fn name(self) -> &'static str {
        BUILTINS
            .iter()
            .find(|(_, builtin)| *builtin == self)
            .map(|(name, _)| *name)
            .unwrap_or_default()
    }

    /// All built-in directive names.
    pub fn names() -> impl Iterator<Item = &'static str> {
        BUILTINS.iter().map(|(name, _)| *name)
    }
}

/// Custom directives, keyed by name.
#[derive(Clone, Default)]
pub struct DirectiveRegistry {
    custom: HashMap<String, DirectiveHandler>,
}

impl DirectiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a custom directive.
    ///
    /// Fails if the name is not an identifier, names a built-in, or is already
    /// registered. Directives cannot be replaced once registered.
    ///
    /// # Example
    ///
    /// ```rust
    /// use stencil::DirectiveRegistry;
    ///
    /// let mut registry = DirectiveRegistry::new();
    /// registry
    ///     .register("datetime", |args| format!("{{{{ {} | date }}}}", args))
    ///     .unwrap();
    /// assert!(registry.register("if", |_| String::new()).is_err());
    /// ```
    pub fn register<F>(&mut self, name: &str, handler: F) -> Result<(), DirectiveError>
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        if !is_identifier(name) {
            return Err(DirectiveError::InvalidName { name: name.to_string() });
        }
        if Builtin::from_name(name).is_some() || self.custom.contains_key(name) {
            return Err(DirectiveError::Collision { name: name.to_string() });
        }
        log::debug!("registered directive @{}", name);
        self.custom.insert(name.to_string(), Arc::new(handler));
        Ok(())
    }

    /// Handler for a custom directive.
    pub fn get(&self, name: &str) -> Option<&DirectiveHandler> {
        self.custom.get(name)
    }

    /// True if `name` is a built-in or registered directive.
    pub fn contains(&self, name: &str) -> bool {
        Builtin::from_name(name).is_some() || self.custom.contains_key(name)
    }

    /// Names of the registered custom directives, sorted.
    pub fn custom_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.custom.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for DirectiveRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectiveRegistry")
            .field("custom", &self.custom_names())
            .finish()
    }
}
