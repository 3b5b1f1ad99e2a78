//! Error types for compiling and rendering views.
//!
//! [`Error`] is the crate-level error returned by every public operation. The
//! narrower types ([`CompileError`], [`DirectiveError`], [`SectionStackError`])
//! are produced by the component that detects the failure and wrapped on the
//! way out.

use std::path::PathBuf;

use stencil_lexer::LexError;
use thiserror::Error;

/// Failures while turning template source into a compiled program.
///
/// Offsets are byte offsets into the compiled source text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// A tag or directive expression the tokenizer could not split.
    #[error(transparent)]
    Lex(#[from] LexError),

    /// A directive whose arguments do not have the required shape.
    #[error("malformed @{directive} at offset {offset}: {message}")]
    Malformed {
        directive: String,
        offset: usize,
        message: String,
    },

    /// A closing directive without its opener, or the other way around.
    #[error("@{found} at offset {offset} does not close an open block (expected {expected})")]
    UnexpectedClose {
        found: String,
        expected: String,
        offset: usize,
    },

    /// A control block still open when the template ends.
    #[error("@{directive} opened at offset {offset} is never closed")]
    UnclosedBlock { directive: String, offset: usize },

    /// `@show` with no section opened earlier in the same template.
    #[error("@show at offset {offset} has no open @section")]
    ShowWithoutSection { offset: usize },

    /// An echo tag with nothing inside it.
    #[error("empty echo at offset {offset}")]
    EmptyEcho { offset: usize },

    /// Custom directives expanding into custom directives too many times.
    #[error("expansion of @{directive} at offset {offset} exceeds depth {limit}")]
    ExpansionTooDeep {
        directive: String,
        offset: usize,
        limit: usize,
    },

    /// A failure inside the text a custom directive expanded into.
    #[error("in expansion of @{directive} at offset {offset}: {source}")]
    Expansion {
        directive: String,
        offset: usize,
        source: Box<CompileError>,
    },
}

impl CompileError {
    /// Byte offset of the failure, if known.
    pub fn offset(&self) -> Option<usize> {
        match self {
            CompileError::Lex(err) => err.offset(),
            CompileError::Malformed { offset, .. }
            | CompileError::UnexpectedClose { offset, .. }
            | CompileError::UnclosedBlock { offset, .. }
            | CompileError::ShowWithoutSection { offset }
            | CompileError::EmptyEcho { offset }
            | CompileError::ExpansionTooDeep { offset, .. }
            | CompileError::Expansion { offset, .. } => Some(*offset),
        }
    }

    pub(crate) fn malformed(directive: &str, offset: usize, message: impl Into<String>) -> Self {
        CompileError::Malformed {
            directive: directive.to_string(),
            offset,
            message: message.into(),
        }
    }
}

/// Failures registering a custom directive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectiveError {
    /// The name belongs to a built-in directive or is already registered.
    #[error("directive @{name} is already defined")]
    Collision { name: String },

    /// The name is not an identifier.
    #[error("invalid directive name {name:?}")]
    InvalidName { name: String },
}

/// Misuse of the section stack at render time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SectionStackError {
    /// A close or append with no open section.
    #[error("cannot @{operation}: no section is open")]
    EmptyStack { operation: &'static str },

    /// A section opened while a section of the same name is still open.
    #[error("section {name:?} is already open")]
    AlreadyOpen { name: String },

    /// Sections still open when their view finished rendering.
    #[error("unclosed section(s): {}", .names.join(", "))]
    Unclosed { names: Vec<String> },
}

/// Failures of the compiled-program cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to access cached program for {identity}: {source}")]
    Io {
        identity: String,
        source: std::io::Error,
    },

    #[error("cached program for {identity} is unreadable: {source}")]
    Corrupt {
        identity: String,
        source: serde_json::Error,
    },

    #[error("no cached program for {identity}")]
    Missing { identity: String },
}

/// Error type for all view operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A template failed to compile.
    #[error("failed to compile {view}: {source}")]
    Compile {
        view: String,
        #[source]
        source: CompileError,
    },

    #[error(transparent)]
    Directive(#[from] DirectiveError),

    #[error(transparent)]
    Section(#[from] SectionStackError),

    /// No finder location matches the logical name.
    #[error("view [{name}] not found")]
    ViewNotFound { name: String },

    /// A failure while executing a view, annotated with that view.
    #[error("{source} (View: {view})")]
    Render {
        view: String,
        #[source]
        source: Box<Error>,
    },

    /// An expression failed to parse or evaluate.
    #[error("cannot evaluate `{expression}`: {source}")]
    Expression {
        expression: String,
        #[source]
        source: minijinja::Error,
    },

    /// A name that is not bound, with strict variables enabled.
    #[error("undefined value `{expression}`")]
    Undefined { expression: String },

    /// A loop ran past the configured iteration limit.
    #[error("loop exceeded {limit} iterations")]
    LoopLimit { limit: usize },

    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Reading a template or configuration file failed.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration could not be parsed or is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Strips every [`Error::Render`] annotation and returns the failure
    /// underneath.
    pub fn root_cause(&self) -> &Error {
        let mut current = self;
        while let Error::Render { source, .. } = current {
            current = source.as_ref();
        }
        current
    }

    /// Identity of the innermost view the error was raised in, if any.
    pub fn view(&self) -> Option<&str> {
        let mut found = None;
        let mut current = self;
        loop {
            match current {
                Error::Render { view, source } => {
                    found = Some(view.as_str());
                    current = source.as_ref();
                }
                Error::Compile { view, .. } => return Some(view.as_str()),
                _ => return found,
            }
        }
    }

    /// Annotates the error with the view it was raised in, unless an inner
    /// view already did.
    pub(crate) fn in_view(self, view: &str) -> Error {
        match self {
            err @ Error::Render { .. } => err,
            err => Error::Render {
                view: view.to_string(),
                source: Box::new(err),
            },
        }
    }

    pub(crate) fn expression(expression: &str, source: minijinja::Error) -> Error {
        Error::Expression {
            expression: expression.to_string(),
            source,
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type for view operations.
pub type Result<T> = std::result::Result<T, Error>;
