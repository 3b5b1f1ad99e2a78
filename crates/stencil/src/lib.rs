//! # Stencil - Directive Templates with Layout Composition
//!
//! `stencil` compiles templates written with `@directive` statements and
//! `{{ }}` echoes into an instruction program, caches the program per source,
//! and renders it against view data. Views compose through layouts
//! (`@extends`), named sections (`@section` / `@yield`) and partials
//! (`@include`, `@each`).
//!
//! ## Core Concepts
//!
//! - [`Factory`]: The rendering environment: finder, cache, directives,
//!   shared data and section state
//! - [`View`]: A resolved template plus its [`Data`]
//! - [`Compiler`]: Turns template text into a [`CompiledProgram`]
//! - [`Sections`]: The section stack and completed sections of one render tree
//! - [`ViewFinder`]: Maps view names to sources ([`FileViewFinder`], [`MemoryFinder`])
//! - [`CompiledCache`]: Stores compiled programs ([`FileCache`], [`MemoryCache`])
//!
//! ## Quick Start
//!
//! ```rust
//! use serde_json::json;
//! use stencil::{Factory, MemoryFinder};
//!
//! let finder = MemoryFinder::new().with(
//!     "greeting",
//!     "@if(items)@foreach(items as item)<li>{{ item }}</li>@endforeach @else empty @endif",
//! );
//! let env = Factory::new(finder);
//!
//! let html = env.make("greeting", json!({"items": ["a", "<b>"]})).unwrap().render(&env).unwrap();
//! assert_eq!(html, "<li>a</li><li>&lt;b&gt;</li> ");
//! ```
//!
//! ## Template Syntax
//!
//! | Syntax | Meaning |
//! |--------|---------|
//! | `{{ expr }}` | Escaped output |
//! | `{!! expr !!}` | Raw output |
//! | `{{-- note --}}` | Comment, removed |
//! | `{{{ expr }}}` | Escaped output (legacy form) |
//! | `@name(args)` | Directive |
//! | `@@name` | Literal `@name` |
//!
//! Expressions use the minijinja expression language.
//!
//! ## Custom Directives
//!
//! A custom directive receives its raw argument text and returns template
//! text, which is compiled in its place:
//!
//! ```rust
//! use stencil::{Factory, MemoryFinder};
//!
//! let mut env = Factory::new(MemoryFinder::new().with("page", "@shout('hi')"));
//! env.directive("shout", |args| format!("{{{{ {} | upper }}}}", args)).unwrap();
//! assert_eq!(env.make("page", stencil::Data::new()).unwrap().render(&env).unwrap(), "HI");
//! ```

pub mod cache;
pub mod compiler;
pub mod config;
pub mod directive;
mod error;
pub mod executor;
pub mod expr;
pub mod factory;
pub mod finder;
pub mod program;
pub mod sections;
pub mod view;

pub use cache::{is_stale, CompiledCache, FileCache, MemoryCache};
pub use compiler::{Compiler, DEFAULT_MAX_EXPANSION_DEPTH};
pub use config::Config;
pub use directive::{Builtin, DirectiveHandler, DirectiveRegistry};
pub use error::{CacheError, CompileError, DirectiveError, Error, Result, SectionStackError};
pub use executor::get_or_compile;
pub use expr::{html_escape, Escaper, Evaluator, Scope};
pub use factory::{Factory, RAW_FALLBACK_PREFIX};
pub use finder::{
    load_file, split_namespace, FileViewFinder, MemoryFinder, TemplateSource, ViewFinder, NAMESPACE_DELIMITER,
    VIEW_EXTENSIONS,
};
pub use program::{Assignment, CloseMode, CompiledProgram, EscapeMode, Instruction};
pub use sections::Sections;
pub use view::{Binding, Data, View};

// Lexer types
pub use stencil_lexer::{EchoKind, LexError, TagConfig, TagKind, Token, Tokenizer};
