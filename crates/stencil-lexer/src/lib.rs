//! Tag tokenizer for stencil templates.
//!
//! This crate splits template source into a flat list of tokens: literal text,
//! echo tags and statement directives. It knows nothing about what a directive
//! means; the caller supplies a predicate telling it which identifiers are
//! directives.
//!
//! # Example
//!
//! ```rust
//! use stencil_lexer::{EchoKind, TagConfig, Token, Tokenizer};
//!
//! let tags = TagConfig::default();
//! let tokens = Tokenizer::new(&tags)
//!     .tokenize("Hi {{ name }}! @if(x) yes @endif", |name| matches!(name, "if" | "endif"))
//!     .unwrap();
//!
//! let kinds: Vec<_> = tokens.iter().map(|t| &t.token).collect();
//! assert_eq!(kinds[0], &Token::Text("Hi "));
//! assert_eq!(kinds[1], &Token::Echo { expression: "name", kind: EchoKind::Content });
//! assert_eq!(kinds[3], &Token::Statement { name: "if", args: Some("(x)") });
//! ```
//!
//! # Passes
//!
//! Tokenizing runs ordered passes. Each pass only looks at the text pieces left
//! over by the previous ones, never inside tags an earlier pass produced:
//!
//! 1. Comments (`{{-- ... --}}`) are removed.
//! 2. Raw echoes (`{!! ... !!}`).
//! 3. Legacy escaped echoes (`{{{ ... }}}`).
//! 4. Content echoes (`{{ ... }}`).
//! 5. Statements: marker, identifier, optional parenthesized expression.
//!
//! An opening delimiter without its closer is an error. A closing delimiter on
//! its own is ordinary text.
//!
//! # Statements
//!
//! - `@name` or `@name(expr)` (spaces or tabs may precede the parenthesis)
//!   becomes [`Token::Statement`] when `name` is a directive.
//! - Unknown identifiers stay literal text, so prose may mention `@handles`.
//! - A marker right after an identifier character is not a statement
//!   (`user@example.com`).
//! - `@@name` becomes [`Token::EscapedStatement`].

mod config;
mod error;
mod scan;

pub use config::TagConfig;
pub use error::{line_col, LexError, TagKind};
pub use scan::{find_matching_paren, is_identifier, split_arguments, strip_parens};

use scan::is_ident_char;

/// Which echo grammar produced an echo token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoKind {
    /// `{!! expr !!}`: output is not escaped.
    Raw,
    /// `{{{ expr }}}`: legacy syntax, escaped.
    Escaped,
    /// `{{ expr }}`: escaped.
    Content,
}

/// Token types produced by the tokenizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// Literal text, preserved verbatim.
    Text(&'a str),
    /// An echo tag; `expression` is trimmed.
    Echo { expression: &'a str, kind: EchoKind },
    /// A directive. `args` includes the surrounding parentheses.
    Statement { name: &'a str, args: Option<&'a str> },
    /// `@@name`; carries `name`.
    EscapedStatement(&'a str),
}

/// A token together with the byte offset where it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned<'a> {
    pub token: Token<'a>,
    pub offset: usize,
}

impl<'a> Spanned<'a> {
    fn new(token: Token<'a>, offset: usize) -> Self {
        Self { token, offset }
    }
}

/// Tokenizer for one tag configuration.
#[derive(Debug, Clone, Copy)]
pub struct Tokenizer<'c> {
    tags: &'c TagConfig,
}

impl<'c> Tokenizer<'c> {
    pub fn new(tags: &'c TagConfig) -> Self {
        Self { tags }
    }

    /// Splits `source` into tokens.
    ///
    /// `is_directive` decides which identifiers following the statement
    /// marker are directives; only those have their expression scanned.
    pub fn tokenize<'a, F>(&self, source: &'a str, is_directive: F) -> Result<Vec<Spanned<'a>>, LexError>
    where
        F: Fn(&str) -> bool,
    {
        let tags = self.tags;
        let (comment_open, comment_close) = tags.comment_delimiters();

        let pieces = vec![Spanned::new(Token::Text(source), 0)];

        let pieces = each_text(pieces, |text, base, out| {
            split_delimited(text, base, &comment_open, &comment_close, TagKind::Comment, out, |_| None)
        })?;
        let pieces = each_text(pieces, |text, base, out| {
            split_delimited(text, base, &tags.raw_open, &tags.raw_close, TagKind::RawEcho, out, |e| {
                Some(Token::Echo { expression: e, kind: EchoKind::Raw })
            })
        })?;
        let pieces = each_text(pieces, |text, base, out| {
            split_delimited(
                text,
                base,
                &tags.escaped_open,
                &tags.escaped_close,
                TagKind::EscapedEcho,
                out,
                |e| Some(Token::Echo { expression: e, kind: EchoKind::Escaped }),
            )
        })?;
        let pieces = each_text(pieces, |text, base, out| {
            split_delimited(
                text,
                base,
                &tags.content_open,
                &tags.content_close,
                TagKind::ContentEcho,
                out,
                |e| Some(Token::Echo { expression: e, kind: EchoKind::Content }),
            )
        })?;
        let pieces = each_text(pieces, |text, base, out| {
            split_statements(text, base, tags.statement_marker, &is_directive, out)
        })?;

        Ok(pieces
            .into_iter()
            .filter(|piece| !matches!(piece.token, Token::Text("")))
            .collect())
    }
}

/// Runs `f` over every text piece, passing other tokens through untouched.
fn each_text<'a, F>(pieces: Vec<Spanned<'a>>, mut f: F) -> Result<Vec<Spanned<'a>>, LexError>
where
    F: FnMut(&'a str, usize, &mut Vec<Spanned<'a>>) -> Result<(), LexError>,
{
    let mut out = Vec::with_capacity(pieces.len());
    for piece in pieces {
        match piece.token {
            Token::Text(text) => f(text, piece.offset, &mut out)?,
            _ => out.push(piece),
        }
    }
    Ok(out)
}

/// Splits `text` on `open ... close` pairs, emitting whatever `make` returns
/// for each trimmed inner slice (nothing, for comments).
fn split_delimited<'a>(
    text: &'a str,
    base: usize,
    open: &str,
    close: &str,
    kind: TagKind,
    out: &mut Vec<Spanned<'a>>,
    make: impl Fn(&'a str) -> Option<Token<'a>>,
) -> Result<(), LexError> {
    let mut pos = 0;

    while let Some(rel) = text[pos..].find(open) {
        let start = pos + rel;
        if start > pos {
            out.push(Spanned::new(Token::Text(&text[pos..start]), base + pos));
        }

        let inner_start = start + open.len();
        let Some(close_rel) = text[inner_start..].find(close) else {
            return Err(LexError::UnclosedTag {
                kind,
                open: open.to_string(),
                offset: base + start,
            });
        };

        let inner = &text[inner_start..inner_start + close_rel];
        if let Some(token) = make(inner.trim()) {
            out.push(Spanned::new(token, base + start));
        }
        pos = inner_start + close_rel + close.len();
    }

    if pos < text.len() {
        out.push(Spanned::new(Token::Text(&text[pos..]), base + pos));
    }
    Ok(())
}

fn ident_len(s: &str) -> usize {
    let mut chars = s.char_indices();
    match chars.next() {
        Some((_, c)) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return 0,
    }
    chars
        .find(|&(_, c)| !is_ident_char(c))
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

fn split_statements<'a>(
    text: &'a str,
    base: usize,
    marker: char,
    is_directive: &dyn Fn(&str) -> bool,
    out: &mut Vec<Spanned<'a>>,
) -> Result<(), LexError> {
    let marker_len = marker.len_utf8();
    let mut literal_start = 0;
    let mut pos = 0;

    let flush = |out: &mut Vec<Spanned<'a>>, from: usize, to: usize| {
        if to > from {
            out.push(Spanned::new(Token::Text(&text[from..to]), base + from));
        }
    };

    while let Some(rel) = text[pos..].find(marker) {
        let at = pos + rel;
        let after = at + marker_len;

        // A statement may follow another directly; only literal text counts.
        if at > literal_start && text[..at].chars().next_back().is_some_and(is_ident_char) {
            pos = after;
            continue;
        }

        if text[after..].starts_with(marker) {
            let name_start = after + marker_len;
            let len = ident_len(&text[name_start..]);
            if len == 0 {
                pos = after;
                continue;
            }
            flush(out, literal_start, at);
            out.push(Spanned::new(
                Token::EscapedStatement(&text[name_start..name_start + len]),
                base + at,
            ));
            pos = name_start + len;
            literal_start = pos;
            continue;
        }

        let len = ident_len(&text[after..]);
        if len == 0 {
            pos = after;
            continue;
        }
        let name = &text[after..after + len];
        let mut end = after + len;
        if !is_directive(name) {
            pos = end;
            continue;
        }

        let rest = &text[end..];
        let gap = rest.len() - rest.trim_start_matches([' ', '\t']).len();
        let args = if text[end + gap..].starts_with('(') {
            let open = end + gap;
            let close = find_matching_paren(text, open).map_err(|e| e.shifted(base))?;
            end = close + 1;
            Some(&text[open..=close])
        } else {
            None
        };

        flush(out, literal_start, at);
        out.push(Spanned::new(Token::Statement { name, args }, base + at));
        pos = end;
        literal_start = end;
    }

    flush(out, literal_start, text.len());
    Ok(())
}
