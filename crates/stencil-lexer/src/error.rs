//! Error types for the tokenizer.

use std::fmt;

use thiserror::Error;

/// The tag grammar a delimiter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Comment,
    RawEcho,
    EscapedEcho,
    ContentEcho,
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TagKind::Comment => "comment",
            TagKind::RawEcho => "raw echo",
            TagKind::EscapedEcho => "escaped echo",
            TagKind::ContentEcho => "echo",
        };
        f.write_str(name)
    }
}

/// Errors raised while splitting template source into tokens.
///
/// Offsets are byte offsets into the text handed to the tokenizer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    /// An opening delimiter without its closing counterpart.
    #[error("unclosed {kind} tag `{open}` at offset {offset}")]
    UnclosedTag {
        kind: TagKind,
        open: String,
        offset: usize,
    },

    /// A directive expression whose parentheses never balance.
    #[error("unbalanced parentheses in directive expression at offset {offset}")]
    UnbalancedParens { offset: usize },

    /// A quoted string inside a directive expression that never ends.
    #[error("unterminated string in directive expression at offset {offset}")]
    UnterminatedString { offset: usize },

    /// The tag configuration cannot be used.
    #[error("invalid tag configuration: {0}")]
    InvalidConfig(String),
}

impl LexError {
    /// Byte offset of the failure, if it has one.
    pub fn offset(&self) -> Option<usize> {
        match self {
            LexError::UnclosedTag { offset, .. }
            | LexError::UnbalancedParens { offset }
            | LexError::UnterminatedString { offset } => Some(*offset),
            LexError::InvalidConfig(_) => None,
        }
    }

    /// Shifts the recorded offset, used when lexing a slice of a larger text.
    pub(crate) fn shifted(self, by: usize) -> Self {
        match self {
            LexError::UnclosedTag { kind, open, offset } => LexError::UnclosedTag {
                kind,
                open,
                offset: offset + by,
            },
            LexError::UnbalancedParens { offset } => LexError::UnbalancedParens {
                offset: offset + by,
            },
            LexError::UnterminatedString { offset } => LexError::UnterminatedString {
                offset: offset + by,
            },
            other => other,
        }
    }
}

/// Converts a byte offset into a 1-based `(line, column)` pair.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source[..floor_char_boundary(source, offset)];
    let line = before.matches('\n').count() + 1;
    let column = match before.rfind('\n') {
        Some(newline) => before[newline + 1..].chars().count() + 1,
        None => before.chars().count() + 1,
    };
    (line, column)
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
