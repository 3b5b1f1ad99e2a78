//! Tag delimiter configuration.

use serde::{Deserialize, Serialize};

use crate::LexError;

/// Delimiters and statement marker recognized by the tokenizer.
///
/// Echo and comment tags share their outer delimiters by default; a comment is
/// distinguished by an additional `--` just inside each delimiter
/// (`{{-- like this --}}`).
///
/// # Example
///
/// ```rust
/// use stencil_lexer::TagConfig;
///
/// let tags = TagConfig {
///     statement_marker: '#',
///     ..TagConfig::default()
/// };
/// assert_eq!(tags.comment_delimiters(), ("{{--".to_string(), "--}}".to_string()));
/// assert!(tags.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagConfig {
    /// Opening delimiter of an unescaped echo.
    pub raw_open: String,
    /// Closing delimiter of an unescaped echo.
    pub raw_close: String,
    /// Opening delimiter of the legacy escaped echo.
    pub escaped_open: String,
    /// Closing delimiter of the legacy escaped echo.
    pub escaped_close: String,
    /// Opening delimiter of a content (escaped) echo.
    pub content_open: String,
    /// Closing delimiter of a content (escaped) echo.
    pub content_close: String,
    /// Outer opening delimiter of a comment (the `--` is added).
    pub comment_open: String,
    /// Outer closing delimiter of a comment (the `--` is added).
    pub comment_close: String,
    /// Character introducing a statement directive.
    pub statement_marker: char,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            raw_open: "{!!".to_string(),
            raw_close: "!!}".to_string(),
            escaped_open: "{{{".to_string(),
            escaped_close: "}}}".to_string(),
            content_open: "{{".to_string(),
            content_close: "}}".to_string(),
            comment_open: "{{".to_string(),
            comment_close: "}}".to_string(),
            statement_marker: '@',
        }
    }
}

impl TagConfig {
    /// Full comment delimiters, including the inner `--` markers.
    pub fn comment_delimiters(&self) -> (String, String) {
        (
            format!("{}--", self.comment_open),
            format!("--{}", self.comment_close),
        )
    }

    /// Checks that every delimiter is non-empty and the marker cannot start
    /// an identifier.
    pub fn validate(&self) -> Result<(), LexError> {
        let delimiters = [
            ("raw_open", &self.raw_open),
            ("raw_close", &self.raw_close),
            ("escaped_open", &self.escaped_open),
            ("escaped_close", &self.escaped_close),
            ("content_open", &self.content_open),
            ("content_close", &self.content_close),
            ("comment_open", &self.comment_open),
            ("comment_close", &self.comment_close),
        ];
        for (field, value) in delimiters {
            if value.trim().is_empty() {
                return Err(LexError::InvalidConfig(format!("{} must not be empty", field)));
            }
        }

        let marker = self.statement_marker;
        if marker.is_alphanumeric() || marker == '_' || marker.is_whitespace() {
            return Err(LexError::InvalidConfig(format!(
                "statement marker {:?} must not be an identifier or whitespace character",
                marker
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_tags() {
        let tags = TagConfig::default();
        assert_eq!(tags.raw_open, "{!!");
        assert_eq!(tags.escaped_close, "}}}");
        assert_eq!(tags.statement_marker, '@');
        assert!(tags.validate().is_ok());
    }

    #[test]
    fn rejects_empty_delimiter() {
        let tags = TagConfig {
            content_close: String::new(),
            ..TagConfig::default()
        };
        let err = tags.validate().unwrap_err();
        assert!(err.to_string().contains("content_close"));
    }

    #[test]
    fn rejects_identifier_marker() {
        let tags = TagConfig {
            statement_marker: 'x',
            ..TagConfig::default()
        };
        assert!(matches!(tags.validate(), Err(LexError::InvalidConfig(_))));
    }
}
