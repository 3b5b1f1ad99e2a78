//! Low-level scanning helpers shared by the statement pass and the compiler.

use crate::LexError;

pub(crate) fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

pub(crate) fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Returns true if `s` is a valid directive identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if is_ident_start(first) => chars.all(is_ident_char),
        _ => false,
    }
}

/// Finds the parenthesis closing the one at byte `open`.
///
/// Nested parentheses are counted and quoted strings (`'...'` or `"..."`,
/// with backslash escapes) are skipped, so `@if (x == ")")` balances.
/// Returns the byte index of the closing `)`.
pub fn find_matching_paren(text: &str, open: usize) -> Result<usize, LexError> {
    debug_assert_eq!(text.as_bytes().get(open), Some(&b'('));

    let mut depth = 0usize;
    let mut quote: Option<(char, usize)> = None;
    let mut escaped = false;

    for (i, c) in text[open..].char_indices() {
        let at = open + i;
        if let Some((q, _)) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some((c, at)),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(at);
                }
            }
            _ => {}
        }
    }

    match quote {
        Some((_, start)) => Err(LexError::UnterminatedString { offset: start }),
        None => Err(LexError::UnbalancedParens { offset: open }),
    }
}

/// Removes one pair of surrounding parentheses and trims the inside.
///
/// `"( 'a', b )"` becomes `"'a', b"`. Text without surrounding parentheses
/// is only trimmed.
pub fn strip_parens(args: &str) -> &str {
    let trimmed = args.trim();
    match trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => inner.trim(),
        None => trimmed,
    }
}

/// Splits an argument list on top-level commas.
///
/// Commas nested in brackets, braces, parentheses or quoted strings do not
/// split. Each argument is trimmed; an empty list yields no arguments.
///
/// ```rust
/// use stencil_lexer::split_arguments;
///
/// let args = split_arguments("'view', {'a': 1, 'b': [2, 3]}, 'x,y'");
/// assert_eq!(args, vec!["'view'", "{'a': 1, 'b': [2, 3]}", "'x,y'"]);
/// ```
pub fn split_arguments(list: &str) -> Vec<&str> {
    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in list.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                args.push(list[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }

    let last = list[start..].trim();
    if !last.is_empty() || !args.is_empty() {
        args.push(last);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers() {
        assert!(is_identifier("section"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("end-if"));
    }

    #[test]
    fn matching_paren_nested() {
        let text = "(a(b)c) tail";
        assert_eq!(find_matching_paren(text, 0), Ok(6));
    }

    #[test]
    fn matching_paren_skips_quoted() {
        let text = r#"(x == ")" and y == '(')"#;
        assert_eq!(find_matching_paren(text, 0), Ok(text.len() - 1));
    }

    #[test]
    fn matching_paren_escaped_quote() {
        let text = r"('it\'s')";
        assert_eq!(find_matching_paren(text, 0), Ok(text.len() - 1));
    }

    #[test]
    fn unbalanced_paren_reports_open_offset() {
        let text = "xx((a)";
        assert_eq!(
            find_matching_paren(text, 2),
            Err(LexError::UnbalancedParens { offset: 2 })
        );
    }

    #[test]
    fn unterminated_string_reported() {
        let text = "('abc)";
        assert_eq!(
            find_matching_paren(text, 0),
            Err(LexError::UnterminatedString { offset: 1 })
        );
    }

    #[test]
    fn strip_parens_trims() {
        assert_eq!(strip_parens(" ( 'a' ) "), "'a'");
        assert_eq!(strip_parens("plain"), "plain");
    }

    #[test]
    fn split_arguments_empty() {
        assert!(split_arguments("").is_empty());
        assert!(split_arguments("   ").is_empty());
    }

    #[test]
    fn split_arguments_single() {
        assert_eq!(split_arguments("'content'"), vec!["'content'"]);
    }

    #[test]
    fn split_arguments_nested() {
        assert_eq!(
            split_arguments("f(a, b), [1, 2], \"c\""),
            vec!["f(a, b)", "[1, 2]", "\"c\""]
        );
    }
}
