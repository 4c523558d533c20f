// periscope/periscope/src/resolve/path.rs
//
// Copyright (c) 2025 Periscope Contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Path expression tokenizer.
//!
//! A path selects a value in a registered namespace by chaining accessors:
//!
//! ```text
//! app.users[0].email
//! config['log-level']
//! jobs[-1].status
//! ```
//!
//! The grammar is `root ('.' ident | '[' (int | quoted-string) ']')*` with
//! single- or double-quoted keys. Tokenizing fails fast on the first bad
//! segment, naming it exactly.

use crate::error::{EngineError, Result};

/// One step of a path: attribute access, integer indexing (negative counts
/// from the end), or string-keyed lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accessor {
    Attr(String),
    Index(i64),
    Key(String),
}

impl std::fmt::Display for Accessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Accessor::Attr(name) => write!(f, ".{name}"),
            Accessor::Index(i) => write!(f, "[{i}]"),
            Accessor::Key(k) => write!(f, "[{k:?}]"),
        }
    }
}

fn syntax_error(segment: impl Into<String>, partial: &str, message: impl Into<String>) -> EngineError {
    EngineError::PathResolution {
        segment: segment.into(),
        partial: partial.to_string(),
        message: message.into(),
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Tokenizes a path expression into its root name and accessor chain.
pub fn parse_path(path: &str) -> Result<(String, Vec<Accessor>)> {
    let path = path.trim();
    let mut chars = path.char_indices().peekable();

    let root = take_ident(&mut chars, path)
        .ok_or_else(|| syntax_error(path, "", "path must start with a namespace name"))?;

    let mut accessors = Vec::new();
    while let Some(&(pos, c)) = chars.peek() {
        let partial = &path[..pos];
        match c {
            '.' => {
                chars.next();
                let name = take_ident(&mut chars, path).ok_or_else(|| {
                    syntax_error(&path[pos..], partial, "expected attribute name after `.`")
                })?;
                accessors.push(Accessor::Attr(name));
            }
            '[' => {
                chars.next();
                accessors.push(take_bracket(&mut chars, path, pos)?);
            }
            _ => {
                return Err(syntax_error(
                    &path[pos..],
                    partial,
                    format!("unexpected character `{c}`"),
                ));
            }
        }
    }

    Ok((root, accessors))
}

fn take_ident(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    path: &str,
) -> Option<String> {
    let &(start, first) = chars.peek()?;
    if !is_ident_start(first) {
        return None;
    }
    let mut end = start;
    while let Some(&(pos, c)) = chars.peek() {
        if is_ident_continue(c) {
            end = pos + c.len_utf8();
            chars.next();
        } else {
            break;
        }
    }
    Some(path[start..end].to_string())
}

fn take_bracket(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    path: &str,
    open: usize,
) -> Result<Accessor> {
    let partial = &path[..open];
    let segment = || {
        // Up to and including the matching bracket, or the rest of the path.
        match path[open..].find(']') {
            Some(close) => &path[open..=open + close],
            None => &path[open..],
        }
    };

    let accessor = match chars.peek() {
        Some(&(_, quote)) if quote == '\'' || quote == '"' => {
            chars.next();
            let mut key = String::new();
            loop {
                match chars.next() {
                    Some((_, c)) if c == quote => break,
                    Some((_, c)) => key.push(c),
                    None => {
                        return Err(syntax_error(segment(), partial, "unterminated string key"));
                    }
                }
            }
            Accessor::Key(key)
        }
        Some(&(_, c)) if c == '-' || c.is_ascii_digit() => {
            let mut digits = String::new();
            if c == '-' {
                digits.push('-');
                chars.next();
            }
            while let Some(&(_, d)) = chars.peek() {
                if d.is_ascii_digit() {
                    digits.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let index: i64 = digits
                .parse()
                .map_err(|_| syntax_error(segment(), partial, "invalid integer index"))?;
            Accessor::Index(index)
        }
        _ => {
            return Err(syntax_error(
                segment(),
                partial,
                "expected an integer index or a quoted key",
            ));
        }
    };

    match chars.next() {
        Some((_, ']')) => Ok(accessor),
        _ => Err(syntax_error(segment(), partial, "expected closing `]`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_root() {
        let (root, accessors) = parse_path("app").unwrap();
        assert_eq!(root, "app");
        assert!(accessors.is_empty());
    }

    #[test]
    fn test_attr_index_key_chain() {
        let (root, accessors) = parse_path("app.users[0].email").unwrap();
        assert_eq!(root, "app");
        assert_eq!(
            accessors,
            vec![
                Accessor::Attr("users".to_string()),
                Accessor::Index(0),
                Accessor::Attr("email".to_string()),
            ]
        );

        let (_, accessors) = parse_path(r#"cfg['log-level']["x"]"#).unwrap();
        assert_eq!(
            accessors,
            vec![
                Accessor::Key("log-level".to_string()),
                Accessor::Key("x".to_string()),
            ]
        );
    }

    #[test]
    fn test_negative_index() {
        let (_, accessors) = parse_path("jobs[-1]").unwrap();
        assert_eq!(accessors, vec![Accessor::Index(-1)]);
    }

    #[test]
    fn test_error_names_failing_segment() {
        let err = parse_path("app.users[zzz]").unwrap_err();
        match err {
            EngineError::PathResolution { segment, partial, .. } => {
                assert_eq!(segment, "[zzz]");
                assert_eq!(partial, "app.users");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unterminated_bracket() {
        assert!(parse_path("app.users[0").is_err());
        assert!(parse_path("app.users['k").is_err());
        assert!(parse_path("app.").is_err());
        assert!(parse_path("[0]").is_err());
    }
}
