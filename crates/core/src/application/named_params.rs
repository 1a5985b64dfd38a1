// Named parameter rewrite and statement splitting
//
// `$name` placeholders become positional `$1..$n`. String literals, quoted
// identifiers, comments and dollar-quoted bodies are copied verbatim.

use crate::domain::error::{DomainError, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Positional SQL plus its parameters, in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct Rewritten {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Rewrite `$name` placeholders to `$1..$n`.
///
/// A name used more than once keeps the index of its first appearance.
/// `named_params` must be a JSON object or null.
pub fn rewrite(template: &str, named_params: &Value) -> Result<Rewritten> {
    let empty = Map::new();
    let named = match named_params {
        Value::Null => &empty,
        Value::Object(map) => map,
        other => {
            return Err(DomainError::Validation(format!(
                "named parameters should be an object, got {}",
                other
            )))
        }
    };

    let bytes = template.as_bytes();
    let mut sql = String::with_capacity(template.len());
    let mut params = Vec::new();
    let mut indexes: HashMap<&str, usize> = HashMap::new();
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if let Some(end) = skip_literal(bytes, i) {
            i = end;
            continue;
        }
        if bytes[i] == b'$' && bytes.get(i + 1).is_some_and(|&b| is_ident_start(b)) {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && is_ident_continue(bytes[end]) {
                end += 1;
            }
            let name = &template[start..end];
            let index = match indexes.get(name) {
                Some(&index) => index,
                None => {
                    let value = named.get(name).ok_or_else(|| {
                        DomainError::Validation(format!("missing named parameter `{}`", name))
                    })?;
                    params.push(value.clone());
                    indexes.insert(name, params.len());
                    params.len()
                }
            };
            sql.push_str(&template[copied..i]);
            sql.push('$');
            sql.push_str(&index.to_string());
            copied = end;
            i = end;
            continue;
        }
        i += 1;
    }
    sql.push_str(&template[copied..]);

    Ok(Rewritten { sql, params })
}

/// Split on top-level `;`. Statements holding nothing but whitespace and
/// comments are dropped; the rest are trimmed.
pub fn split_statements(sql: &str) -> Vec<&str> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_code = false;
    let mut i = 0;

    while i < bytes.len() {
        if let Some(end) = skip_literal(bytes, i) {
            if !is_comment_start(bytes, i) {
                has_code = true;
            }
            i = end;
            continue;
        }
        match bytes[i] {
            b';' => {
                if has_code {
                    statements.push(sql[start..i].trim());
                }
                start = i + 1;
                has_code = false;
            }
            b if b.is_ascii_whitespace() => {}
            _ => has_code = true,
        }
        i += 1;
    }
    if has_code {
        statements.push(sql[start..].trim());
    }

    statements
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_comment_start(sql: &[u8], i: usize) -> bool {
    matches!(
        (sql[i], sql.get(i + 1)),
        (b'-', Some(b'-')) | (b'/', Some(b'*'))
    )
}

/// End (exclusive) of the literal, quoted identifier, comment or dollar-quoted
/// body starting at `i`. An unterminated one runs to the end of input.
fn skip_literal(sql: &[u8], i: usize) -> Option<usize> {
    match sql[i] {
        quote @ (b'\'' | b'"') => {
            let escapes = quote == b'\'' && is_escape_string(sql, i);
            let mut j = i + 1;
            while j < sql.len() {
                if escapes && sql[j] == b'\\' {
                    j += 2;
                    continue;
                }
                if sql[j] == quote {
                    // doubled quote is an escaped quote
                    if sql.get(j + 1) == Some(&quote) {
                        j += 2;
                        continue;
                    }
                    return Some(j + 1);
                }
                j += 1;
            }
            Some(sql.len())
        }
        b'-' if sql.get(i + 1) == Some(&b'-') => Some(
            sql[i..]
                .iter()
                .position(|&b| b == b'\n')
                .map_or(sql.len(), |p| i + p),
        ),
        b'/' if sql.get(i + 1) == Some(&b'*') => {
            Some(find(sql, i + 2, b"*/").map_or(sql.len(), |p| p + 2))
        }
        b'$' => {
            let mut j = i + 1;
            if j < sql.len() && is_ident_start(sql[j]) {
                while j < sql.len() && is_ident_continue(sql[j]) {
                    j += 1;
                }
            }
            if sql.get(j) != Some(&b'$') {
                return None;
            }
            let tag = &sql[i..=j];
            Some(find(sql, j + 1, tag).map_or(sql.len(), |p| p + tag.len()))
        }
        _ => None,
    }
}

/// `E'...'` / `e'...'`: the prefix must not end a longer identifier
fn is_escape_string(sql: &[u8], quote: usize) -> bool {
    match quote.checked_sub(1).map(|p| (p, sql[p])) {
        Some((p, b'E' | b'e')) => p == 0 || !is_ident_continue(sql[p - 1]),
        _ => false,
    }
}

fn find(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| from + p)
}
