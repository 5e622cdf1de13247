//! Inline routing directives: `/*# group=g1 */ SELECT ...` or
//! `/*# table=db.orders key=42 */ ...` placed at the head of a statement.

use shardgate_common::error::{Error, Result};

const MAX_VALUE_LEN: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveMode {
    ReadWrite,
    ReadOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveScope {
    Local,
    Global,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingDirective {
    pub mode: Option<DirectiveMode>,
    pub scope: Option<DirectiveScope>,
    /// `transaction=SINGLE_NODE`
    pub single_node: bool,
    pub group: Option<String>,
    pub table: Option<String>,
    pub key: Option<String>,
}

impl RoutingDirective {
    /// `table` and `group` cannot be combined.
    pub fn is_valid(&self) -> bool {
        !(self.table.is_some() && self.group.is_some())
    }
}

fn directive_error() -> Error {
    Error::unparsable("comment error, unknown property")
}

fn tokenize(body: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = body.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if c.is_whitespace() {
            continue;
        }
        if c == '=' {
            tokens.push("=".to_string());
            continue;
        }
        if c == '"' {
            let mut end = None;
            for (i, c) in chars.by_ref() {
                if c == '"' {
                    end = Some(i);
                    break;
                }
            }
            let end = end.ok_or_else(directive_error)?;
            tokens.push(body[start..=end].to_string());
            continue;
        }
        let mut end = start + c.len_utf8();
        while let Some(&(i, next)) = chars.peek() {
            if next.is_whitespace() || next == '=' {
                break;
            }
            end = i + next.len_utf8();
            chars.next();
        }
        tokens.push(body[start..end].to_string());
    }
    Ok(tokens)
}

fn unquote(token: &str) -> &str {
    if token.len() >= 2 && token.starts_with('"') && token.ends_with('"') {
        &token[1..token.len() - 1]
    } else {
        token
    }
}

/// Extracts the directive at the head of `sql`, if any.
///
/// Returns an unparsable error for malformed directives so the statement is
/// refused instead of being routed as if the directive were absent.
pub fn parse_directive(sql: &str) -> Result<Option<RoutingDirective>> {
    let Some(rest) = sql.trim_start().strip_prefix("/*#") else {
        return Ok(None);
    };
    let end = rest.find("*/").ok_or_else(directive_error)?;
    let tokens = tokenize(&rest[..end])?;

    let mut directive = RoutingDirective::default();
    let mut iter = tokens.iter();
    while let Some(key) = iter.next() {
        if iter.next().map(String::as_str) != Some("=") {
            return Err(directive_error());
        }
        let raw = iter.next().ok_or_else(directive_error)?;
        if raw.len() > MAX_VALUE_LEN {
            return Err(directive_error());
        }
        let value = unquote(raw);
        match key.to_ascii_lowercase().as_str() {
            "group" => directive.group = Some(value.to_string()),
            "table" => directive.table = Some(value.to_string()),
            "key" => directive.key = Some(value.to_string()),
            "mode" => {
                directive.mode = Some(match value.to_ascii_uppercase().as_str() {
                    "READWRITE" => DirectiveMode::ReadWrite,
                    "READONLY" => DirectiveMode::ReadOnly,
                    _ => return Err(directive_error()),
                })
            }
            "scope" => {
                directive.scope = Some(match value.to_ascii_uppercase().as_str() {
                    "SCOPE_LOCAL" => DirectiveScope::Local,
                    "SCOPE_GLOBAL" => DirectiveScope::Global,
                    _ => return Err(directive_error()),
                })
            }
            "transaction" => {
                if !value.eq_ignore_ascii_case("SINGLE_NODE") {
                    return Err(directive_error());
                }
                directive.single_node = true;
            }
            _ => return Err(directive_error()),
        }
    }
    if !directive.is_valid() {
        return Err(directive_error());
    }
    Ok(Some(directive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_directive() {
        assert_eq!(parse_directive("SELECT 1").unwrap(), None);
        assert_eq!(parse_directive("/* plain */ SELECT 1").unwrap(), None);
    }

    #[test]
    fn group_directive() {
        let d = parse_directive("  /*# group=data2 */ SELECT * FROM t").unwrap().unwrap();
        assert_eq!(d.group.as_deref(), Some("data2"));
        assert!(d.table.is_none());
    }

    #[test]
    fn table_and_quoted_key() {
        let d = parse_directive(r#"/*# table = "shop.orders" key="a b" */ DELETE FROM orders"#)
            .unwrap()
            .unwrap();
        assert_eq!(d.table.as_deref(), Some("shop.orders"));
        assert_eq!(d.key.as_deref(), Some("a b"));
    }

    #[test]
    fn mode_and_transaction() {
        let d = parse_directive("/*# mode=READONLY transaction=single_node */ SELECT 1")
            .unwrap()
            .unwrap();
        assert_eq!(d.mode, Some(DirectiveMode::ReadOnly));
        assert!(d.single_node);
    }

    #[test]
    fn rejects_bad_directives() {
        assert!(parse_directive("/*# group=a table=b */ SELECT 1").is_err());
        assert!(parse_directive("/*# color=red */ SELECT 1").is_err());
        assert!(parse_directive("/*# group */ SELECT 1").is_err());
        assert!(parse_directive("/*# group=a SELECT 1").is_err());
    }
}
