//! Call-style signatures: `name(a, b=default, @art, @out=/path)`.
//!
//! Template keys declare signatures. Step and task entries use the same
//! grammar for calls, optionally qualified with an external collection
//! (`lib/echo(x)`, `cluster:lib/echo(x)`).

use std::collections::HashSet;
use std::fmt;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::params::{ParamSet, Parameter, ARTIFACT_SIGIL};

const CLUSTER_PREFIX: &str = "cluster:";

/// A parsed declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub name: String,
    pub params: ParamSet,
}

/// External template collection a call refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Qualifier {
    pub name: String,
    pub cluster_scope: bool,
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cluster_scope {
            write!(f, "{}{}", CLUSTER_PREFIX, self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// Template a call resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateTarget {
    Local(String),
    External { qualifier: Qualifier, template: String },
}

impl TemplateTarget {
    /// Template name within its collection.
    pub fn template(&self) -> &str {
        match self {
            TemplateTarget::Local(name) => name,
            TemplateTarget::External { template, .. } => template,
        }
    }
}

impl fmt::Display for TemplateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateTarget::Local(name) => f.write_str(name),
            TemplateTarget::External {
                qualifier,
                template,
            } => write!(f, "{}/{}", qualifier, template),
        }
    }
}

/// One call argument, positional when `key` is absent.
#[derive(Debug, Clone, PartialEq)]
pub struct CallArg {
    pub key: Option<String>,
    pub value: String,
}

/// A parsed call site.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub target: TemplateTarget,
    pub args: Vec<CallArg>,
}

/// Split `text` on `separator` at nesting depth zero, outside quotes.
///
/// Returns `None` when brackets or quotes are unbalanced.
pub(crate) fn split_top_level<'a>(text: &'a str, separator: &str) -> Option<Vec<&'a str>> {
    let bytes = text.as_bytes();
    let sep = separator.as_bytes();
    let mut parts = Vec::new();
    let mut depth: i32 = 0;
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ if depth == 0 && bytes[i..].starts_with(sep) => {
                parts.push(&text[start..i]);
                i += sep.len();
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    if depth != 0 || quote.is_some() {
        return None;
    }
    parts.push(&text[start..]);
    Some(parts)
}

/// Split `head(inner)` into head and optional inner text.
fn split_head<'a>(text: &'a str, original: &str) -> Result<(&'a str, Option<&'a str>)> {
    let Some(open) = text.find('(') else {
        if text.contains(')') {
            return Err(Error::invalid_signature(original, "unbalanced parentheses"));
        }
        return Ok((text.trim(), None));
    };

    let bytes = text.as_bytes();
    let mut depth = 0;
    let mut quote: Option<u8> = None;
    let mut close = None;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }

    let Some(close) = close else {
        return Err(Error::invalid_signature(original, "unbalanced parentheses"));
    };
    if !text[close + 1..].trim().is_empty() {
        return Err(Error::invalid_signature(original, "trailing text after ')'"));
    }
    Ok((text[..open].trim(), Some(&text[open + 1..close])))
}

/// Split an argument list, rejecting empty items. An empty list is allowed.
fn split_items<'a>(inner: &'a str, original: &str) -> Result<Vec<&'a str>> {
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    let items = split_top_level(inner, ",")
        .ok_or_else(|| Error::invalid_signature(original, "unbalanced brackets or quotes"))?;
    items
        .into_iter()
        .map(|item| {
            let item = item.trim();
            if item.is_empty() {
                Err(Error::invalid_signature(original, "empty parameter"))
            } else {
                Ok(item)
            }
        })
        .collect()
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphanumeric() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_param_name(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

/// Remove one pair of matching outer quotes.
pub(crate) fn unquote(text: &str) -> &str {
    let text = text.trim();
    for q in ['\'', '"'] {
        if text.len() >= 2 && text.starts_with(q) && text.ends_with(q) {
            return &text[1..text.len() - 1];
        }
    }
    text
}

/// Parse a declaration such as `echo(msg, n=1, @file)`.
pub fn parse_signature(text: &str) -> Result<Signature> {
    let (name, inner) = split_head(text.trim(), text)?;
    if name.is_empty() {
        return Err(Error::invalid_signature(text, "empty identifier"));
    }
    if !is_identifier(name) {
        return Err(Error::invalid_signature(
            text,
            format!("invalid identifier '{}'", name),
        ));
    }

    let mut params = ParamSet::new();
    let mut seen = HashSet::new();
    let mut first_artifact: Option<String> = None;

    for item in split_items(inner.unwrap_or_default(), text)? {
        let (key, default) = match item.split_once('=') {
            Some((key, default)) => (
                key.trim(),
                Some(Value::String(unquote(default).to_string())),
            ),
            None => (item, None),
        };

        let bare = key.strip_prefix(ARTIFACT_SIGIL).unwrap_or(key);
        if !is_param_name(bare) {
            return Err(Error::invalid_signature(
                text,
                format!("invalid parameter name '{}'", key),
            ));
        }
        if !seen.insert(bare.to_string()) {
            return Err(Error::invalid_signature(
                text,
                format!("duplicate parameter '{}'", bare),
            ));
        }

        let param = Parameter::from_key(key, default);
        match (&first_artifact, param.is_artifact()) {
            (None, true) => first_artifact = Some(param.name.clone()),
            (Some(artifact), false) => {
                return Err(Error::invalid_signature(
                    text,
                    format!(
                        "artifact '@{}' declared before value parameter '{}'",
                        artifact, param.name
                    ),
                ));
            }
            _ => {}
        }
        params.push(param);
    }

    Ok(Signature {
        name: name.to_string(),
        params,
    })
}

fn parse_target(head: &str, original: &str) -> Result<TemplateTarget> {
    let (cluster_scope, rest) = match head.strip_prefix(CLUSTER_PREFIX) {
        Some(rest) => (true, rest),
        None => (false, head),
    };

    match rest.split_once('/') {
        Some((collection, template)) => {
            if !is_identifier(collection) || !is_identifier(template) {
                return Err(Error::invalid_signature(
                    original,
                    format!("invalid template reference '{}'", head),
                ));
            }
            Ok(TemplateTarget::External {
                qualifier: Qualifier {
                    name: collection.to_string(),
                    cluster_scope,
                },
                template: template.to_string(),
            })
        }
        None if cluster_scope => Err(Error::invalid_signature(
            original,
            "cluster-scoped reference needs 'cluster:<collection>/<template>'",
        )),
        None if rest.is_empty() => Err(Error::invalid_signature(original, "empty identifier")),
        None if !is_identifier(rest) => Err(Error::invalid_signature(
            original,
            format!("invalid identifier '{}'", rest),
        )),
        None => Ok(TemplateTarget::Local(rest.to_string())),
    }
}

/// Parse a call such as `echo(hi, n=2)` or `cluster:lib/echo(hi)`.
pub fn parse_call(text: &str) -> Result<Call> {
    let (head, inner) = split_head(text.trim(), text)?;
    let target = parse_target(head, text)?;

    let args = split_items(inner.unwrap_or_default(), text)?
        .into_iter()
        .map(|item| match item.split_once('=') {
            Some((key, value))
                if is_param_name(key.trim().trim_start_matches(ARTIFACT_SIGIL)) =>
            {
                CallArg {
                    key: Some(key.trim().trim_start_matches(ARTIFACT_SIGIL).to_string()),
                    value: unquote(value).to_string(),
                }
            }
            _ => CallArg {
                key: None,
                value: unquote(item).to_string(),
            },
        })
        .collect();

    Ok(Call { target, args })
}

/// Template identifier of a call text, without parsing its arguments.
pub fn call_identifier(text: &str) -> &str {
    let head = text.split('(').next().unwrap_or(text).trim();
    head.rsplit('/').next().unwrap_or(head)
}
