//! Reference-token substitution.
//!
//! Tokens:
//! - `${name}` / `${name.path}` required reference
//! - `$name` / `$name.path` lenient reference, left verbatim when `name` is unbound
//! - `${@name}` / `$@name` / `$@step.out` artifact reference
//! - `$$` literal `$`
//!
//! Argo's own `{{...}}` expressions are never touched.

use std::sync::OnceLock;

use regex_lite::{Captures, Regex};
use serde_json::Value;

use super::{Binding, Scope};
use crate::error::{Error, Result};

/// Get the regex for reference tokens.
fn reference_regex() -> &'static Regex {
    static REFERENCE_REGEX: OnceLock<Regex> = OnceLock::new();
    REFERENCE_REGEX.get_or_init(|| {
        Regex::new(
            r"\$(?:(\$)|\{\s*(@?)([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*)\s*\}|(@?)([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_\-]+)*))",
        )
        .expect("valid regex")
    })
}

/// Convert a JSON value to a string for substitution into text.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}

struct Reference<'a> {
    artifact: bool,
    head: &'a str,
    segments: Vec<&'a str>,
    required: bool,
}

impl<'a> Reference<'a> {
    /// `None` for the `$$` escape.
    fn from_captures(caps: &Captures<'a>) -> Option<Self> {
        let (sigil, path, required) = match (caps.get(3), caps.get(5)) {
            (Some(path), _) => (caps.get(2), path, true),
            (None, Some(path)) => (caps.get(4), path, false),
            (None, None) => return None,
        };
        let mut parts = path.as_str().split('.');
        let head = parts.next().unwrap_or_default();
        Some(Reference {
            artifact: sigil.is_some_and(|m| !m.as_str().is_empty()),
            head,
            segments: parts.collect(),
            required,
        })
    }

    fn display(&self) -> String {
        let mut name = String::new();
        if self.artifact {
            name.push('@');
        }
        name.push_str(self.head);
        for segment in &self.segments {
            name.push('.');
            name.push_str(segment);
        }
        name
    }
}

/// Resolve a reference to the deepest binding its path reaches and the number
/// of segments consumed. `None` when a lenient head is unbound.
fn resolve(scope: &Scope, reference: &Reference) -> Result<Option<(Binding, usize)>> {
    let key = if reference.artifact && reference.segments.is_empty() {
        Scope::artifact_key(reference.head)
    } else {
        reference.head.to_string()
    };

    let Some(mut current) = scope.get(&key, reference.required)?.cloned() else {
        return Ok(None);
    };

    let mut consumed = 0;
    for (idx, segment) in reference.segments.iter().enumerate() {
        let last = idx + 1 == reference.segments.len();
        match current.member(segment, reference.artifact && last) {
            Some(next) => {
                current = next;
                consumed += 1;
            }
            None => break,
        }
    }

    // A node namespace never stands for its own text, so a missing member
    // is an error even in lenient form.
    let namespace_miss = matches!(current, Binding::Outputs(_)) && !reference.segments.is_empty();
    if consumed < reference.segments.len() && (reference.required || namespace_miss) {
        return Err(Error::UnboundVariable(reference.display()));
    }

    Ok(Some((current, consumed)))
}

/// Substitute every reference token in `input`.
pub fn substitute_str(scope: &Scope, input: &str) -> Result<String> {
    if !input.contains('$') {
        return Ok(input.to_string());
    }

    let mut out = String::with_capacity(input.len());
    let mut last = 0;

    for caps in reference_regex().captures_iter(input) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&input[last..whole.start()]);
        last = whole.end();

        let Some(reference) = Reference::from_captures(&caps) else {
            out.push('$');
            continue;
        };

        match resolve(scope, &reference)? {
            Some((binding, consumed)) => {
                out.push_str(&binding.render());
                for segment in &reference.segments[consumed..] {
                    out.push('.');
                    out.push_str(segment);
                }
            }
            None => out.push_str(whole.as_str()),
        }
    }

    out.push_str(&input[last..]);
    Ok(out)
}

/// If `input` is exactly one plain reference to a literal, return the literal.
fn whole_literal(scope: &Scope, input: &str) -> Result<Option<Value>> {
    let trimmed = input.trim();
    let Some(caps) = reference_regex().captures(trimmed) else {
        return Ok(None);
    };
    let Some(whole) = caps.get(0) else {
        return Ok(None);
    };
    if whole.start() != 0 || whole.end() != trimmed.len() {
        return Ok(None);
    }
    let Some(reference) = Reference::from_captures(&caps) else {
        return Ok(None);
    };
    if reference.artifact {
        return Ok(None);
    }

    match resolve(scope, &reference)? {
        Some((Binding::Literal(value), consumed)) if consumed == reference.segments.len() => {
            Ok(Some(value))
        }
        _ => Ok(None),
    }
}

/// Substitute references throughout a JSON tree.
///
/// Map keys are substituted as well as values. A string holding exactly one
/// plain reference to a literal keeps the literal's type.
pub fn substitute(scope: &Scope, value: &Value) -> Result<Value> {
    match value {
        Value::String(s) => {
            if let Some(literal) = whole_literal(scope, s)? {
                return Ok(literal);
            }
            Ok(Value::String(substitute_str(scope, s)?))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| substitute(scope, item))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(substitute_str(scope, key)?, substitute(scope, item)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::NodeOutputs;
    use serde_json::json;

    fn scope() -> Scope {
        let mut scope = Scope::new();
        scope.set_global("image", Binding::Literal(json!("alpine:3.19")));
        scope.set_global("cfg", Binding::Literal(json!({"replicas": 3, "tags": ["a", "b"]})));
        scope.set_global(
            "@data",
            Binding::Artifact {
                expr: "{{workflow.artifacts.data}}".into(),
                path: Some("/tmp/data.txt".into()),
            },
        );
        scope.push();
        scope.set("msg", Binding::expr("{{inputs.parameters.msg}}"));
        scope.set(
            "gen",
            Binding::Outputs(NodeOutputs::new("steps", "gen", Vec::<&str>::new(), ["out"])),
        );
        scope
    }

    #[test]
    fn test_braced_and_bare_references() {
        let scope = scope();
        assert_eq!(
            substitute_str(&scope, "echo ${msg} on $image").unwrap(),
            "echo {{inputs.parameters.msg}} on alpine:3.19"
        );
    }

    #[test]
    fn test_lenient_reference_left_verbatim() {
        let scope = scope();
        assert_eq!(
            substitute_str(&scope, "cd $HOME && echo $msg").unwrap(),
            "cd $HOME && echo {{inputs.parameters.msg}}"
        );
    }

    #[test]
    fn test_required_reference_unbound() {
        let scope = scope();
        let err = substitute_str(&scope, "echo ${missing}").unwrap_err();
        assert!(matches!(err, Error::UnboundVariable(name) if name == "missing"));
    }

    #[test]
    fn test_dollar_escape() {
        let scope = scope();
        assert_eq!(
            substitute_str(&scope, "price: $$5 and $$msg").unwrap(),
            "price: $5 and $msg"
        );
    }

    #[test]
    fn test_argo_expressions_untouched() {
        let scope = scope();
        let text = "{{inputs.parameters.x}} {{=sprig.upper('a')}}";
        assert_eq!(substitute_str(&scope, text).unwrap(), text);
    }

    #[test]
    fn test_structured_path() {
        let scope = scope();
        assert_eq!(
            substitute_str(&scope, "n=${cfg.replicas} t=$cfg.tags.1").unwrap(),
            "n=3 t=b"
        );
    }

    #[test]
    fn test_bare_reference_keeps_unresolved_suffix() {
        let mut scope = Scope::new();
        scope.set("file", Binding::expr("{{inputs.parameters.file}}"));
        assert_eq!(
            substitute_str(&scope, "cat $file.txt").unwrap(),
            "cat {{inputs.parameters.file}}.txt"
        );
        assert!(substitute_str(&scope, "cat ${file.txt}").is_err());
    }

    #[test]
    fn test_artifact_references() {
        let scope = scope();
        assert_eq!(
            substitute_str(&scope, "cat $@data; cat ${@gen.out}").unwrap(),
            "cat /tmp/data.txt; cat {{steps.gen.outputs.artifacts.out}}"
        );
        assert_eq!(
            substitute_str(&scope, "$gen.result").unwrap(),
            "{{steps.gen.outputs.result}}"
        );
    }

    #[test]
    fn test_missing_node_output_is_error_even_when_lenient() {
        let scope = scope();
        assert!(substitute_str(&scope, "$gen.nothing").is_err());
        assert!(substitute_str(&scope, "$@gen.nothing").is_err());
    }

    #[test]
    fn test_whole_value_keeps_structure() {
        let scope = scope();
        let value = json!({"replicas": "${cfg.replicas}", "tags": "$cfg.tags", "label": "x-${cfg.replicas}"});
        let out = substitute(&scope, &value).unwrap();
        assert_eq!(out["replicas"], json!(3));
        assert_eq!(out["tags"], json!(["a", "b"]));
        assert_eq!(out["label"], json!("x-3"));
    }

    #[test]
    fn test_recurses_through_lists_and_keys() {
        let scope = scope();
        let value = json!([{"${msg}": ["$image", 1, null]}]);
        let out = substitute(&scope, &value).unwrap();
        assert_eq!(
            out,
            json!([{"{{inputs.parameters.msg}}": ["alpine:3.19", 1, null]}])
        );
    }
}
