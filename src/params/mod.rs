//! Parameter descriptors and binding.
//!
//! A name starting with `@` is an artifact. The sigil is parsed here, at the
//! boundary, and carried as [`ParamClass`] from then on.

mod binder;

use serde_json::Value;

use crate::error::{Error, Result};

pub use binder::{BindContext, Binder, IoMode};

/// Sigil marking an artifact parameter.
pub const ARTIFACT_SIGIL: char = '@';

/// Whether a parameter carries a value or an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamClass {
    Value,
    Artifact,
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub class: ParamClass,
    pub default: Option<Value>,
}

impl Parameter {
    pub fn value(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: ParamClass::Value,
            default: None,
        }
    }

    pub fn artifact(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: ParamClass::Artifact,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Build from a possibly sigil-prefixed key (`@file`, `msg`).
    /// A null default counts as no default.
    pub fn from_key(key: &str, default: Option<Value>) -> Self {
        let (name, class) = match key.strip_prefix(ARTIFACT_SIGIL) {
            Some(name) => (name, ParamClass::Artifact),
            None => (key, ParamClass::Value),
        };
        Self {
            name: name.to_string(),
            class,
            default: default.filter(|v| !v.is_null()),
        }
    }

    pub fn is_artifact(&self) -> bool {
        self.class == ParamClass::Artifact
    }

    /// Key form with the sigil restored.
    pub fn key(&self) -> String {
        match self.class {
            ParamClass::Value => self.name.clone(),
            ParamClass::Artifact => format!("{}{}", ARTIFACT_SIGIL, self.name),
        }
    }
}

/// Ordered parameter list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSet {
    params: Vec<Parameter>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a `name → value` map, preserving map order.
    pub fn from_map(map: &serde_json::Map<String, Value>) -> Self {
        map.iter()
            .map(|(key, value)| Parameter::from_key(key, Some(value.clone())))
            .collect()
    }

    pub fn push(&mut self, param: Parameter) {
        self.params.push(param);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn values(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter().filter(|p| !p.is_artifact())
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter().filter(|p| p.is_artifact())
    }

    /// Every value parameter must precede every artifact parameter.
    pub fn check_order(&self) -> Result<()> {
        let mut first_artifact: Option<&Parameter> = None;
        for param in &self.params {
            match (param.class, first_artifact) {
                (ParamClass::Artifact, None) => first_artifact = Some(param),
                (ParamClass::Value, Some(artifact)) => {
                    return Err(Error::ParameterOrder {
                        artifact: artifact.name.clone(),
                        value: param.name.clone(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl FromIterator<Parameter> for ParamSet {
    fn from_iter<I: IntoIterator<Item = Parameter>>(iter: I) -> Self {
        Self {
            params: iter.into_iter().collect(),
        }
    }
}

impl Extend<Parameter> for ParamSet {
    fn extend<I: IntoIterator<Item = Parameter>>(&mut self, iter: I) {
        self.params.extend(iter);
    }
}

impl<'a> IntoIterator for &'a ParamSet {
    type Item = &'a Parameter;
    type IntoIter = std::slice::Iter<'a, Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.iter()
    }
}

/// Parse CLI variable pairs into a JSON object.
///
/// Values are parsed as JSON if valid, otherwise treated as strings.
pub fn parse_cli_vars(vars: &[(String, String)]) -> serde_json::Map<String, Value> {
    vars.iter()
        .map(|(key, value)| {
            let parsed =
                serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.clone()));
            (key.clone(), parsed)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_key_parses_sigil() {
        let art = Parameter::from_key("@file", Some(json!("/tmp/f")));
        assert_eq!(art.name, "file");
        assert!(art.is_artifact());
        assert_eq!(art.key(), "@file");

        let val = Parameter::from_key("msg", Some(Value::Null));
        assert_eq!(val.class, ParamClass::Value);
        assert_eq!(val.default, None);
    }

    #[test]
    fn test_order_violation() {
        let params = ParamSet::from_map(
            json!({"@art": "/tmp/a", "x": 1}).as_object().unwrap(),
        );
        assert!(matches!(
            params.check_order(),
            Err(Error::ParameterOrder { artifact, value }) if artifact == "art" && value == "x"
        ));
    }

    #[test]
    fn test_order_ok() {
        let params = ParamSet::from_map(
            json!({"x": 1, "@art": "/tmp/a", "@b": null}).as_object().unwrap(),
        );
        assert!(params.check_order().is_ok());
        assert_eq!(params.values().count(), 1);
        assert_eq!(params.artifacts().count(), 2);
    }

    #[test]
    fn test_parse_cli_vars() {
        let vars = vec![
            ("name".to_string(), "Alice".to_string()),
            ("count".to_string(), "42".to_string()),
            ("enabled".to_string(), "true".to_string()),
            ("data".to_string(), r#"{"key": "value"}"#.to_string()),
        ];

        let result = parse_cli_vars(&vars);

        assert_eq!(result["name"], "Alice");
        assert_eq!(result["count"], 42);
        assert_eq!(result["enabled"], true);
        assert_eq!(result["data"]["key"], "value");
    }
}
