//! Flow and template declarations as written in a flow document.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::manifest::FlowKind;
use crate::namer::NamingPolicy;
use crate::params::ParamSet;
use crate::signature::parse_signature;

/// A flow: one manifest worth of templates and settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowDecl {
    /// Flow name, substituted against compile-time variables
    #[serde(rename = "flow")]
    pub name: String,

    /// Manifest kind; `cron` implies CronWorkflow
    #[serde(default)]
    pub kind: Option<FlowKind>,

    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub labels: Map<String, Value>,

    /// Compile-time constants
    #[serde(default)]
    pub vars: Map<String, Value>,

    /// Workflow arguments
    #[serde(default)]
    pub args: Map<String, Value>,

    /// Volume claims: `name:path[:size]`
    #[serde(default, deserialize_with = "one_or_many")]
    pub vc: Vec<String>,

    /// Artifact store: `name:location`
    #[serde(default, deserialize_with = "one_or_many")]
    pub art: Vec<String>,

    /// Schedule string or CronWorkflow options
    #[serde(default)]
    pub cron: Option<Value>,

    /// Naming policy of dag tasks
    #[serde(default)]
    pub task_names: NamingPolicy,

    /// Merged into the workflow spec last
    #[serde(default)]
    pub spec: Map<String, Value>,

    /// `signature → body` entries in declaration order
    #[serde(default, deserialize_with = "template_entries")]
    pub templates: Vec<(String, Value)>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(item)) => vec![item],
        Some(OneOrMany::Many(items)) => items,
        None => Vec::new(),
    })
}

/// Templates are a map, or a list of single-entry maps when order matters to
/// the reader.
fn template_entries<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<(String, Value)>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => Ok(map.into_iter().collect()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) if map.len() == 1 => {
                    Ok(map.into_iter().next().unwrap_or_default())
                }
                other => Err(D::Error::custom(format!(
                    "template list entries must be single-entry maps, got: {}",
                    other
                ))),
            })
            .collect(),
        other => Err(D::Error::custom(format!(
            "templates must be a map or a list, got: {}",
            other
        ))),
    }
}

/// Body variant keys of a template.
pub const BODY_KEYS: [&str; 7] = [
    "container", "script", "python", "steps", "dag", "suspend", "resource",
];

/// The one body of a template, before compilation.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyDecl {
    Container(Value),
    Script(Value),
    Python(Value),
    Steps(Value),
    Dag(Value),
    Suspend(Value),
    Resource(Value),
}

impl BodyDecl {
    fn from_key(key: &str, value: Value) -> Option<Self> {
        Some(match key {
            "container" => BodyDecl::Container(value),
            "script" => BodyDecl::Script(value),
            "python" => BodyDecl::Python(value),
            "steps" => BodyDecl::Steps(value),
            "dag" => BodyDecl::Dag(value),
            "suspend" => BodyDecl::Suspend(value),
            "resource" => BodyDecl::Resource(value),
            _ => return None,
        })
    }

    /// Whether node outputs (rather than files) back the template's outputs.
    pub fn is_graph(&self) -> bool {
        matches!(self, BodyDecl::Steps(_) | BodyDecl::Dag(_))
    }
}

/// A template entry: `signature: {in?, out?, <body>, ...extra}`.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateDecl {
    pub name: String,
    pub inputs: ParamSet,
    pub outputs: ParamSet,
    pub body: BodyDecl,
    /// Keys passed through to the emitted template
    pub extra: Map<String, Value>,
}

fn io_block(template: &str, key: &str, value: Option<&Value>) -> Result<ParamSet> {
    match value {
        None | Some(Value::Null) => Ok(ParamSet::new()),
        Some(Value::Object(map)) => Ok(ParamSet::from_map(map)),
        Some(other) => Err(Error::Compile(format!(
            "'{}' of template '{}' must be a map, got: {}",
            key, template, other
        ))),
    }
}

impl TemplateDecl {
    /// Parse a template entry from its signature key and body map.
    pub fn parse(key: &str, value: &Value) -> Result<Self> {
        let signature = parse_signature(key)?;
        let name = signature.name;

        let Value::Object(map) = value else {
            return Err(Error::Compile(format!(
                "Template '{}' must be a map with one of: {}",
                name,
                BODY_KEYS.join(", ")
            )));
        };

        let mut inputs = signature.params;
        for param in io_block(&name, "in", map.get("in"))?.iter() {
            if inputs.contains(&param.name) {
                return Err(Error::Compile(format!(
                    "Template '{}' declares input '{}' twice",
                    name, param.name
                )));
            }
            inputs.push(param.clone());
        }
        let outputs = io_block(&name, "out", map.get("out"))?;

        let mut bodies = Vec::new();
        let mut extra = Map::new();
        for (key, value) in map {
            if key == "in" || key == "out" {
                continue;
            }
            match BodyDecl::from_key(key, value.clone()) {
                Some(body) => bodies.push((key.as_str(), body)),
                None => {
                    extra.insert(key.clone(), value.clone());
                }
            }
        }

        let body = match bodies.len() {
            0 => {
                return Err(Error::Compile(format!(
                    "Template '{}' has no body; expected one of: {}",
                    name,
                    BODY_KEYS.join(", ")
                )))
            }
            1 => bodies.remove(0).1,
            _ => {
                let keys: Vec<&str> = bodies.iter().map(|(key, _)| *key).collect();
                return Err(Error::Compile(format!(
                    "Template '{}' declares several bodies: {}",
                    name,
                    keys.join(", ")
                )));
            }
        };

        Ok(Self {
            name,
            inputs,
            outputs,
            body,
            extra,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_template_signature_and_in_block() {
        let decl = TemplateDecl::parse(
            "echo(msg)",
            &json!({
                "in": {"n": 1, "@file": null},
                "out": {"@log": "/tmp/log"},
                "container": {"command": "echo $msg"},
                "retryStrategy": {"limit": 2}
            }),
        )
        .unwrap();

        assert_eq!(decl.name, "echo");
        let keys: Vec<_> = decl.inputs.iter().map(|p| p.key()).collect();
        assert_eq!(keys, vec!["msg", "n", "@file"]);
        assert_eq!(decl.outputs.artifacts().count(), 1);
        assert!(matches!(decl.body, BodyDecl::Container(_)));
        assert_eq!(decl.extra["retryStrategy"]["limit"], 2);
    }

    #[test]
    fn test_template_without_body() {
        let err = TemplateDecl::parse("main", &json!({"in": {}})).unwrap_err();
        assert!(err.to_string().contains("no body"));
    }

    #[test]
    fn test_template_with_two_bodies() {
        let err = TemplateDecl::parse(
            "main",
            &json!({"container": {}, "script": {"source": "echo"}}),
        )
        .unwrap_err();
        assert_eq!(err.code(), "COMPILE_ERROR");
        assert!(err.to_string().contains("container, script"));
    }

    #[test]
    fn test_duplicate_input() {
        let err =
            TemplateDecl::parse("echo(msg)", &json!({"in": {"msg": 1}, "suspend": null}))
                .unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn test_bad_signature_key() {
        let err = TemplateDecl::parse("echo(", &json!({"suspend": null})).unwrap_err();
        assert_eq!(err.code(), "INVALID_SIGNATURE");
    }

    #[test]
    fn test_graph_bodies() {
        assert!(BodyDecl::Steps(json!([])).is_graph());
        assert!(BodyDecl::Dag(json!("A")).is_graph());
        assert!(!BodyDecl::Script(json!({})).is_graph());
    }
}
