//! Step and task graph construction.
//!
//! Both builders compile one node at a time: substitute the node text,
//! parse the call, name the node, bind its arguments against the callee's
//! signature, then register the node's output namespace so later siblings
//! can refer to it.

mod dag;
mod steps;

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::manifest::{GraphNode, TemplateRefSpec};
use crate::params::{Binder, ParamSet};
use crate::scope::{substitute, substitute_str, value_to_string, Binding, NodeOutputs, Scope};
use crate::signature::{parse_call, CallArg, TemplateTarget};

pub use dag::{build_dag, parse_chain, Chain, TaskGraph};
pub use steps::build_steps;

/// Declared inputs and outputs of a callable template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateSignature {
    pub inputs: ParamSet,
    pub outputs: ParamSet,
}

/// Resolves the signature of a call target.
pub trait SignatureLookup {
    fn signature(&self, target: &TemplateTarget) -> Result<TemplateSignature>;
}

/// Whether a node lives in a `steps` or a `dag` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Step,
    Task,
}

impl NodeKind {
    fn prefix(self) -> &'static str {
        match self {
            NodeKind::Step => "steps",
            NodeKind::Task => "tasks",
        }
    }

    fn label(self) -> &'static str {
        match self {
            NodeKind::Step => "step",
            NodeKind::Task => "task",
        }
    }
}

/// Everything a graph builder needs from the enclosing flow.
pub struct GraphEnv<'a> {
    pub scope: &'a mut Scope,
    pub binder: &'a Binder,
    pub callees: &'a dyn SignatureLookup,
}

impl GraphEnv<'_> {
    /// Compile an already substituted call into a node and register its outputs.
    fn compile_node(
        &mut self,
        kind: NodeKind,
        name: String,
        call_text: &str,
        when: Option<String>,
        extra_args: Vec<CallArg>,
    ) -> Result<GraphNode> {
        let mut call = parse_call(call_text)?;
        call.args.extend(extra_args);

        let signature = self.callees.signature(&call.target)?;
        let arguments = self
            .binder
            .build_call_args(self.scope, call.target.template(), &signature.inputs, &call.args)?
            .non_empty();

        let outputs = NodeOutputs::new(
            kind.prefix(),
            &name,
            signature.outputs.values().map(|p| p.name.as_str()),
            signature.outputs.artifacts().map(|p| p.name.as_str()),
        );
        self.scope.set(name.clone(), Binding::Outputs(outputs));

        let (template, template_ref) = match call.target {
            TemplateTarget::Local(template) => (Some(template), None),
            TemplateTarget::External {
                qualifier,
                template,
            } => (
                None,
                Some(TemplateRefSpec {
                    name: qualifier.name,
                    template,
                    cluster_scope: qualifier.cluster_scope,
                }),
            ),
        };

        tracing::debug!("Compiled {} '{}' calling '{}'", kind.label(), name, call_text);

        Ok(GraphNode {
            name,
            template,
            template_ref,
            arguments,
            dependencies: Vec::new(),
            when,
        })
    }
}

/// Map-shaped node declaration: `{template|call, name?, when?, args?, dependencies?}`.
#[derive(Debug, Clone, Default)]
struct NodeDecl {
    call: String,
    name: Option<String>,
    when: Option<Value>,
    args: Map<String, Value>,
    dependencies: Vec<String>,
}

const NODE_KEYS: [&str; 2] = ["template", "call"];

/// Whether a map is a single node declaration rather than a `name → call` map.
fn is_node_map(map: &Map<String, Value>) -> bool {
    NODE_KEYS.iter().any(|key| map.contains_key(*key))
}

impl NodeDecl {
    fn parse(value: &Value, explicit_name: Option<&str>, kind: NodeKind) -> Result<Self> {
        let mut decl = match value {
            Value::String(call) => NodeDecl {
                call: call.clone(),
                ..Default::default()
            },
            Value::Object(map) => Self::from_map(map, kind)?,
            other => {
                return Err(Error::Compile(format!(
                    "A {} must be a call string or a map, got: {}",
                    kind.label(),
                    other
                )))
            }
        };
        if let Some(name) = explicit_name {
            decl.name = Some(name.to_string());
        }
        Ok(decl)
    }

    fn from_map(map: &Map<String, Value>, kind: NodeKind) -> Result<Self> {
        let mut decl = NodeDecl::default();
        for (key, value) in map {
            match key.as_str() {
                "template" | "call" => {
                    decl.call = value
                        .as_str()
                        .ok_or_else(|| {
                            Error::Compile(format!("'{}' of a {} must be a string", key, kind.label()))
                        })?
                        .to_string();
                }
                "name" => decl.name = Some(value_to_string(value)),
                "when" => decl.when = Some(value.clone()),
                "args" | "arguments" => {
                    decl.args = value
                        .as_object()
                        .cloned()
                        .ok_or_else(|| Error::Compile("'args' must be a map".to_string()))?;
                }
                "dependencies" if kind == NodeKind::Task => {
                    decl.dependencies = dependency_list(value)?;
                }
                other => {
                    return Err(Error::Compile(format!(
                        "Unknown key '{}' in {} declaration",
                        other,
                        kind.label()
                    )))
                }
            }
        }
        if decl.call.trim().is_empty() {
            return Err(Error::Compile(format!(
                "A {} declaration needs a 'template' or 'call'",
                kind.label()
            )));
        }
        Ok(decl)
    }

    /// Substitute the deferred parts of the declaration.
    fn resolve(&self, scope: &Scope) -> Result<(String, Option<String>, Vec<CallArg>)> {
        let call = substitute_str(scope, &self.call)?;
        let when = self
            .when
            .as_ref()
            .map(|when| substitute(scope, when).map(|v| value_to_string(&v)))
            .transpose()?;
        let args = self
            .args
            .iter()
            .map(|(key, value)| {
                Ok(CallArg {
                    key: Some(key.trim_start_matches('@').to_string()),
                    value: value_to_string(&substitute(scope, value)?),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((call, when, args))
    }
}

fn dependency_list(value: &Value) -> Result<Vec<String>> {
    match value {
        Value::String(text) => Ok(text
            .split(|c: char| c == ';' || c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()),
        Value::Array(items) => Ok(items.iter().map(value_to_string).collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(Error::Compile(format!(
            "'dependencies' must be a list of task names, got: {}",
            other
        ))),
    }
}
