//! Binding of parameter sets into Argo inputs, outputs and arguments.
//!
//! Each bound name is substituted against the scope after the names before
//! it were registered, so a default may refer to an earlier parameter.

use std::collections::HashMap;

use serde_json::{json, Map, Value};
use tracing::warn;

use super::{ParamClass, ParamSet, Parameter};
use crate::error::{Error, Result};
use crate::manifest::{ArtifactSpec, IoSpec, ParameterSpec};
use crate::scope::{substitute, value_to_string, Binding, Scope};
use crate::signature::CallArg;

/// How a template body exchanges values and artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    /// Container and script bodies: values and artifacts are files.
    Files,
    /// Steps and dag bodies: values and artifacts are expressions over nodes.
    Nodes,
}

/// Context a parameter set is bound in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindContext {
    TemplateInput(IoMode),
    TemplateOutput(IoMode),
    FlowArgument,
    CallArgument,
}

impl BindContext {
    /// Whether bound artifacts are mounted into a container.
    fn mounts_artifacts(self) -> bool {
        !matches!(
            self,
            BindContext::CallArgument
                | BindContext::TemplateInput(IoMode::Nodes)
                | BindContext::TemplateOutput(IoMode::Nodes)
        )
    }
}

/// Binds parameter sets for one flow.
#[derive(Debug, Clone)]
pub struct Binder {
    artifact_dir: String,
    store: HashMap<String, String>,
}

fn is_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

impl Binder {
    pub fn new(artifact_dir: impl Into<String>) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
            store: HashMap::new(),
        }
    }

    /// Record a flow-level artifact location.
    pub fn store_artifact(&mut self, name: impl Into<String>, location: impl Into<String>) {
        self.store.insert(name.into(), location.into());
    }

    /// Flow-level artifact location, if any.
    pub fn stored_artifact(&self, name: &str) -> Option<&str> {
        self.store.get(name).map(String::as_str)
    }

    /// Deterministic default path of an artifact.
    pub fn default_path(&self, name: &str) -> String {
        format!("{}/{}", self.artifact_dir.trim_end_matches('/'), name)
    }

    /// Bind ordered call-style declarations.
    pub fn build_list_args(
        &self,
        scope: &mut Scope,
        params: &ParamSet,
        context: BindContext,
    ) -> Result<IoSpec> {
        params.check_order()?;

        let mut spec = IoSpec::default();
        for param in params {
            let value = match (&param.default, context) {
                (Some(value), BindContext::CallArgument) => Some(value.clone()),
                (Some(value), _) => Some(substitute(scope, value)?),
                (None, _) => None,
            };

            match param.class {
                ParamClass::Value => {
                    spec.parameters
                        .push(self.value_spec(&param.name, value, context));
                    register_value(scope, &param.name, context);
                }
                ParamClass::Artifact => {
                    let artifact = self.artifact_spec(&param.name, value, context)?;
                    register_artifact(scope, &param.name, &artifact, context);
                    spec.artifacts.push(artifact);
                }
            }
        }
        Ok(spec)
    }

    /// Bind an explicit `name → value` map (`in`, `out`, `args`).
    pub fn build_dict_args(
        &self,
        scope: &mut Scope,
        args: &Map<String, Value>,
        context: BindContext,
    ) -> Result<IoSpec> {
        self.build_list_args(scope, &ParamSet::from_map(args), context)
    }

    /// Bind call arguments against the callee's input signature.
    ///
    /// Positional arguments are matched in declaration order without count
    /// validation. Keyword arguments bind by name. The result follows the
    /// callee's declaration order.
    pub fn build_call_args(
        &self,
        scope: &mut Scope,
        callee: &str,
        inputs: &ParamSet,
        args: &[CallArg],
    ) -> Result<IoSpec> {
        let mut bound: HashMap<&str, &str> = HashMap::new();
        for arg in args {
            let Some(key) = &arg.key else {
                continue;
            };
            if inputs.contains(key) {
                bound.insert(key.as_str(), arg.value.as_str());
            } else {
                warn!(
                    "Dropping argument '{}': '{}' declares no such parameter",
                    key, callee
                );
            }
        }

        let mut free: Vec<&str> = inputs
            .iter()
            .map(|param| param.name.as_str())
            .filter(|name| !bound.contains_key(name))
            .collect::<Vec<_>>();
        free.reverse();
        for arg in args.iter().filter(|arg| arg.key.is_none()) {
            match free.pop() {
                Some(name) => {
                    bound.insert(name, arg.value.as_str());
                }
                None => warn!(
                    "Dropping extra argument '{}' in call to '{}'",
                    arg.value, callee
                ),
            }
        }

        let params: ParamSet = inputs
            .iter()
            .filter_map(|param| {
                bound.get(param.name.as_str()).map(|value| Parameter {
                    name: param.name.clone(),
                    class: param.class,
                    default: Some(Value::String((*value).to_string())),
                })
            })
            .collect();

        self.build_list_args(scope, &params, BindContext::CallArgument)
    }

    fn value_spec(&self, name: &str, value: Option<Value>, context: BindContext) -> ParameterSpec {
        let mut spec = ParameterSpec::named(name);
        let Some(value) = value else {
            return spec;
        };

        match (context, value) {
            (BindContext::TemplateOutput(source), Value::String(expr)) => {
                let key = match source {
                    IoMode::Files => "path",
                    IoMode::Nodes => "parameter",
                };
                spec.value_from = Some(json!({ key: expr }));
            }
            (_, Value::Object(map)) => spec.value_from = Some(Value::Object(map)),
            (BindContext::TemplateInput(_), value) => spec.default = Some(value_to_string(&value)),
            (_, value) => spec.value = Some(value_to_string(&value)),
        }
        spec
    }

    fn artifact_spec(
        &self,
        name: &str,
        value: Option<Value>,
        context: BindContext,
    ) -> Result<ArtifactSpec> {
        let mut spec = ArtifactSpec::named(name);

        match (context, value) {
            (BindContext::TemplateOutput(IoMode::Nodes), Some(Value::String(expr))) => {
                spec.from = Some(expr);
            }
            (BindContext::TemplateOutput(IoMode::Nodes), None) => {
                return Err(Error::Compile(format!(
                    "Output artifact '{}' of a steps/dag template needs a source expression",
                    name
                )));
            }
            (BindContext::CallArgument, Some(Value::String(expr))) if !is_url(&expr) => {
                spec.from = Some(expr);
            }
            (_, Some(Value::Object(map))) => {
                let needs_path = !map.contains_key("path")
                    && matches!(
                        context,
                        BindContext::TemplateInput(IoMode::Files)
                            | BindContext::TemplateOutput(IoMode::Files)
                    );
                spec.source = map;
                spec.source.remove("name");
                if needs_path {
                    spec.path = Some(self.resolve_path(name, None));
                }
            }
            (_, Some(Value::String(location))) if is_url(&location) => {
                spec.source.insert("http".to_string(), json!({ "url": location }));
                if context.mounts_artifacts() {
                    spec.path = Some(self.default_path(name));
                }
            }
            (_, Some(Value::String(path))) => spec.path = Some(path),
            (_, Some(other)) => spec.path = Some(value_to_string(&other)),
            // Graph templates only pass their inputs on.
            (BindContext::TemplateInput(IoMode::Nodes), None) => {}
            (_, None) => self.apply_store(name, &mut spec),
        }
        Ok(spec)
    }

    /// Fill an artifact with no user-given location from the flow store.
    fn apply_store(&self, name: &str, spec: &mut ArtifactSpec) {
        match self.stored_artifact(name) {
            Some(location) if is_url(location) => {
                spec.source
                    .insert("http".to_string(), json!({ "url": location }));
                spec.path = Some(self.default_path(name));
            }
            other => spec.path = Some(self.resolve_path(name, other)),
        }
    }

    fn resolve_path(&self, name: &str, given: Option<&str>) -> String {
        given
            .map(str::to_string)
            .or_else(|| {
                self.stored_artifact(name)
                    .filter(|location| !is_url(location))
                    .map(str::to_string)
            })
            .unwrap_or_else(|| self.default_path(name))
    }
}

fn register_value(scope: &mut Scope, name: &str, context: BindContext) {
    match context {
        BindContext::TemplateInput(_) => scope.set(
            name,
            Binding::expr(format!("{{{{inputs.parameters.{}}}}}", name)),
        ),
        BindContext::FlowArgument => scope.set_global(
            name,
            Binding::expr(format!("{{{{workflow.parameters.{}}}}}", name)),
        ),
        BindContext::TemplateOutput(_) | BindContext::CallArgument => {}
    }
}

fn register_artifact(scope: &mut Scope, name: &str, spec: &ArtifactSpec, context: BindContext) {
    match context {
        BindContext::TemplateInput(mode) => scope.set(
            Scope::artifact_key(name),
            Binding::Artifact {
                expr: format!("{{{{inputs.artifacts.{}}}}}", name),
                path: match mode {
                    IoMode::Files => spec.path.clone(),
                    IoMode::Nodes => None,
                },
            },
        ),
        BindContext::FlowArgument => scope.set_global(
            Scope::artifact_key(name),
            Binding::Artifact {
                expr: format!("{{{{workflow.artifacts.{}}}}}", name),
                path: None,
            },
        ),
        BindContext::TemplateOutput(_) | BindContext::CallArgument => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::parse_signature;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_template_inputs_register_expressions() {
        let binder = Binder::new("/tmp");
        let mut scope = Scope::new();
        scope.push();
        let sig = parse_signature("echo(msg, greeting=hi, @file)").unwrap();

        let spec = binder
            .build_list_args(&mut scope, &sig.params, BindContext::TemplateInput(IoMode::Files))
            .unwrap();

        assert_eq!(spec.parameters.len(), 2);
        assert_eq!(spec.parameters[1].default.as_deref(), Some("hi"));
        assert_eq!(spec.artifacts[0].path.as_deref(), Some("/tmp/file"));
        assert_eq!(
            scope.lookup("msg"),
            Some(&Binding::expr("{{inputs.parameters.msg}}"))
        );
        assert_eq!(scope.lookup("@file").unwrap().render(), "/tmp/file");
    }

    #[test]
    fn test_graph_template_inputs_render_expressions() {
        let binder = Binder::new("/tmp");
        let mut scope = Scope::new();
        scope.push();
        let sig = parse_signature("wrap(@file)").unwrap();

        let spec = binder
            .build_list_args(&mut scope, &sig.params, BindContext::TemplateInput(IoMode::Nodes))
            .unwrap();

        assert_eq!(spec.artifacts[0].path, None);
        assert_eq!(
            scope.lookup("@file").unwrap().render(),
            "{{inputs.artifacts.file}}"
        );
    }

    #[test]
    fn test_later_default_references_earlier_param() {
        let binder = Binder::new("/tmp");
        let mut scope = Scope::new();
        scope.push();
        let inputs = map(json!({"name": "world", "msg": "hello ${name}"}));

        let spec = binder
            .build_dict_args(&mut scope, &inputs, BindContext::TemplateInput(IoMode::Files))
            .unwrap();
        assert_eq!(
            spec.parameters[1].default.as_deref(),
            Some("hello {{inputs.parameters.name}}")
        );
    }

    #[test]
    fn test_artifact_path_precedence() {
        let mut binder = Binder::new("/work/");
        binder.store_artifact("data", "/data/in.csv");
        let mut scope = Scope::new();
        scope.push();
        let inputs = map(json!({"@given": "/mnt/g", "@data": null, "@other": null}));

        let spec = binder
            .build_dict_args(&mut scope, &inputs, BindContext::TemplateInput(IoMode::Files))
            .unwrap();
        let paths: Vec<_> = spec.artifacts.iter().map(|a| a.path.clone().unwrap()).collect();
        assert_eq!(paths, vec!["/mnt/g", "/data/in.csv", "/work/other"]);
    }

    #[test]
    fn test_http_artifact() {
        let binder = Binder::new("/tmp");
        let mut scope = Scope::new();
        scope.push();
        let inputs = map(json!({"@kubectl": "https://example.com/kubectl"}));

        let spec = binder
            .build_dict_args(&mut scope, &inputs, BindContext::TemplateInput(IoMode::Files))
            .unwrap();
        let artifact = &spec.artifacts[0];
        assert_eq!(artifact.path.as_deref(), Some("/tmp/kubectl"));
        assert_eq!(artifact.source["http"]["url"], "https://example.com/kubectl");
    }

    #[test]
    fn test_outputs_by_source() {
        let binder = Binder::new("/tmp");
        let mut scope = Scope::new();
        let outputs = map(json!({"count": "/tmp/count", "@log": "/tmp/log"}));

        let files = binder
            .build_dict_args(
                &mut scope,
                &outputs,
                BindContext::TemplateOutput(IoMode::Files),
            )
            .unwrap();
        assert_eq!(files.parameters[0].value_from, Some(json!({"path": "/tmp/count"})));
        assert_eq!(files.artifacts[0].path.as_deref(), Some("/tmp/log"));

        let outputs = map(json!({
            "count": "{{steps.gen.outputs.parameters.count}}",
            "@log": "{{steps.gen.outputs.artifacts.log}}"
        }));
        let nodes = binder
            .build_dict_args(
                &mut scope,
                &outputs,
                BindContext::TemplateOutput(IoMode::Nodes),
            )
            .unwrap();
        assert_eq!(
            nodes.parameters[0].value_from,
            Some(json!({"parameter": "{{steps.gen.outputs.parameters.count}}"}))
        );
        assert_eq!(
            nodes.artifacts[0].from.as_deref(),
            Some("{{steps.gen.outputs.artifacts.log}}")
        );
        assert_eq!(nodes.artifacts[0].path, None);
    }

    #[test]
    fn test_map_value_copied_into_value_from() {
        let binder = Binder::new("/tmp");
        let mut scope = Scope::new();
        let outputs = map(json!({"status": {"jsonPath": "{.status.phase}"}}));

        let spec = binder
            .build_dict_args(
                &mut scope,
                &outputs,
                BindContext::TemplateOutput(IoMode::Files),
            )
            .unwrap();
        assert_eq!(
            spec.parameters[0].value_from,
            Some(json!({"jsonPath": "{.status.phase}"}))
        );
    }

    #[test]
    fn test_flow_arguments_register_globally() {
        let binder = Binder::new("/tmp");
        let mut scope = Scope::new();
        let args = map(json!({"msg": "hi", "@data": null}));

        let spec = binder
            .build_dict_args(&mut scope, &args, BindContext::FlowArgument)
            .unwrap();
        assert_eq!(spec.parameters[0].value.as_deref(), Some("hi"));

        scope.push();
        assert_eq!(
            scope.lookup("msg"),
            Some(&Binding::expr("{{workflow.parameters.msg}}"))
        );
        assert_eq!(
            scope.lookup("@data").unwrap().render(),
            "{{workflow.artifacts.data}}"
        );
    }

    #[test]
    fn test_call_args_zip_without_count_validation() {
        let binder = Binder::new("/tmp");
        let mut scope = Scope::new();
        let sig = parse_signature("echo(a, b, @file)").unwrap();
        let call = crate::signature::parse_call(
            "echo(one, file={{steps.gen.outputs.artifacts.out}}, two, three)",
        )
        .unwrap();

        let spec = binder
            .build_call_args(&mut scope, "echo", &sig.params, &call.args)
            .unwrap();
        let values: Vec<_> = spec
            .parameters
            .iter()
            .map(|p| p.value.clone().unwrap())
            .collect();
        assert_eq!(values, vec!["one", "two"]);
        assert_eq!(
            spec.artifacts[0].from.as_deref(),
            Some("{{steps.gen.outputs.artifacts.out}}")
        );
        assert!(scope.lookup("a").is_none());
    }

    #[test]
    fn test_call_args_are_not_substituted_twice() {
        let binder = Binder::new("/tmp");
        let mut scope = Scope::new();
        scope.set_global("x", Binding::Literal(json!("oops")));
        let sig = parse_signature("echo(msg)").unwrap();
        let call = crate::signature::parse_call("echo($x)").unwrap();

        let spec = binder
            .build_call_args(&mut scope, "echo", &sig.params, &call.args)
            .unwrap();
        assert_eq!(spec.parameters[0].value.as_deref(), Some("$x"));
    }

    #[test]
    fn test_node_output_artifact_requires_expression() {
        let binder = Binder::new("/tmp");
        let mut scope = Scope::new();
        let outputs = map(json!({"@log": null}));
        let err = binder
            .build_dict_args(
                &mut scope,
                &outputs,
                BindContext::TemplateOutput(IoMode::Nodes),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Compile(_)));
    }
}
