//! Flow compiler.
//!
//! Each flow compiles against a fresh [`FlowState`]: its own scope, artifact
//! store and template table. Every steps or dag body gets its own namer. The
//! only thing shared between flows is the [`TemplateResolver`], which learns
//! every WorkflowTemplate compiled so far so that later flows can call into
//! it.

mod body;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::config::{Config, DefaultsConfig};
use crate::error::{Error, Result};
use crate::graph::{build_dag, build_steps, GraphEnv, SignatureLookup, TemplateSignature};
use crate::manifest::{
    CompiledFlow, CronWorkflowSpec, FlowKind, Manifest, ManifestSpec, Metadata, TemplateBody,
    TemplateSpec, WorkflowSpec,
};
use crate::namer::{CallNamer, NamingPolicy};
use crate::params::{BindContext, Binder, IoMode};
use crate::resolver::TemplateResolver;
use crate::scope::{substitute, substitute_str, value_to_string, Binding, PopMode, Scope};
use crate::signature::{Qualifier, TemplateTarget};
use crate::workflow::{
    parse_document, parse_document_file, parse_flow, validate_manifest, BodyDecl, FlowDecl,
    TemplateDecl,
};

use body::BodyContext;

/// Template every Workflow starts in.
pub const ENTRYPOINT: &str = "main";

/// Templates that become `spec.onExit`, in order of preference.
const EXIT_HANDLERS: [&str; 2] = ["onexit", "exit"];

/// Spec keys the compiler owns.
const GENERATED_SPEC_KEYS: [&str; 4] = ["templates", "arguments", "volumeClaimTemplates", "entrypoint"];

/// Compiles flow documents into Argo manifests.
pub struct Compiler {
    defaults: DefaultsConfig,
    resolver: TemplateResolver,
    vars: Map<String, Value>,
    base_dir: PathBuf,
}

impl Compiler {
    pub fn new(defaults: DefaultsConfig, resolver: TemplateResolver) -> Self {
        Self {
            defaults,
            resolver,
            vars: Map::new(),
            base_dir: PathBuf::from("."),
        }
    }

    /// Build a compiler with the defaults and template sources of `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            config.defaults.clone(),
            TemplateResolver::from_config(&config.resolver)?,
        ))
    }

    /// Compile-time variables visible to every flow. They win over a flow's
    /// own `vars`.
    pub fn with_vars(mut self, vars: Map<String, Value>) -> Self {
        self.vars = vars;
        self
    }

    /// Directory `file` keys are resolved against.
    pub fn set_base_dir(&mut self, dir: impl Into<PathBuf>) {
        self.base_dir = dir.into();
    }

    /// Compile every flow of a YAML document stream.
    ///
    /// The outer error is a document that cannot be read at all. Each flow
    /// then succeeds or fails on its own.
    pub fn compile_str(&mut self, yaml: &str) -> Result<Vec<Result<CompiledFlow>>> {
        let flows = parse_document(yaml)?;
        Ok(self.compile_flows(&flows))
    }

    /// Compile a document file. `file` keys resolve next to it.
    pub fn compile_file(&mut self, path: &Path) -> Result<Vec<Result<CompiledFlow>>> {
        let flows = parse_document_file(path)?;
        if let Some(dir) = path.parent() {
            self.set_base_dir(dir);
        }
        Ok(self.compile_flows(&flows))
    }

    pub fn compile_flows(&mut self, flows: &[Value]) -> Vec<Result<CompiledFlow>> {
        flows
            .iter()
            .enumerate()
            .map(|(idx, flow)| {
                let result = self.compile_flow(flow);
                if let Err(e) = &result {
                    let name = flow.get("flow").map(value_to_string);
                    warn!(
                        "Flow {} failed: {}",
                        name.unwrap_or_else(|| format!("#{}", idx + 1)),
                        e
                    );
                }
                result
            })
            .collect()
    }

    /// Compile one raw flow map.
    pub fn compile_flow(&mut self, value: &Value) -> Result<CompiledFlow> {
        let decl = parse_flow(value)?;
        let compiled = FlowState::new(
            &self.defaults,
            &self.resolver,
            &self.base_dir,
            decl.task_names,
        )
        .compile(&decl, &self.vars)?;

        let kind = compiled.manifest.kind;
        if kind.is_template() {
            let qualifier = Qualifier {
                name: compiled.name.clone(),
                cluster_scope: kind == FlowKind::ClusterWorkflowTemplate,
            };
            self.resolver
                .register(qualifier, &compiled.manifest.to_value()?)?;
        }
        Ok(compiled)
    }
}

/// Callable templates of the flow being compiled, then external collections.
struct Callees<'a> {
    local: &'a HashMap<String, TemplateSignature>,
    resolver: &'a TemplateResolver,
}

impl SignatureLookup for Callees<'_> {
    fn signature(&self, target: &TemplateTarget) -> Result<TemplateSignature> {
        match target {
            TemplateTarget::Local(name) => self
                .local
                .get(name)
                .cloned()
                .ok_or_else(|| Error::Compile(format!("Unknown template '{}'", name))),
            TemplateTarget::External {
                qualifier,
                template,
            } => self.resolver.resolve(qualifier, template),
        }
    }
}

/// Mutable state of one flow compilation.
struct FlowState<'c> {
    defaults: &'c DefaultsConfig,
    resolver: &'c TemplateResolver,
    base_dir: &'c Path,
    scope: Scope,
    binder: Binder,
    task_names: NamingPolicy,
    signatures: HashMap<String, TemplateSignature>,
    claims: Vec<Value>,
    mounts: Vec<Value>,
}

impl<'c> FlowState<'c> {
    fn new(
        defaults: &'c DefaultsConfig,
        resolver: &'c TemplateResolver,
        base_dir: &'c Path,
        task_names: NamingPolicy,
    ) -> Self {
        Self {
            defaults,
            resolver,
            base_dir,
            scope: Scope::new(),
            binder: Binder::new(defaults.artifact_dir.clone()),
            task_names,
            signatures: HashMap::new(),
            claims: Vec::new(),
            mounts: Vec::new(),
        }
    }

    fn compile(mut self, decl: &FlowDecl, cli_vars: &Map<String, Value>) -> Result<CompiledFlow> {
        self.bind_vars(&decl.vars, cli_vars)?;

        let name = substitute_str(&self.scope, &decl.name)?;
        if name.trim().is_empty() {
            return Err(Error::Compile("Flow name is empty".to_string()));
        }
        self.scope
            .set_global("flow", Binding::Literal(Value::String(name.clone())));
        info!("Compiling flow '{}'", name);

        let cron = decl
            .cron
            .as_ref()
            .map(|cron| self.cron_schedule(cron))
            .transpose()?;
        let kind = flow_kind(&name, decl.kind, cron.is_some())?;

        for entry in &decl.vc {
            let entry = substitute_str(&self.scope, entry)?;
            self.volume_claim(&entry)?;
        }
        for entry in &decl.art {
            let entry = substitute_str(&self.scope, entry)?;
            self.store_artifact(&entry)?;
        }

        let arguments = self
            .binder
            .build_dict_args(&mut self.scope, &decl.args, BindContext::FlowArgument)?;

        let templates = self.compile_templates(&decl.templates)?;

        let has_template = |wanted: &str| templates.iter().any(|t| t.name == wanted);
        let entrypoint = if has_template(ENTRYPOINT) {
            Some(ENTRYPOINT.to_string())
        } else if kind.requires_entrypoint() {
            return Err(Error::MissingEntrypoint(name));
        } else {
            None
        };
        let mut on_exit = EXIT_HANDLERS
            .iter()
            .find(|handler| has_template(handler))
            .map(|handler| handler.to_string());

        let mut extra = Map::new();
        if !kind.is_template() {
            extra.insert(
                "ttlStrategy".to_string(),
                json!({ "secondsAfterCompletion": self.defaults.ttl_seconds_after_completion }),
            );
            extra.insert(
                "podGC".to_string(),
                json!({ "strategy": self.defaults.pod_gc_strategy }),
            );
        }
        for (key, value) in substitute_map(&self.scope, &decl.spec)? {
            if GENERATED_SPEC_KEYS.contains(&key.as_str()) {
                return Err(Error::Compile(format!(
                    "'spec.{}' is generated by the compiler and cannot be set",
                    key
                )));
            }
            if key == "onExit" {
                on_exit = Some(value_to_string(&value));
            } else {
                extra.insert(key, value);
            }
        }

        let workflow_spec = WorkflowSpec {
            entrypoint,
            on_exit,
            arguments,
            volume_claim_templates: std::mem::take(&mut self.claims),
            templates,
            extra,
        };
        let spec = match cron {
            Some((schedule, options)) => ManifestSpec::Cron(CronWorkflowSpec {
                schedule,
                options,
                workflow_spec,
            }),
            None => ManifestSpec::Workflow(workflow_spec),
        };

        let metadata = self.metadata(decl, &name, kind)?;
        let manifest = Manifest::new(kind, metadata, spec);
        validate_manifest(&manifest)?;

        info!(
            "Compiled flow '{}' ({}, {} templates)",
            name,
            kind,
            manifest.spec.workflow().templates.len()
        );
        Ok(CompiledFlow { name, manifest })
    }

    /// Bind compile-time variables. CLI variables go first so flow variables
    /// can use them, and are never shadowed.
    fn bind_vars(&mut self, vars: &Map<String, Value>, cli_vars: &Map<String, Value>) -> Result<()> {
        for (key, value) in cli_vars {
            self.scope.set_global(key, Binding::Literal(value.clone()));
        }
        for (key, value) in vars {
            if cli_vars.contains_key(key) {
                debug!("Variable '{}' is overridden on the command line", key);
                continue;
            }
            let value = substitute(&self.scope, value)?;
            self.scope.set_global(key, Binding::Literal(value));
        }
        Ok(())
    }

    fn cron_schedule(&self, cron: &Value) -> Result<(String, Map<String, Value>)> {
        match substitute(&self.scope, cron)? {
            Value::String(schedule) => Ok((schedule, Map::new())),
            Value::Object(mut options) => match options.remove("schedule") {
                Some(Value::String(schedule)) => Ok((schedule, options)),
                _ => Err(Error::Compile(
                    "'cron' options need a 'schedule' string".to_string(),
                )),
            },
            other => Err(Error::Compile(format!(
                "'cron' must be a schedule or a map, got: {}",
                other
            ))),
        }
    }

    /// `name:path[:size]`, or a bare size for the default `work` claim.
    fn volume_claim(&mut self, entry: &str) -> Result<()> {
        let parts: Vec<&str> = if entry.contains(':') {
            entry.splitn(3, ':').map(str::trim).collect()
        } else {
            vec!["work", "/work", entry.trim()]
        };
        let (name, path, size) = match parts.as_slice() {
            [name, path] => (*name, *path, self.defaults.volume_size.as_str()),
            [name, path, size] => (*name, *path, *size),
            _ => (entry, "", ""),
        };
        if name.is_empty() || path.is_empty() || size.is_empty() {
            return Err(Error::Compile(format!(
                "Invalid volume claim '{}'; expected name:path[:size]",
                entry
            )));
        }

        debug!("Volume claim '{}' mounted at {} ({})", name, path, size);
        self.claims.push(json!({
            "metadata": { "name": name },
            "spec": {
                "accessModes": ["ReadWriteOnce"],
                "resources": { "requests": { "storage": size } }
            }
        }));
        self.mounts.push(json!({ "name": name, "mountPath": path }));
        Ok(())
    }

    /// `name:location`. The location is a path or an `http(s)://` URL.
    fn store_artifact(&mut self, entry: &str) -> Result<()> {
        let Some((name, location)) = entry.split_once(':') else {
            return Err(Error::Compile(format!(
                "Invalid artifact '{}'; expected name:location",
                entry
            )));
        };
        let (name, location) = (name.trim(), location.trim());
        if name.is_empty() || location.is_empty() {
            return Err(Error::Compile(format!(
                "Invalid artifact '{}'; expected name:location",
                entry
            )));
        }

        let path = if location.contains("://") {
            self.binder.default_path(name)
        } else {
            location.to_string()
        };
        self.binder.store_artifact(name, location);
        self.scope.set_global(
            Scope::artifact_key(name),
            Binding::Artifact {
                expr: path.clone(),
                path: Some(path),
            },
        );
        Ok(())
    }

    fn compile_templates(&mut self, entries: &[(String, Value)]) -> Result<Vec<TemplateSpec>> {
        // Signatures are recorded up front so calls may refer forward.
        let mut decls = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let decl = TemplateDecl::parse(key, value)?;
            if self.signatures.contains_key(&decl.name) {
                return Err(Error::Compile(format!(
                    "Duplicate template name: {}",
                    decl.name
                )));
            }
            self.signatures.insert(
                decl.name.clone(),
                TemplateSignature {
                    inputs: decl.inputs.clone(),
                    outputs: decl.outputs.clone(),
                },
            );
            decls.push(decl);
        }

        decls
            .iter()
            .map(|decl| {
                self.scope.push();
                let result = self.compile_template(decl);
                self.scope.pop(PopMode::Discard);
                result
            })
            .collect()
    }

    fn compile_template(&mut self, decl: &TemplateDecl) -> Result<TemplateSpec> {
        let mode = if decl.body.is_graph() {
            IoMode::Nodes
        } else {
            IoMode::Files
        };
        let inputs = self.binder.build_list_args(
            &mut self.scope,
            &decl.inputs,
            BindContext::TemplateInput(mode),
        )?;

        let body = self.compile_body(&decl.name, &decl.body)?;

        let outputs = self.binder.build_list_args(
            &mut self.scope,
            &decl.outputs,
            BindContext::TemplateOutput(mode),
        )?;

        let extra = substitute_map(&self.scope, &decl.extra)?;

        debug!("Compiled template '{}' ({})", decl.name, body.kind());
        Ok(TemplateSpec {
            name: decl.name.clone(),
            inputs: inputs.non_empty(),
            outputs: outputs.non_empty(),
            body,
            extra,
        })
    }

    fn compile_body(&mut self, template: &str, declared: &BodyDecl) -> Result<TemplateBody> {
        let ctx = BodyContext {
            defaults: self.defaults,
            mounts: &self.mounts,
            base_dir: self.base_dir,
        };

        let compiled = match declared {
            BodyDecl::Container(value) => {
                TemplateBody::Container(body::container(&ctx, template, substitute(&self.scope, value)?)?)
            }
            BodyDecl::Script(value) => TemplateBody::Script(body::script(
                &ctx,
                template,
                substitute(&self.scope, value)?,
                &self.defaults.script_image,
                None,
            )?),
            BodyDecl::Python(value) => {
                TemplateBody::Script(body::python(&ctx, template, substitute(&self.scope, value)?)?)
            }
            BodyDecl::Suspend(value) => {
                TemplateBody::Suspend(body::suspend(template, substitute(&self.scope, value)?)?)
            }
            BodyDecl::Resource(value) => {
                TemplateBody::Resource(body::resource(&ctx, template, substitute(&self.scope, value)?)?)
            }
            BodyDecl::Steps(value) => {
                let callees = Callees {
                    local: &self.signatures,
                    resolver: self.resolver,
                };
                let mut env = GraphEnv {
                    scope: &mut self.scope,
                    binder: &self.binder,
                    callees: &callees,
                };
                TemplateBody::Steps(build_steps(&mut env, &mut CallNamer::default(), value)?)
            }
            BodyDecl::Dag(value) => {
                let callees = Callees {
                    local: &self.signatures,
                    resolver: self.resolver,
                };
                let mut env = GraphEnv {
                    scope: &mut self.scope,
                    binder: &self.binder,
                    callees: &callees,
                };
                let mut namer = self.task_names.namer();
                TemplateBody::Dag(build_dag(&mut env, namer.as_mut(), value)?)
            }
        };
        Ok(compiled)
    }

    fn metadata(&self, decl: &FlowDecl, name: &str, kind: FlowKind) -> Result<Metadata> {
        let mut labels = BTreeMap::new();
        for (key, value) in substitute_map(&self.scope, &decl.labels)? {
            labels.insert(key, value_to_string(&value));
        }
        labels.insert("flow".to_string(), name.to_string());

        let namespace = decl
            .namespace
            .as_deref()
            .map(|ns| substitute_str(&self.scope, ns))
            .transpose()?;

        let (metadata_name, generate_name) = match kind {
            FlowKind::Workflow => (None, Some(format!("{}-", name))),
            _ => (Some(name.to_string()), None),
        };

        Ok(Metadata {
            name: metadata_name,
            generate_name,
            namespace,
            labels,
        })
    }
}

fn flow_kind(name: &str, declared: Option<FlowKind>, has_cron: bool) -> Result<FlowKind> {
    match (declared, has_cron) {
        (Some(kind), true) if kind.is_template() => Err(Error::Compile(format!(
            "Flow '{}' is a {} and cannot carry a 'cron' schedule",
            name, kind
        ))),
        (Some(FlowKind::CronWorkflow), false) => Err(Error::Compile(format!(
            "Flow '{}' is a CronWorkflow without a 'cron' schedule",
            name
        ))),
        (_, true) => Ok(FlowKind::CronWorkflow),
        (Some(kind), false) => Ok(kind),
        (None, false) => Ok(FlowKind::Workflow),
    }
}

fn substitute_map(scope: &Scope, map: &Map<String, Value>) -> Result<Map<String, Value>> {
    let mut out = Map::with_capacity(map.len());
    for (key, value) in map {
        out.insert(substitute_str(scope, key)?, substitute(scope, value)?);
    }
    Ok(out)
}
