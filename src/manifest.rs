//! Argo manifest model.
//!
//! Typed serde structs for everything the compiler emits. Fields that are
//! empty are skipped so the YAML stays close to what a person would write.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// API version of every emitted manifest.
pub const API_VERSION: &str = "argoproj.io/v1alpha1";

/// Kind of manifest a flow compiles to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FlowKind {
    #[default]
    Workflow,
    WorkflowTemplate,
    ClusterWorkflowTemplate,
    CronWorkflow,
}

impl FlowKind {
    /// Reusable template collections, resolvable by later flows.
    pub fn is_template(&self) -> bool {
        matches!(
            self,
            FlowKind::WorkflowTemplate | FlowKind::ClusterWorkflowTemplate
        )
    }

    pub fn requires_entrypoint(&self) -> bool {
        !self.is_template()
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowKind::Workflow => "Workflow",
            FlowKind::WorkflowTemplate => "WorkflowTemplate",
            FlowKind::ClusterWorkflowTemplate => "ClusterWorkflowTemplate",
            FlowKind::CronWorkflow => "CronWorkflow",
        };
        f.write_str(name)
    }
}

/// Input or output parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_from: Option<Value>,
}

impl ParameterSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Input or output artifact. `source` carries storage keys such as `http`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArtifactSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(flatten)]
    pub source: Map<String, Value>,
}

impl ArtifactSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// `inputs`, `outputs` and `arguments` blocks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IoSpec {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParameterSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactSpec>,
}

impl IoSpec {
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty() && self.artifacts.is_empty()
    }

    /// `None` when empty, so the block is left out of the manifest.
    pub fn non_empty(self) -> Option<Self> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

/// Reference to a template of another WorkflowTemplate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRefSpec {
    pub name: String,
    pub template: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cluster_scope: bool,
}

/// A step or a dag task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_ref: Option<TemplateRefSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<IoSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DagSpec {
    pub tasks: Vec<GraphNode>,
}

/// Exactly one body per template.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TemplateBody {
    Container(Value),
    Script(Value),
    Steps(Vec<Vec<GraphNode>>),
    Dag(DagSpec),
    Suspend(Value),
    Resource(Value),
}

impl TemplateBody {
    pub fn kind(&self) -> &'static str {
        match self {
            TemplateBody::Container(_) => "container",
            TemplateBody::Script(_) => "script",
            TemplateBody::Steps(_) => "steps",
            TemplateBody::Dag(_) => "dag",
            TemplateBody::Suspend(_) => "suspend",
            TemplateBody::Resource(_) => "resource",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<IoSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<IoSpec>,
    #[serde(flatten)]
    pub body: TemplateBody,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_exit: Option<String>,
    pub arguments: IoSpec,
    pub volume_claim_templates: Vec<Value>,
    pub templates: Vec<TemplateSpec>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkflowSpec {
    pub fn template(&self, name: &str) -> Option<&TemplateSpec> {
        self.templates.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CronWorkflowSpec {
    pub schedule: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
    pub workflow_spec: WorkflowSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ManifestSpec {
    Workflow(WorkflowSpec),
    Cron(CronWorkflowSpec),
}

impl ManifestSpec {
    pub fn workflow(&self) -> &WorkflowSpec {
        match self {
            ManifestSpec::Workflow(spec) => spec,
            ManifestSpec::Cron(cron) => &cron.workflow_spec,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// A complete Argo manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub api_version: String,
    pub kind: FlowKind,
    pub metadata: Metadata,
    pub spec: ManifestSpec,
}

impl Manifest {
    pub fn new(kind: FlowKind, metadata: Metadata, spec: ManifestSpec) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind,
            metadata,
            spec,
        }
    }

    pub fn to_yaml(&self) -> crate::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_value(&self) -> crate::Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// A flow that compiled successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFlow {
    /// Flow name after substitution, used for the output file name.
    pub name: String,
    pub manifest: Manifest,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_template() -> TemplateSpec {
        TemplateSpec {
            name: "echo".into(),
            inputs: Some(IoSpec {
                parameters: vec![ParameterSpec::named("msg")],
                artifacts: vec![],
            }),
            outputs: None,
            body: TemplateBody::Container(json!({"image": "alpine:3.6"})),
            extra: Map::new(),
        }
    }

    #[test]
    fn test_template_serializes_body_inline() {
        let mut template = echo_template();
        template.extra.insert("retryStrategy".into(), json!({"limit": 2}));
        let value = serde_json::to_value(&template).unwrap();
        assert_eq!(value["name"], "echo");
        assert_eq!(value["inputs"]["parameters"][0]["name"], "msg");
        assert_eq!(value["container"]["image"], "alpine:3.6");
        assert_eq!(value["retryStrategy"]["limit"], 2);
        assert!(value.get("outputs").is_none());
    }

    #[test]
    fn test_cron_manifest_nests_workflow_spec() {
        let spec = ManifestSpec::Cron(CronWorkflowSpec {
            schedule: "*/5 * * * *".into(),
            options: Map::new(),
            workflow_spec: WorkflowSpec {
                entrypoint: Some("main".into()),
                templates: vec![echo_template()],
                ..Default::default()
            },
        });
        let manifest = Manifest::new(
            FlowKind::CronWorkflow,
            Metadata {
                name: Some("nightly".into()),
                ..Default::default()
            },
            spec,
        );
        let value = manifest.to_value().unwrap();
        assert_eq!(value["apiVersion"], API_VERSION);
        assert_eq!(value["kind"], "CronWorkflow");
        assert_eq!(value["spec"]["schedule"], "*/5 * * * *");
        assert_eq!(value["spec"]["workflowSpec"]["entrypoint"], "main");
        assert_eq!(value["spec"]["workflowSpec"]["arguments"], json!({}));
        assert_eq!(value["spec"]["workflowSpec"]["volumeClaimTemplates"], json!([]));
        assert!(value["metadata"].get("labels").is_none());
    }

    #[test]
    fn test_graph_node_serialization() {
        let node = GraphNode {
            name: "echo".into(),
            template: None,
            template_ref: Some(TemplateRefSpec {
                name: "lib".into(),
                template: "echo".into(),
                cluster_scope: false,
            }),
            arguments: None,
            dependencies: vec![],
            when: None,
        };
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value, json!({"name": "echo", "templateRef": {"name": "lib", "template": "echo"}}));
    }

    #[test]
    fn test_artifact_source_flattened() {
        let mut artifact = ArtifactSpec::named("kubectl");
        artifact.path = Some("/tmp/kubectl".into());
        artifact
            .source
            .insert("http".into(), json!({"url": "https://example.com/kubectl"}));
        let value = serde_json::to_value(&artifact).unwrap();
        assert_eq!(value["http"]["url"], "https://example.com/kubectl");
        assert_eq!(value["path"], "/tmp/kubectl");
    }

    #[test]
    fn test_kind_flags() {
        assert!(FlowKind::Workflow.requires_entrypoint());
        assert!(FlowKind::CronWorkflow.requires_entrypoint());
        assert!(FlowKind::WorkflowTemplate.is_template());
        assert!(!FlowKind::ClusterWorkflowTemplate.requires_entrypoint());
    }
}
