//! Manifest validation.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::graph::TaskGraph;
use crate::manifest::{GraphNode, Manifest, TemplateBody, WorkflowSpec};

/// Validate a compiled manifest.
///
/// Checks for:
/// - Unique template names
/// - Entry and exit handlers that name existing templates
/// - Unique node names within each steps/dag body
/// - Local calls to existing templates
/// - Dag dependencies that exist and form no cycle
pub fn validate_manifest(manifest: &Manifest) -> Result<()> {
    let spec = manifest.spec.workflow();

    let mut names = HashSet::new();
    for template in &spec.templates {
        if !names.insert(template.name.as_str()) {
            return Err(Error::Compile(format!(
                "Duplicate template name: {}",
                template.name
            )));
        }
    }

    for (role, handler) in [("entrypoint", &spec.entrypoint), ("onExit", &spec.on_exit)] {
        if let Some(handler) = handler {
            if !names.contains(handler.as_str()) {
                return Err(Error::Compile(format!(
                    "{} '{}' names no template",
                    role, handler
                )));
            }
        }
    }

    for template in &spec.templates {
        match &template.body {
            TemplateBody::Steps(groups) => {
                let nodes: Vec<&GraphNode> = groups.iter().flatten().collect();
                check_nodes(spec, &template.name, &nodes)?;
            }
            TemplateBody::Dag(dag) => {
                let nodes: Vec<&GraphNode> = dag.tasks.iter().collect();
                check_nodes(spec, &template.name, &nodes)?;
                check_dependencies(&template.name, &dag.tasks)?;
            }
            _ => {}
        }
    }

    Ok(())
}

fn check_nodes(spec: &WorkflowSpec, template: &str, nodes: &[&GraphNode]) -> Result<()> {
    let mut names = HashSet::new();
    for node in nodes {
        if node.name.is_empty() {
            return Err(Error::Compile(format!(
                "Template '{}' has a node with an empty name",
                template
            )));
        }
        if !names.insert(node.name.as_str()) {
            return Err(Error::Compile(format!(
                "Template '{}' has duplicate node name: {}",
                template, node.name
            )));
        }
        if let Some(callee) = &node.template {
            if spec.template(callee).is_none() {
                return Err(Error::Compile(format!(
                    "Node '{}' of template '{}' calls unknown template '{}'",
                    node.name, template, callee
                )));
            }
        }
    }
    Ok(())
}

fn check_dependencies(template: &str, tasks: &[GraphNode]) -> Result<()> {
    let graph = TaskGraph::from_tasks(tasks);
    for task in tasks {
        for dep in &task.dependencies {
            if !tasks.iter().any(|t| &t.name == dep) {
                return Err(Error::Compile(format!(
                    "Task '{}' of template '{}' depends on non-existent task '{}'",
                    task.name, template, dep
                )));
            }
        }
    }
    graph.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{DagSpec, FlowKind, ManifestSpec, Metadata, TemplateSpec};
    use serde_json::{json, Map};

    fn node(name: &str, template: &str, deps: &[&str]) -> GraphNode {
        GraphNode {
            name: name.into(),
            template: Some(template.into()),
            template_ref: None,
            arguments: None,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            when: None,
        }
    }

    fn template(name: &str, body: TemplateBody) -> TemplateSpec {
        TemplateSpec {
            name: name.into(),
            inputs: None,
            outputs: None,
            body,
            extra: Map::new(),
        }
    }

    fn manifest(templates: Vec<TemplateSpec>) -> Manifest {
        Manifest::new(
            FlowKind::Workflow,
            Metadata::default(),
            ManifestSpec::Workflow(WorkflowSpec {
                entrypoint: Some("main".into()),
                templates,
                ..Default::default()
            }),
        )
    }

    fn leaf(name: &str) -> TemplateSpec {
        template(name, TemplateBody::Suspend(json!({})))
    }

    #[test]
    fn test_valid_dag() {
        let dag = TemplateBody::Dag(DagSpec {
            tasks: vec![node("a", "leaf", &[]), node("b", "leaf", &["a"])],
        });
        let manifest = manifest(vec![template("main", dag), leaf("leaf")]);
        assert!(validate_manifest(&manifest).is_ok());
    }

    #[test]
    fn test_duplicate_template_name() {
        let manifest = manifest(vec![leaf("main"), leaf("main")]);
        let err = validate_manifest(&manifest).unwrap_err();
        assert!(err.to_string().contains("Duplicate template name"));
    }

    #[test]
    fn test_missing_entrypoint_template() {
        let manifest = manifest(vec![leaf("other")]);
        assert!(validate_manifest(&manifest).is_err());
    }

    #[test]
    fn test_duplicate_step_name_across_groups() {
        let steps = TemplateBody::Steps(vec![
            vec![node("a", "leaf", &[])],
            vec![node("a", "leaf", &[])],
        ]);
        let manifest = manifest(vec![template("main", steps), leaf("leaf")]);
        let err = validate_manifest(&manifest).unwrap_err();
        assert!(err.to_string().contains("duplicate node name"));
    }

    #[test]
    fn test_unknown_local_callee() {
        let steps = TemplateBody::Steps(vec![vec![node("a", "ghost", &[])]]);
        let manifest = manifest(vec![template("main", steps)]);
        let err = validate_manifest(&manifest).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_unknown_dependency() {
        let dag = TemplateBody::Dag(DagSpec {
            tasks: vec![node("a", "leaf", &["missing"])],
        });
        let manifest = manifest(vec![template("main", dag), leaf("leaf")]);
        let err = validate_manifest(&manifest).unwrap_err();
        assert!(err.to_string().contains("non-existent task"));
    }

    #[test]
    fn test_dependency_cycle() {
        let dag = TemplateBody::Dag(DagSpec {
            tasks: vec![node("a", "leaf", &["b"]), node("b", "leaf", &["a"])],
        });
        let manifest = manifest(vec![template("main", dag), leaf("leaf")]);
        let err = validate_manifest(&manifest).unwrap_err();
        assert_eq!(err.code(), "INVALID_DAG_EXPRESSION");
    }
}
