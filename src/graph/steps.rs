//! Sequential `steps` bodies.
//!
//! ```yaml
//! steps:
//!   - gen()                                 # group 1
//!   - [echo($gen.result), echo(done)]       # group 2, parallel
//!   - {template: notify, when: "{{workflow.status}} == Failed"}
//! ```

use std::collections::HashSet;

use serde_json::{Map, Value};

use super::{is_node_map, GraphEnv, NodeDecl, NodeKind};
use crate::error::{Error, Result};
use crate::manifest::GraphNode;
use crate::namer::TaskNamer;

struct StepsBuilder<'e, 'a> {
    env: &'e mut GraphEnv<'a>,
    namer: &'e mut dyn TaskNamer,
    names: HashSet<String>,
}

impl StepsBuilder<'_, '_> {
    fn leaf(&mut self, value: &Value, explicit_name: Option<&str>) -> Result<GraphNode> {
        let decl = NodeDecl::parse(value, explicit_name, NodeKind::Step)?;
        let (call, when, args) = decl.resolve(self.env.scope)?;

        let name = match decl.name {
            Some(name) => {
                self.namer.reserve(&name);
                name
            }
            None => self.namer.build_name(&call),
        };
        if !self.names.insert(name.clone()) {
            return Err(Error::Compile(format!("Duplicate step name '{}'", name)));
        }

        self.env.compile_node(NodeKind::Step, name, &call, when, args)
    }

    fn named_map(&mut self, map: &Map<String, Value>, group: &mut Vec<GraphNode>) -> Result<()> {
        for (name, value) in map {
            group.push(self.leaf(value, Some(name))?);
        }
        Ok(())
    }

    /// Walk a parallel group depth-first, in order.
    fn flatten(&mut self, items: &[Value], group: &mut Vec<GraphNode>) -> Result<()> {
        for item in items {
            match item {
                Value::Array(nested) => self.flatten(nested, group)?,
                Value::Object(map) if !is_node_map(map) => self.named_map(map, group)?,
                _ => group.push(self.leaf(item, None)?),
            }
        }
        Ok(())
    }
}

/// Compile a steps body into Argo's list of parallel groups.
pub fn build_steps(
    env: &mut GraphEnv<'_>,
    namer: &mut dyn TaskNamer,
    spec: &Value,
) -> Result<Vec<Vec<GraphNode>>> {
    let mut builder = StepsBuilder {
        env,
        namer,
        names: HashSet::new(),
    };
    let mut groups = Vec::new();

    match spec {
        Value::String(_) => groups.push(vec![builder.leaf(spec, None)?]),
        Value::Array(items) => {
            for item in items {
                let mut group = Vec::new();
                match item {
                    Value::Array(parallel) => builder.flatten(parallel, &mut group)?,
                    Value::Object(map) if !is_node_map(map) => {
                        builder.named_map(map, &mut group)?
                    }
                    _ => group.push(builder.leaf(item, None)?),
                }
                if !group.is_empty() {
                    groups.push(group);
                }
            }
        }
        Value::Object(map) if is_node_map(map) => groups.push(vec![builder.leaf(spec, None)?]),
        Value::Object(map) => {
            for (name, value) in map {
                groups.push(vec![builder.leaf(value, Some(name))?]);
            }
        }
        other => {
            return Err(Error::Compile(format!(
                "steps must be a call, a list or a map, got: {}",
                other
            )))
        }
    }

    if groups.is_empty() {
        return Err(Error::Compile("steps body is empty".to_string()));
    }
    Ok(groups)
}
