//! `dag` bodies and the dependency-chain language.
//!
//! ```text
//! chain    := position ('->' position)*
//! position := node (';' node)*
//! ```
//!
//! Every node of a position depends on every node of the previous one.
//! Repeated references to the same node text, across lines or within one,
//! resolve to a single task whose dependencies are unioned.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use super::{is_node_map, GraphEnv, NodeDecl, NodeKind};
use crate::error::{Error, Result};
use crate::manifest::{DagSpec, GraphNode};
use crate::namer::TaskNamer;
use crate::scope::substitute_str;
use crate::signature::split_top_level;

/// A parsed chain line: positions of node references.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    pub positions: Vec<Vec<String>>,
}

impl Chain {
    /// `(task, dependency)` pairs between adjacent positions.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.positions
            .windows(2)
            .flat_map(|pair| {
                pair[1].iter().flat_map(move |task| {
                    pair[0].iter().map(move |dep| (task.as_str(), dep.as_str()))
                })
            })
            .collect()
    }
}

/// Canonical node text: trimmed, no whitespace around commas outside quotes.
fn normalize_node(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut pending_space = false;

    for c in text.trim().chars() {
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && c != ',' && !out.ends_with(',') {
            out.push(' ');
        }
        pending_space = false;
        if c == '\'' || c == '"' {
            quote = Some(c);
        }
        out.push(c);
    }
    out
}

/// Parse one line of the chain language.
pub fn parse_chain(line: &str) -> Result<Chain> {
    let line = line.trim();
    if line.is_empty() {
        return Err(Error::invalid_dag(line, "empty expression"));
    }

    let positions = split_top_level(line, "->")
        .ok_or_else(|| Error::invalid_dag(line, "unbalanced brackets or quotes"))?;
    let count = positions.len();

    let mut parsed = Vec::with_capacity(count);
    for (idx, position) in positions.into_iter().enumerate() {
        if position.trim().is_empty() {
            let reason = if idx + 1 == count && count > 1 {
                "dangling '->'"
            } else {
                "empty position"
            };
            return Err(Error::invalid_dag(line, reason));
        }

        let nodes = split_top_level(position, ";")
            .ok_or_else(|| Error::invalid_dag(line, "unbalanced brackets or quotes"))?;
        let mut position_nodes = Vec::with_capacity(nodes.len());
        for node in nodes {
            let node = normalize_node(node);
            if node.is_empty() {
                return Err(Error::invalid_dag(line, "empty node"));
            }
            position_nodes.push(node);
        }
        parsed.push(position_nodes);
    }

    Ok(Chain { positions: parsed })
}

/// Dependency graph over task names, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    order: Vec<String>,
    dependencies: HashMap<String, Vec<String>>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from compiled dag tasks.
    pub fn from_tasks(tasks: &[GraphNode]) -> Self {
        let mut graph = Self::new();
        for task in tasks {
            graph.add_task(&task.name);
            for dep in &task.dependencies {
                graph.add_dependency(&task.name, dep);
            }
        }
        graph
    }

    /// Add a task with no dependencies. Adding a known task is a no-op.
    pub fn add_task(&mut self, name: &str) {
        if !self.dependencies.contains_key(name) {
            self.order.push(name.to_string());
            self.dependencies.insert(name.to_string(), Vec::new());
        }
    }

    /// Record that `task` depends on `dependency`, ignoring duplicates.
    pub fn add_dependency(&mut self, task: &str, dependency: &str) {
        self.add_task(task);
        if let Some(deps) = self.dependencies.get_mut(task) {
            if !deps.iter().any(|d| d == dependency) {
                deps.push(dependency.to_string());
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dependencies.contains_key(name)
    }

    pub fn tasks(&self) -> &[String] {
        &self.order
    }

    pub fn dependencies(&self, name: &str) -> &[String] {
        self.dependencies
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Validate the graph for cycles.
    pub fn validate(&self) -> Result<()> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for node in &self.order {
            if !visited.contains(node.as_str())
                && self.has_cycle(node, &mut visited, &mut rec_stack)
            {
                return Err(Error::invalid_dag(
                    node,
                    format!("dependency cycle detected involving task '{}'", node),
                ));
            }
        }

        Ok(())
    }

    fn has_cycle<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
    ) -> bool {
        visited.insert(node);
        rec_stack.insert(node);

        for neighbor in self.dependencies(node) {
            if !visited.contains(neighbor.as_str()) {
                if self.has_cycle(neighbor, visited, rec_stack) {
                    return true;
                }
            } else if rec_stack.contains(neighbor.as_str()) {
                return true;
            }
        }

        rec_stack.remove(node);
        false
    }

    /// Get execution order (topological sort) of every task.
    /// Dependencies come first; ties keep declaration order.
    pub fn execution_order(&self) -> Result<Vec<String>> {
        self.validate()?;

        let mut order = Vec::new();
        let mut visited = HashSet::new();
        for task in &self.order {
            self.visit_for_order(task, &mut visited, &mut order);
        }
        Ok(order)
    }

    fn visit_for_order(&self, node: &str, visited: &mut HashSet<String>, order: &mut Vec<String>) {
        if !visited.insert(node.to_string()) {
            return;
        }
        for dep in self.dependencies(node) {
            self.visit_for_order(dep, visited, order);
        }
        order.push(node.to_string());
    }

    /// Get all tasks that depend on the given task.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.order
            .iter()
            .filter(|task| self.dependencies(task).iter().any(|d| d == name))
            .map(String::as_str)
            .collect()
    }

    /// Tasks nothing depends on.
    pub fn sinks(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|task| self.dependents(task).is_empty())
            .map(String::as_str)
            .collect()
    }

    /// Generate a simple text tree of `root` and what it depends on.
    pub fn to_text(&self, root: &str) -> String {
        let mut lines = Vec::new();
        let mut visited = HashSet::new();

        self.format_node(root, 0, &mut visited, &mut lines);

        lines.join("\n")
    }

    fn format_node(
        &self,
        node: &str,
        depth: usize,
        visited: &mut HashSet<String>,
        lines: &mut Vec<String>,
    ) {
        let indent = "  ".repeat(depth);
        let marker = if depth == 0 { "" } else { "└─ " };

        if visited.contains(node) {
            lines.push(format!("{}{}{}  (already shown)", indent, marker, node));
            return;
        }

        visited.insert(node.to_string());
        lines.push(format!("{}{}{}", indent, marker, node));

        for dep in self.dependencies(node) {
            self.format_node(dep, depth + 1, visited, lines);
        }
    }
}

struct DagBuilder<'e, 'a> {
    env: &'e mut GraphEnv<'a>,
    namer: &'e mut dyn TaskNamer,
    tasks: Vec<GraphNode>,
    index: HashMap<String, usize>,
    graph: TaskGraph,
}

impl DagBuilder<'_, '_> {
    fn push(&mut self, node: GraphNode) -> String {
        let name = node.name.clone();
        self.graph.add_task(&name);
        self.index.insert(name.clone(), self.tasks.len());
        self.tasks.push(node);
        name
    }

    /// Task for a chain reference, compiling it on first sight.
    fn chain_task(&mut self, reference: &str) -> Result<String> {
        if self.index.contains_key(reference) {
            return Ok(reference.to_string());
        }
        let name = self.namer.get_name(reference);
        if self.index.contains_key(&name) {
            return Ok(name);
        }

        let call = substitute_str(self.env.scope, reference)?;
        let node = self
            .env
            .compile_node(NodeKind::Task, name, &call, None, Vec::new())?;
        Ok(self.push(node))
    }

    fn chain_lines(&mut self, text: &str) -> Result<()> {
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let chain = parse_chain(line)?;
            let mut previous: Vec<String> = Vec::new();
            for position in &chain.positions {
                let mut current = Vec::with_capacity(position.len());
                for reference in position {
                    let name = self.chain_task(reference)?;
                    for dep in previous.iter().filter(|dep| **dep != name) {
                        self.graph.add_dependency(&name, dep);
                    }
                    current.push(name);
                }
                previous = current;
            }
        }
        Ok(())
    }

    fn explicit(&mut self, value: &Value, explicit_name: Option<&str>) -> Result<()> {
        let decl = NodeDecl::parse(value, explicit_name, NodeKind::Task)?;
        let (call, when, args) = decl.resolve(self.env.scope)?;

        let name = match &decl.name {
            Some(name) => {
                self.namer.reserve(name);
                name.clone()
            }
            None => self.namer.build_name(&call),
        };
        if self.index.contains_key(&name) {
            return Err(Error::Compile(format!("Duplicate task name '{}'", name)));
        }

        let node = self
            .env
            .compile_node(NodeKind::Task, name, &call, when, args)?;
        let name = self.push(node);
        for dep in &decl.dependencies {
            self.graph.add_dependency(&name, dep);
        }
        Ok(())
    }

    fn named_map(&mut self, map: &Map<String, Value>) -> Result<()> {
        for (name, value) in map {
            self.explicit(value, Some(name))?;
        }
        Ok(())
    }

    fn element(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::String(text) => self.chain_lines(text),
            Value::Array(items) => items.iter().try_for_each(|item| self.element(item)),
            Value::Object(map) if map.len() == 1 && map.contains_key("tasks") => {
                self.element(&map["tasks"])
            }
            Value::Object(map) if is_node_map(map) => self.explicit(value, None),
            Value::Object(map) => self.named_map(map),
            other => Err(Error::Compile(format!(
                "dag entries must be chain expressions or task maps, got: {}",
                other
            ))),
        }
    }

    fn finish(mut self) -> Result<DagSpec> {
        if self.tasks.is_empty() {
            return Err(Error::Compile("dag body is empty".to_string()));
        }

        for task in self.graph.tasks() {
            for dep in self.graph.dependencies(task) {
                if !self.index.contains_key(dep) {
                    return Err(Error::Compile(format!(
                        "Task '{}' depends on unknown task '{}'",
                        task, dep
                    )));
                }
            }
        }
        self.graph.validate()?;

        for task in &mut self.tasks {
            task.dependencies = self.graph.dependencies(&task.name).to_vec();
        }
        Ok(DagSpec { tasks: self.tasks })
    }
}

/// Compile a dag body: chain lines, explicit task maps, or a mix of both.
pub fn build_dag(
    env: &mut GraphEnv<'_>,
    namer: &mut dyn TaskNamer,
    spec: &Value,
) -> Result<DagSpec> {
    let mut builder = DagBuilder {
        env,
        namer,
        tasks: Vec::new(),
        index: HashMap::new(),
        graph: TaskGraph::new(),
    };
    builder.element(spec)?;
    builder.finish()
}
