//! Compile-time symbol table.
//!
//! Lookups see exactly two frames: the frame of the template currently being
//! compiled and the global frame of the flow. Frames pushed in between are not
//! consulted.

mod substitute;

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};

pub use substitute::{substitute, substitute_str, value_to_string};

/// Prefix under which artifact bindings are stored, matching the `@` sigil
/// of reference tokens.
pub const ARTIFACT_PREFIX: &str = "@";

/// What a scope name is bound to.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// Compile-time constant, substituted as is.
    Literal(Value),
    /// Runtime reference expression such as `{{inputs.parameters.x}}`.
    Expr(String),
    /// Artifact handle. Renders as its mount path when known, else as `expr`.
    Artifact { expr: String, path: Option<String> },
    /// Synthetic variables of a compiled step or task.
    Outputs(NodeOutputs),
}

/// Output namespace of a graph node (`$gen.result`, `$@gen.out`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutputs {
    pub parameters: BTreeMap<String, String>,
    pub artifacts: BTreeMap<String, String>,
}

impl NodeOutputs {
    /// Build the namespace for node `node` under `prefix` (`steps` or `tasks`).
    ///
    /// `result` is always present unless a value output already claims it.
    pub fn new<'a>(
        prefix: &str,
        node: &str,
        values: impl IntoIterator<Item = &'a str>,
        artifacts: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut outputs = NodeOutputs::default();
        for name in values {
            outputs.parameters.insert(
                name.to_string(),
                format!("{{{{{}.{}.outputs.parameters.{}}}}}", prefix, node, name),
            );
        }
        for name in artifacts {
            outputs.artifacts.insert(
                name.to_string(),
                format!("{{{{{}.{}.outputs.artifacts.{}}}}}", prefix, node, name),
            );
        }
        outputs
            .parameters
            .entry("result".to_string())
            .or_insert_with(|| format!("{{{{{}.{}.outputs.result}}}}", prefix, node));
        outputs
    }
}

impl Binding {
    pub fn expr(expr: impl Into<String>) -> Self {
        Binding::Expr(expr.into())
    }

    /// Text form used when the binding is interpolated into a larger string.
    pub fn render(&self) -> String {
        match self {
            Binding::Literal(value) => value_to_string(value),
            Binding::Expr(expr) => expr.clone(),
            Binding::Artifact { expr, path } => path.clone().unwrap_or_else(|| expr.clone()),
            Binding::Outputs(outputs) => outputs
                .parameters
                .get("result")
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Navigate one member segment. `artifact` selects the artifact half of a
    /// node-output namespace.
    pub fn member(&self, segment: &str, artifact: bool) -> Option<Binding> {
        match self {
            Binding::Literal(Value::Object(map)) => {
                map.get(segment).cloned().map(Binding::Literal)
            }
            Binding::Literal(Value::Array(items)) => segment
                .parse::<usize>()
                .ok()
                .and_then(|idx| items.get(idx))
                .cloned()
                .map(Binding::Literal),
            Binding::Outputs(outputs) if artifact => {
                outputs
                    .artifacts
                    .get(segment)
                    .map(|expr| Binding::Artifact {
                        expr: expr.clone(),
                        path: None,
                    })
            }
            Binding::Outputs(outputs) => outputs.parameters.get(segment).cloned().map(Binding::Expr),
            _ => None,
        }
    }
}

/// How `pop` treats the bindings of the discarded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopMode {
    /// Drop all bindings of the frame.
    Discard,
    /// Copy the bindings into the frame below (or the global frame).
    Merge,
}

type Frame = HashMap<String, Binding>;

/// Stack of binding frames on top of a global flow frame.
#[derive(Debug, Default)]
pub struct Scope {
    global: Frame,
    frames: Vec<Frame>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key under which an artifact named `name` is stored.
    pub fn artifact_key(name: &str) -> String {
        format!("{}{}", ARTIFACT_PREFIX, name)
    }

    /// Enter a new frame.
    pub fn push(&mut self) {
        self.frames.push(Frame::new());
    }

    /// Leave the current frame.
    pub fn pop(&mut self, mode: PopMode) {
        let Some(frame) = self.frames.pop() else {
            warn!("Scope pop without a matching push");
            return;
        };
        if mode == PopMode::Merge {
            let target = self.frames.last_mut().unwrap_or(&mut self.global);
            target.extend(frame);
        }
    }

    /// Number of pushed frames above the global frame.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Bind `name` in the current frame (the global frame when none is pushed).
    pub fn set(&mut self, name: impl Into<String>, binding: Binding) {
        let frame = self.frames.last_mut().unwrap_or(&mut self.global);
        frame.insert(name.into(), binding);
    }

    /// Bind `name` in the global flow frame.
    pub fn set_global(&mut self, name: impl Into<String>, binding: Binding) {
        self.global.insert(name.into(), binding);
    }

    /// Look `name` up in the current frame, then the global frame.
    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.frames
            .last()
            .and_then(|frame| frame.get(name))
            .or_else(|| self.global.get(name))
    }

    /// Look `name` up, failing with `UnboundVariable` when it is required.
    pub fn get(&self, name: &str, required: bool) -> Result<Option<&Binding>> {
        match self.lookup(name) {
            Some(binding) => Ok(Some(binding)),
            None if required => Err(Error::UnboundVariable(name.to_string())),
            None => Ok(None),
        }
    }

    /// Drop every frame and every global binding.
    pub fn clear_all(&mut self) {
        self.frames.clear();
        self.global.clear();
    }
}
