//! flowboot - compile declarative YAML pipelines into Argo Workflow manifests
//!
//! A flow document declares templates by call-style signature and wires them
//! together as sequential steps or as a dependency chain. flowboot resolves
//! every variable reference it can statically, names each graph node, and
//! emits a Workflow, WorkflowTemplate, ClusterWorkflowTemplate or
//! CronWorkflow.
//!
//! ## Key Features
//!
//! - **Signatures**: `echo(msg, @file)` declares a value and an artifact input
//! - **Variables**: `$msg`, `${image}`, `$@file`, `$gen.result` resolve to Argo expressions
//! - **Chains**: `A -> B;C -> D` builds a dag with one task per distinct reference
//! - **Reuse**: `lib/echo(x)` calls a template of another WorkflowTemplate
//!
//! ## Example
//!
//! ```yaml
//! flow: hello
//! vars:
//!   image: alpine:3.19
//!
//! templates:
//!   gen:
//!     out:
//!       "@data": /tmp/data
//!     container:
//!       image: ${image}
//!       command: date > /tmp/data
//!
//!   show(label, @data):
//!     container:
//!       command: echo $label; cat $@data
//!
//!   main:
//!     steps:
//!       - gen
//!       - [show(a, $@gen.data), show(b, $@gen.data)]
//! ```

pub mod compiler;
pub mod config;
pub mod error;
pub mod graph;
pub mod manifest;
pub mod namer;
pub mod output;
pub mod params;
pub mod resolver;
pub mod scope;
pub mod signature;
pub mod workflow;

pub use compiler::Compiler;
pub use error::{Error, Result};
