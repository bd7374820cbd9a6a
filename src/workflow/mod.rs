//! Flow documents: parsing, declarations, and manifest validation.
//!
//! A flow document is a YAML stream. Each flow consists of:
//! - Settings: kind, labels, variables, arguments, volumes, schedule
//! - Templates: `signature → body` entries
//!
//! Compiled manifests are checked by [`validate_manifest`] before they are
//! written.

mod parser;
mod types;
mod validator;

pub use parser::{parse_document, parse_document_file, parse_flow};
pub use types::*;
pub use validator::validate_manifest;
