//! Flow document parser.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use super::types::FlowDecl;
use crate::error::{Error, Result};

/// Parse a YAML document stream into raw flow maps.
///
/// Documents are separated by `---`. A document holding a list contributes
/// every item as a flow. Empty documents are skipped.
pub fn parse_document(yaml: &str) -> Result<Vec<Value>> {
    if yaml.trim().is_empty() {
        return Err(Error::Parse("Empty flow document".to_string()));
    }

    let mut flows = Vec::new();
    for document in serde_yaml::Deserializer::from_str(yaml) {
        let value = Value::deserialize(document)
            .map_err(|e| Error::Parse(format!("Invalid YAML: {}", e)))?;
        match value {
            Value::Null => continue,
            Value::Array(items) => flows.extend(items),
            other => flows.push(other),
        }
    }

    if flows.is_empty() {
        return Err(Error::Parse("Document declares no flows".to_string()));
    }
    Ok(flows)
}

/// Parse a flow document from a file path.
pub fn parse_document_file(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)?;
    parse_document(&content)
}

/// Read one raw flow map into a declaration.
pub fn parse_flow(value: &Value) -> Result<FlowDecl> {
    if !value.is_object() {
        return Err(Error::Parse(format!("A flow must be a map, got: {}", value)));
    }

    FlowDecl::deserialize(value).map_err(|e| {
        let msg = e.to_string();
        if let Some(field) = extract_missing_field(&msg) {
            Error::Parse(format!("Missing required field: {}", field))
        } else {
            Error::Parse(format!("Invalid flow: {}", msg))
        }
    })
}

fn extract_missing_field(error_message: &str) -> Option<&str> {
    let marker = "missing field `";
    let start = error_message.find(marker)? + marker.len();
    let rest = &error_message[start..];
    let end = rest.find('`')?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::FlowKind;
    use crate::namer::NamingPolicy;

    #[test]
    fn test_parse_single_flow() {
        let yaml = r#"
flow: hello
kind: WorkflowTemplate
labels:
  team: ml
vc: "work:/work:1Gi"
templates:
  echo(msg):
    container:
      command: echo $msg
"#;

        let flows = parse_document(yaml).unwrap();
        assert_eq!(flows.len(), 1);

        let flow = parse_flow(&flows[0]).unwrap();
        assert_eq!(flow.name, "hello");
        assert_eq!(flow.kind, Some(FlowKind::WorkflowTemplate));
        assert_eq!(flow.vc, vec!["work:/work:1Gi"]);
        assert_eq!(flow.task_names, NamingPolicy::Call);
        assert_eq!(flow.templates.len(), 1);
        assert_eq!(flow.templates[0].0, "echo(msg)");
    }

    #[test]
    fn test_parse_document_stream() {
        let yaml = r#"
flow: first
templates: {}
---
---
- flow: second
- flow: third
  task_names: incr
"#;

        let flows = parse_document(yaml).unwrap();
        assert_eq!(flows.len(), 3);
        let third = parse_flow(&flows[2]).unwrap();
        assert_eq!(third.task_names, NamingPolicy::Incr);
    }

    #[test]
    fn test_templates_as_list_of_entries() {
        let yaml = r#"
flow: ordered
templates:
  - main:
      steps: [b, a]
  - a:
      suspend:
  - b:
      suspend:
"#;

        let flow = parse_flow(&parse_document(yaml).unwrap()[0]).unwrap();
        let names: Vec<_> = flow.templates.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["main", "a", "b"]);
    }

    #[test]
    fn test_parse_empty_document() {
        let result = parse_document("  \n");
        assert!(result
            .unwrap_err()
            .to_string()
            .to_lowercase()
            .contains("empty flow document"));
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = parse_document("flow: [broken");
        assert!(result
            .unwrap_err()
            .to_string()
            .to_lowercase()
            .contains("invalid yaml"));
    }

    #[test]
    fn test_parse_missing_flow_name() {
        let flows = parse_document("templates: {}\n").unwrap();
        let result = parse_flow(&flows[0]);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Missing required field: flow"));
    }

    #[test]
    fn test_unknown_flow_key_is_rejected() {
        let flows = parse_document("flow: x\ntemplatez: {}\n").unwrap();
        let err = parse_flow(&flows[0]).unwrap_err();
        assert!(err.to_string().contains("templatez"));
    }

    #[test]
    fn test_scalar_flow_is_rejected() {
        let flows = parse_document("just a string\n").unwrap();
        assert!(parse_flow(&flows[0]).is_err());
    }

    #[test]
    fn test_parse_document_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.yml");
        std::fs::write(&path, "flow: on-disk\n").unwrap();
        let flows = parse_document_file(&path).unwrap();
        assert_eq!(flows[0]["flow"], "on-disk");
    }
}
