//! Writing compiled manifests.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::manifest::CompiledFlow;

/// Path a flow's manifest is written to.
pub fn manifest_path(dir: &Path, flow: &CompiledFlow) -> PathBuf {
    dir.join(format!("{}.yml", flow.name))
}

/// Write one manifest as `<dir>/<flow>.yml`, creating `dir` if needed.
pub fn write_manifest(dir: &Path, flow: &CompiledFlow) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = manifest_path(dir, flow);
    std::fs::write(&path, flow.manifest.to_yaml()?)?;
    debug!("Wrote {}", path.display());
    Ok(path)
}

/// All manifests as one YAML stream.
pub fn render_stream(flows: &[CompiledFlow]) -> Result<String> {
    let mut out = String::new();
    for flow in flows {
        out.push_str("---\n");
        out.push_str(&flow.manifest.to_yaml()?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{FlowKind, Manifest, ManifestSpec, Metadata, WorkflowSpec};

    fn flow(name: &str) -> CompiledFlow {
        CompiledFlow {
            name: name.to_string(),
            manifest: Manifest::new(
                FlowKind::WorkflowTemplate,
                Metadata {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
                ManifestSpec::Workflow(WorkflowSpec::default()),
            ),
        }
    }

    #[test]
    fn test_write_manifest_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested/out");

        let path = write_manifest(&out, &flow("lib")).unwrap();
        assert_eq!(path, out.join("lib.yml"));

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("kind: WorkflowTemplate"));
        assert!(written.contains("name: lib"));
    }

    #[test]
    fn test_render_stream() {
        let stream = render_stream(&[flow("a"), flow("b")]).unwrap();
        assert_eq!(stream.matches("---\n").count(), 2);
        assert!(stream.find("name: a").unwrap() < stream.find("name: b").unwrap());
    }
}
