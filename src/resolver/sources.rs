//! Places external template collections are fetched from.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::signature::Qualifier;

const MANIFEST_EXTENSIONS: [&str; 3] = ["yml", "yaml", "json"];

/// A source of WorkflowTemplate manifests.
pub trait TemplateSource: Send + Sync {
    /// Human-readable name used in logs and errors.
    fn name(&self) -> &str;

    /// Fetch the manifest of a collection. `Ok(None)` when this source does
    /// not know it.
    fn fetch(&self, qualifier: &Qualifier) -> Result<Option<Value>>;
}

fn expected_kind(qualifier: &Qualifier) -> &'static str {
    if qualifier.cluster_scope {
        "ClusterWorkflowTemplate"
    } else {
        "WorkflowTemplate"
    }
}

/// Manifests on disk: `<dir>/<name>.yml|yaml|json`.
#[derive(Debug, Clone)]
pub struct FileTemplateSource {
    dirs: Vec<PathBuf>,
    label: String,
}

impl FileTemplateSource {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        let label = format!(
            "template dirs [{}]",
            dirs.iter()
                .map(|d| d.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Self { dirs, label }
    }
}

impl TemplateSource for FileTemplateSource {
    fn name(&self) -> &str {
        &self.label
    }

    fn fetch(&self, qualifier: &Qualifier) -> Result<Option<Value>> {
        for dir in &self.dirs {
            for ext in MANIFEST_EXTENSIONS {
                let path = dir.join(format!("{}.{}", qualifier.name, ext));
                if !path.is_file() {
                    continue;
                }
                let content = std::fs::read_to_string(&path)?;
                let manifest: Value = serde_yaml::from_str(&content)?;
                let kind = manifest.get("kind").and_then(Value::as_str);
                if kind.is_some_and(|kind| kind != expected_kind(qualifier)) {
                    debug!(
                        "Skipping {}: kind {:?} does not match {}",
                        path.display(),
                        kind,
                        expected_kind(qualifier)
                    );
                    continue;
                }
                debug!("Loaded template collection from {}", path.display());
                return Ok(Some(manifest));
            }
        }
        Ok(None)
    }
}

/// The Argo Server REST API.
pub struct ArgoServerSource {
    base_url: String,
    namespace: String,
    token: Option<String>,
    client: Client,
}

impl ArgoServerSource {
    pub fn new(
        base_url: &str,
        namespace: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            namespace: namespace.to_string(),
            token,
            client,
        })
    }

    /// REST path of a collection.
    pub fn url(&self, qualifier: &Qualifier) -> String {
        if qualifier.cluster_scope {
            format!(
                "{}/api/v1/cluster-workflow-templates/{}",
                self.base_url, qualifier.name
            )
        } else {
            format!(
                "{}/api/v1/workflow-templates/{}/{}",
                self.base_url, self.namespace, qualifier.name
            )
        }
    }
}

impl TemplateSource for ArgoServerSource {
    fn name(&self) -> &str {
        &self.base_url
    }

    fn fetch(&self, qualifier: &Qualifier) -> Result<Option<Value>> {
        let url = self.url(qualifier);
        debug!("GET {}", url);

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send()?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json()?)),
            status => Err(Error::Config(format!(
                "Argo Server answered {} for {}",
                status, url
            ))),
        }
    }
}
