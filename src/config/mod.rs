//! Configuration management.
//!
//! flowboot configuration can come from:
//! - Config file (~/.config/flowboot/config.toml)
//! - Project file (./flowboot.toml)
//! - Environment variables (FLOWBOOT_*)
//!
//! Later layers win. CLI flags are applied on top by the binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{Error, Result};

/// Name of the per-project config file.
pub const PROJECT_CONFIG_FILE: &str = "flowboot.toml";

/// flowboot configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,

    /// Defaults baked into generated manifests
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// External template resolution
    #[serde(default)]
    pub resolver: ResolverConfig,
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory manifests are written to
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("out")
}

/// Manifest defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Image of container bodies without one
    pub container_image: String,
    /// Image of script bodies without one
    pub script_image: String,
    /// Python version of python bodies without one
    pub python_version: String,
    /// Directory artifacts are mounted under by default
    pub artifact_dir: String,
    /// `spec.ttlStrategy.secondsAfterCompletion`
    pub ttl_seconds_after_completion: u64,
    /// `spec.podGC.strategy`
    pub pod_gc_strategy: String,
    /// Size of volume claims declared without one
    pub volume_size: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            container_image: "alpine:3.6".to_string(),
            script_image: "docker/whalesay:latest".to_string(),
            python_version: "3.11".to_string(),
            artifact_dir: "/tmp".to_string(),
            ttl_seconds_after_completion: 300,
            pod_gc_strategy: "OnPodCompletion".to_string(),
            volume_size: "100Mi".to_string(),
        }
    }
}

/// External template resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Directories searched for `<name>.yml|yaml|json`
    pub template_dirs: Vec<PathBuf>,
    /// Argo Server base URL
    pub argo_server: Option<String>,
    /// Namespace of namespaced WorkflowTemplates
    pub namespace: String,
    /// Bearer token for the Argo Server
    pub token: Option<String>,
    /// Request timeout (seconds)
    pub timeout_seconds: u64,
    /// How long fetched collections stay cached (seconds)
    pub cache_ttl_seconds: u64,
    /// Maximum number of cached collections
    pub cache_capacity: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            template_dirs: Vec::new(),
            argo_server: None,
            namespace: "argo".to_string(),
            token: None,
            timeout_seconds: 30,
            cache_ttl_seconds: 3600,
            cache_capacity: 256,
        }
    }
}

impl Config {
    /// Load configuration from default locations.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Primary config file: ~/.config/flowboot/config.toml
        let primary_path = Self::config_dir().join("config.toml");
        config.apply_file(&primary_path);

        // Project config file: ./flowboot.toml
        config.apply_file(Path::new(PROJECT_CONFIG_FILE));

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Parse a complete config from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config = Self::default();
        config.apply_partial(Self::parse_partial(content)?);
        Ok(config)
    }

    /// Get the config directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("flowboot"))
            .unwrap_or_else(|| PathBuf::from(".flowboot"))
    }

    fn apply_file(&mut self, path: &Path) {
        let Ok(content) = std::fs::read_to_string(path) else {
            return;
        };
        match Self::parse_partial(&content) {
            Ok(partial) => self.apply_partial(partial),
            Err(e) => warn!("Ignoring config file {}: {}", path.display(), e),
        }
    }

    /// Apply `FLOWBOOT_*` overrides read through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("FLOWBOOT_OUTPUT_DIR") {
            self.output.dir = PathBuf::from(dir);
        }
        if let Some(image) = lookup("FLOWBOOT_CONTAINER_IMAGE") {
            self.defaults.container_image = image;
        }
        if let Some(dir) = lookup("FLOWBOOT_ARTIFACT_DIR") {
            self.defaults.artifact_dir = dir;
        }
        if let Some(server) = lookup("FLOWBOOT_ARGO_SERVER") {
            self.resolver.argo_server = Some(server);
        }
        if let Some(token) = lookup("FLOWBOOT_ARGO_TOKEN") {
            self.resolver.token = Some(token);
        }
        if let Some(namespace) = lookup("FLOWBOOT_NAMESPACE") {
            self.resolver.namespace = namespace;
        }
        if let Some(dirs) = lookup("FLOWBOOT_TEMPLATE_DIRS") {
            self.resolver.template_dirs = std::env::split_paths(&dirs).collect();
        }
        if let Some(timeout) = lookup("FLOWBOOT_TIMEOUT_SECONDS") {
            if let Ok(parsed) = timeout.parse::<u64>() {
                self.resolver.timeout_seconds = parsed;
            }
        }
    }

    fn parse_partial(content: &str) -> Result<PartialConfig> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(output) = partial.output {
            self.output = output;
        }
        if let Some(defaults) = partial.defaults {
            self.defaults = defaults;
        }
        if let Some(resolver) = partial.resolver {
            self.resolver = resolver;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    output: Option<OutputConfig>,
    defaults: Option<DefaultsConfig>,
    resolver: Option<ResolverConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.output.dir, PathBuf::from("out"));
        assert_eq!(config.defaults.container_image, "alpine:3.6");
        assert_eq!(config.defaults.ttl_seconds_after_completion, 300);
        assert_eq!(config.resolver.namespace, "argo");
        assert!(config.resolver.argo_server.is_none());
    }

    #[test]
    fn test_partial_sections_keep_field_defaults() {
        let config = Config::from_toml_str(
            r#"
[defaults]
container_image = "alpine:3.19"

[resolver]
argo_server = "https://argo.example.com"
template_dirs = ["lib"]
"#,
        )
        .unwrap();

        assert_eq!(config.defaults.container_image, "alpine:3.19");
        assert_eq!(config.defaults.pod_gc_strategy, "OnPodCompletion");
        assert_eq!(
            config.resolver.argo_server.as_deref(),
            Some("https://argo.example.com")
        );
        assert_eq!(config.resolver.template_dirs, vec![PathBuf::from("lib")]);
        assert_eq!(config.resolver.cache_capacity, 256);
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml_str("[defaults\n").unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_file_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROJECT_CONFIG_FILE);
        std::fs::write(&path, "[output]\ndir = \"manifests\"\n").unwrap();

        let mut config = Config::default();
        config.apply_file(&path);
        config.apply_file(&dir.path().join("missing.toml"));
        assert_eq!(config.output.dir, PathBuf::from("manifests"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FLOWBOOT_OUTPUT_DIR", "build"),
            ("FLOWBOOT_NAMESPACE", "ci"),
            ("FLOWBOOT_TIMEOUT_SECONDS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.output.dir, PathBuf::from("build"));
        assert_eq!(config.resolver.namespace, "ci");
        assert_eq!(config.resolver.timeout_seconds, 30);
    }
}
