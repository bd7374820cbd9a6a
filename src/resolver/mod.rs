//! Cross-template resolution.
//!
//! Calls like `lib/echo(x)` refer to templates of another WorkflowTemplate.
//! Their signatures are unknown until the collection is fetched, so the
//! resolver asks its sources in order and caches what it learns per
//! qualifier for the rest of the run.

mod sources;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ResolverConfig;
use crate::error::{Error, Result};
use crate::graph::TemplateSignature;
use crate::params::{ParamSet, Parameter};
use crate::signature::Qualifier;

pub use sources::{ArgoServerSource, FileTemplateSource, TemplateSource};

/// Default cache capacity (number of collections).
const DEFAULT_CACHE_CAPACITY: u64 = 256;

/// Default time-to-live for cached collections (1 hour).
const DEFAULT_TTL_SECS: u64 = 3600;

/// Signatures of every template in one WorkflowTemplate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateCollection {
    pub templates: HashMap<String, TemplateSignature>,
}

fn io_params(io: Option<&Value>) -> ParamSet {
    let names = |key: &str| -> Vec<String> {
        io.and_then(|io| io.get(key))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };

    names("parameters")
        .into_iter()
        .map(Parameter::value)
        .chain(names("artifacts").into_iter().map(Parameter::artifact))
        .collect()
}

impl TemplateCollection {
    /// Read signatures from a WorkflowTemplate or ClusterWorkflowTemplate manifest.
    pub fn from_manifest(manifest: &Value) -> Result<Self> {
        let spec = manifest
            .get("spec")
            .ok_or_else(|| Error::Parse("template manifest has no 'spec'".to_string()))?;
        let spec = spec.get("workflowSpec").unwrap_or(spec);
        let templates = spec
            .get("templates")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Parse("template manifest has no 'spec.templates'".to_string()))?;

        let mut collection = TemplateCollection::default();
        for template in templates {
            let Some(name) = template.get("name").and_then(Value::as_str) else {
                continue;
            };
            collection.templates.insert(
                name.to_string(),
                TemplateSignature {
                    inputs: io_params(template.get("inputs")),
                    outputs: io_params(template.get("outputs")),
                },
            );
        }
        Ok(collection)
    }
}

/// Cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of entries in the cache
    pub entry_count: u64,
    /// Number of collections registered from the current run
    pub registered: usize,
}

/// Resolves external template signatures.
pub struct TemplateResolver {
    registered: HashMap<Qualifier, Arc<TemplateCollection>>,
    sources: Vec<Box<dyn TemplateSource>>,
    cache: Cache<Qualifier, Arc<TemplateCollection>>,
}

impl TemplateResolver {
    /// Create a resolver with no external sources.
    pub fn new() -> Self {
        Self::with_cache(DEFAULT_CACHE_CAPACITY, DEFAULT_TTL_SECS)
    }

    /// Create a resolver with custom cache configuration.
    pub fn with_cache(max_capacity: u64, ttl_secs: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self {
            registered: HashMap::new(),
            sources: Vec::new(),
            cache,
        }
    }

    /// Build a resolver with the sources named in configuration.
    pub fn from_config(config: &ResolverConfig) -> Result<Self> {
        let mut resolver = Self::with_cache(config.cache_capacity, config.cache_ttl_seconds);
        if !config.template_dirs.is_empty() {
            resolver.add_source(FileTemplateSource::new(config.template_dirs.clone()));
        }
        if let Some(server) = &config.argo_server {
            resolver.add_source(ArgoServerSource::new(
                server,
                &config.namespace,
                config.token.clone(),
                Duration::from_secs(config.timeout_seconds),
            )?);
        }
        Ok(resolver)
    }

    pub fn add_source(&mut self, source: impl TemplateSource + 'static) {
        self.sources.push(Box::new(source));
    }

    /// Make a collection compiled earlier in this run resolvable.
    pub fn register(&mut self, qualifier: Qualifier, manifest: &Value) -> Result<()> {
        let collection = TemplateCollection::from_manifest(manifest)?;
        info!(
            "Registered template collection '{}' ({} templates)",
            qualifier,
            collection.templates.len()
        );
        self.cache.invalidate(&qualifier);
        self.registered.insert(qualifier, Arc::new(collection));
        Ok(())
    }

    fn collection(&self, qualifier: &Qualifier) -> Result<Arc<TemplateCollection>> {
        if let Some(collection) = self.registered.get(qualifier) {
            return Ok(collection.clone());
        }
        if let Some(collection) = self.cache.get(qualifier) {
            debug!("Template cache hit for '{}'", qualifier);
            return Ok(collection);
        }

        for source in &self.sources {
            debug!("Looking up '{}' in {}", qualifier, source.name());
            let manifest = source.fetch(qualifier).map_err(|e| {
                Error::unknown_template(
                    qualifier.to_string(),
                    format!("fetch from {} failed: {}", source.name(), e),
                )
            })?;
            let Some(manifest) = manifest else {
                continue;
            };

            let collection = Arc::new(TemplateCollection::from_manifest(&manifest).map_err(
                |e| Error::unknown_template(qualifier.to_string(), e.to_string()),
            )?);
            info!(
                "Fetched template collection '{}' from {} ({} templates)",
                qualifier,
                source.name(),
                collection.templates.len()
            );
            self.cache.insert(qualifier.clone(), collection.clone());
            return Ok(collection);
        }

        let tried: Vec<&str> = self.sources.iter().map(|s| s.name()).collect();
        let reason = if tried.is_empty() {
            "not compiled in this run and no template sources are configured".to_string()
        } else {
            format!("not found in this run or in: {}", tried.join(", "))
        };
        Err(Error::unknown_template(qualifier.to_string(), reason))
    }

    /// Signature of `template` in the collection named by `qualifier`.
    pub fn resolve(&self, qualifier: &Qualifier, template: &str) -> Result<TemplateSignature> {
        let collection = self.collection(qualifier)?;
        collection.templates.get(template).cloned().ok_or_else(|| {
            Error::unknown_template(
                format!("{}/{}", qualifier, template),
                format!("'{}' has no template named '{}'", qualifier, template),
            )
        })
    }

    /// Clear the fetched collections.
    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.cache.run_pending_tasks();
        CacheStats {
            entry_count: self.cache.entry_count(),
            registered: self.registered.len(),
        }
    }
}

impl Default for TemplateResolver {
    fn default() -> Self {
        Self::new()
    }
}
