//! Leaf template bodies: container, script, python, suspend, resource.
//!
//! Values reach these builders already substituted. They only fill defaults
//! and reshape the short forms into the Kubernetes field layout.

use std::path::Path;

use serde_json::{json, Map, Value};

use crate::config::DefaultsConfig;
use crate::error::{Error, Result};
use crate::scope::value_to_string;

/// What leaf bodies need from the enclosing flow.
pub(crate) struct BodyContext<'a> {
    pub defaults: &'a DefaultsConfig,
    /// `volumeMounts` entries of the flow's volume claims
    pub mounts: &'a [Value],
    /// Directory `file` keys are read relative to
    pub base_dir: &'a Path,
}

impl BodyContext<'_> {
    fn read_file(&self, template: &str, file: &Value) -> Result<String> {
        let Some(file) = file.as_str() else {
            return Err(Error::Compile(format!(
                "'file' of template '{}' must be a path",
                template
            )));
        };
        let path = self.base_dir.join(file);
        std::fs::read_to_string(&path).map_err(|e| {
            Error::Compile(format!(
                "Template '{}' cannot read {}: {}",
                template,
                path.display(),
                e
            ))
        })
    }

    fn mount_volumes(&self, body: &mut Map<String, Value>) {
        if self.mounts.is_empty() {
            return;
        }
        let mut mounts = match body.remove("volumeMounts") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        mounts.extend(self.mounts.iter().cloned());
        body.insert("volumeMounts".to_string(), Value::Array(mounts));
    }
}

/// Normalize a body to a map, treating a bare string as `shorthand_key`.
fn body_map(template: &str, kind: &str, value: Value, shorthand_key: &str) -> Result<Map<String, Value>> {
    match value {
        Value::Null => Ok(Map::new()),
        Value::String(text) => {
            let mut map = Map::new();
            map.insert(shorthand_key.to_string(), Value::String(text));
            Ok(map)
        }
        Value::Object(map) => Ok(map),
        other => Err(Error::Compile(format!(
            "{} body of template '{}' must be a map or a string, got: {}",
            kind, template, other
        ))),
    }
}

/// Put `image` first, then the rest in declaration order.
fn with_image(image: Value, rest: Map<String, Value>) -> Value {
    let mut out = Map::with_capacity(rest.len() + 1);
    out.insert("image".to_string(), image);
    out.extend(rest);
    Value::Object(out)
}

pub(crate) fn container(ctx: &BodyContext<'_>, template: &str, value: Value) -> Result<Value> {
    let mut body = body_map(template, "container", value, "command")?;

    let image = body
        .remove("image")
        .unwrap_or_else(|| Value::String(ctx.defaults.container_image.clone()));

    if let Some(Value::String(cmd)) = body.get("command") {
        let cmd = json!(["/bin/sh", "-c", cmd]);
        body.insert("command".to_string(), cmd);
    }
    if let Some(Value::String(args)) = body.get("args") {
        let args = json!([args]);
        body.insert("args".to_string(), args);
    }
    if let Some(env) = body.remove("env") {
        body.insert("env".to_string(), env_list(template, env)?);
    }
    ctx.mount_volumes(&mut body);

    Ok(with_image(image, body))
}

/// Script body. `default_command` applies when none is given.
pub(crate) fn script(
    ctx: &BodyContext<'_>,
    template: &str,
    value: Value,
    default_image: &str,
    default_command: Option<&str>,
) -> Result<Value> {
    let mut body = body_map(template, "script", value, "source")?;

    let image = body
        .remove("image")
        .unwrap_or_else(|| Value::String(default_image.to_string()));

    match body.get("command") {
        Some(Value::String(cmd)) => {
            let cmd = json!([cmd]);
            body.insert("command".to_string(), cmd);
        }
        None => {
            if let Some(cmd) = default_command {
                body.insert("command".to_string(), json!([cmd]));
            }
        }
        Some(_) => {}
    }

    if let Some(file) = body.remove("file") {
        if body.contains_key("source") {
            return Err(Error::Compile(format!(
                "Template '{}' gives both 'source' and 'file'",
                template
            )));
        }
        let source = ctx.read_file(template, &file)?;
        body.insert("source".to_string(), Value::String(source));
    }
    match body.get("source") {
        Some(Value::String(_)) => {}
        Some(other) => {
            let source = value_to_string(other);
            body.insert("source".to_string(), Value::String(source));
        }
        None => {
            return Err(Error::Compile(format!(
                "Script of template '{}' needs 'source' or 'file'",
                template
            )))
        }
    }

    if let Some(env) = body.remove("env") {
        body.insert("env".to_string(), env_list(template, env)?);
    }
    ctx.mount_volumes(&mut body);

    Ok(with_image(image, body))
}

/// A script running under `python:<version>-alpine`.
pub(crate) fn python(ctx: &BodyContext<'_>, template: &str, value: Value) -> Result<Value> {
    let mut body = body_map(template, "python", value, "source")?;
    let version = body
        .remove("version")
        .map(|v| value_to_string(&v))
        .unwrap_or_else(|| ctx.defaults.python_version.clone());
    let image = format!("python:{}-alpine", version);
    script(ctx, template, Value::Object(body), &image, Some("python"))
}

pub(crate) fn suspend(template: &str, value: Value) -> Result<Value> {
    match value {
        Value::Null => Ok(json!({})),
        Value::Number(_) | Value::String(_) => Ok(json!({ "duration": value_to_string(&value) })),
        Value::Object(mut map) => {
            if let Some(duration) = map.get("duration").filter(|d| !d.is_string()) {
                let duration = value_to_string(duration);
                map.insert("duration".to_string(), Value::String(duration));
            }
            Ok(Value::Object(map))
        }
        other => Err(Error::Compile(format!(
            "suspend of template '{}' must be empty, a duration or a map, got: {}",
            template, other
        ))),
    }
}

pub(crate) fn resource(ctx: &BodyContext<'_>, template: &str, value: Value) -> Result<Value> {
    let Value::Object(mut body) = value else {
        return Err(Error::Compile(format!(
            "resource of template '{}' must be a map with 'manifest' or 'file'",
            template
        )));
    };

    let action = body
        .remove("action")
        .unwrap_or_else(|| Value::String("apply".to_string()));

    let manifest = match (body.remove("manifest"), body.remove("file")) {
        (Some(_), Some(_)) => {
            return Err(Error::Compile(format!(
                "Template '{}' gives both 'manifest' and 'file'",
                template
            )))
        }
        (Some(Value::String(text)), None) => text,
        (Some(manifest), None) => serde_yaml::to_string(&manifest)?,
        (None, Some(file)) => ctx.read_file(template, &file)?,
        (None, None) => {
            return Err(Error::Compile(format!(
                "resource of template '{}' needs 'manifest' or 'file'",
                template
            )))
        }
    };

    let mut out = Map::with_capacity(body.len() + 2);
    out.insert("action".to_string(), action);
    out.insert("manifest".to_string(), Value::String(manifest));
    out.extend(body);
    Ok(Value::Object(out))
}

/// `env` as a map of short forms, or an already shaped list.
fn env_list(template: &str, env: Value) -> Result<Value> {
    match env {
        Value::Array(_) => Ok(env),
        Value::Object(map) => map
            .into_iter()
            .map(|(name, value)| env_var(template, name, value))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        other => Err(Error::Compile(format!(
            "env of template '{}' must be a map or a list, got: {}",
            template, other
        ))),
    }
}

fn env_var(template: &str, name: String, value: Value) -> Result<Value> {
    let Value::Object(map) = value else {
        return Ok(json!({ "name": name, "value": value_to_string(&value) }));
    };

    let source = match map.iter().next() {
        Some((key, Value::String(reference))) if map.len() == 1 => match key.as_str() {
            "config" => Some(key_ref("configMapKeyRef", template, &name, reference)?),
            "secret" => Some(key_ref("secretKeyRef", template, &name, reference)?),
            "field" => Some(json!({ "fieldRef": { "fieldPath": reference } })),
            "resource" => Some(json!({ "resourceFieldRef": { "resource": reference } })),
            _ => None,
        },
        _ => None,
    };

    let value_from = source.unwrap_or(Value::Object(map));
    Ok(json!({ "name": name, "valueFrom": value_from }))
}

/// `config: name.key` / `secret: name.key`.
fn key_ref(kind: &str, template: &str, var: &str, reference: &str) -> Result<Value> {
    let Some((name, key)) = reference.split_once('.') else {
        return Err(Error::Compile(format!(
            "env '{}' of template '{}' must reference '<name>.<key>', got: {}",
            var, template, reference
        )));
    };
    Ok(json!({ kind: { "name": name, "key": key } }))
}
