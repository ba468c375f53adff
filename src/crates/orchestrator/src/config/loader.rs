//! Configuration file loader
//!
//! YAML files support:
//! - `$include` directives for file composition (relative to the including file)
//! - `${ENV:default}` for environment variable expansion
//!
//! JSON and TOML files are parsed as-is. The format is chosen by extension.

use crate::OrchestratorError;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use std::env;
use std::fs;
use std::path::Path;

const MAX_INCLUDE_DEPTH: usize = 8;

fn config_error(message: String) -> OrchestratorError {
    OrchestratorError::Config(message)
}

/// Load a YAML file with includes resolved and variables expanded.
pub fn load_yaml_file<P: AsRef<Path>>(path: P) -> Result<YamlValue, OrchestratorError> {
    let lookup = |name: &str| env::var(name).ok();
    load_yaml_with(path.as_ref(), &lookup, 0)
}

fn load_yaml_with(
    path: &Path,
    lookup: &dyn Fn(&str) -> Option<String>,
    depth: usize,
) -> Result<YamlValue, OrchestratorError> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(config_error(format!(
            "include depth exceeded at {}",
            path.display()
        )));
    }

    let content = fs::read_to_string(path)
        .map_err(|e| config_error(format!("failed to read {}: {}", path.display(), e)))?;
    let mut value: YamlValue = serde_yaml::from_str(&content)
        .map_err(|e| config_error(format!("failed to parse {}: {}", path.display(), e)))?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    process_includes(&mut value, base_dir, lookup, depth)?;
    expand_variables(&mut value, lookup);

    Ok(value)
}

/// Load and deserialize a YAML file.
pub fn load_yaml_config<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T, OrchestratorError> {
    let yaml = load_yaml_file(path)?;
    let json = yaml_to_json(&yaml)?;
    serde_json::from_value(json)
        .map_err(|e| config_error(format!("failed to deserialize configuration: {}", e)))
}

/// Parse a YAML string (variables expanded, no includes).
pub fn parse_yaml_str<T: DeserializeOwned>(content: &str) -> Result<T, OrchestratorError> {
    let mut value: YamlValue = serde_yaml::from_str(content)
        .map_err(|e| config_error(format!("failed to parse YAML: {}", e)))?;
    expand_variables(&mut value, &|name: &str| env::var(name).ok());
    let json = yaml_to_json(&value)?;
    serde_json::from_value(json)
        .map_err(|e| config_error(format!("failed to deserialize configuration: {}", e)))
}

/// Load and deserialize a YAML, JSON or TOML file, chosen by extension.
pub fn load_config_file<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T, OrchestratorError> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "yaml" | "yml" => load_yaml_config(path),
        "json" => {
            let content = fs::read_to_string(path)
                .map_err(|e| config_error(format!("failed to read {}: {}", path.display(), e)))?;
            serde_json::from_str(&content)
                .map_err(|e| config_error(format!("failed to parse {}: {}", path.display(), e)))
        }
        "toml" => {
            let content = fs::read_to_string(path)
                .map_err(|e| config_error(format!("failed to read {}: {}", path.display(), e)))?;
            toml::from_str(&content)
                .map_err(|e| config_error(format!("failed to parse {}: {}", path.display(), e)))
        }
        other => Err(config_error(format!(
            "unsupported config format '{}' for {}",
            other,
            path.display()
        ))),
    }
}

/// Replace `$include` mappings with the referenced file.
///
/// Sibling keys next to `$include` are merged over the included content.
fn process_includes(
    value: &mut YamlValue,
    base_dir: &Path,
    lookup: &dyn Fn(&str) -> Option<String>,
    depth: usize,
) -> Result<(), OrchestratorError> {
    match value {
        YamlValue::Mapping(map) => {
            let include_key = YamlValue::String("$include".to_string());
            if let Some(YamlValue::String(include_path)) = map.remove(&include_key) {
                let mut included = load_yaml_with(&base_dir.join(&include_path), lookup, depth + 1)?;
                let mut overrides = YamlValue::Mapping(std::mem::take(map));
                process_includes(&mut overrides, base_dir, lookup, depth)?;
                deep_merge(&mut included, &overrides);
                *value = included;
                return Ok(());
            }

            for (_, v) in map.iter_mut() {
                process_includes(v, base_dir, lookup, depth)?;
            }
        }
        YamlValue::Sequence(seq) => {
            for item in seq.iter_mut() {
                process_includes(item, base_dir, lookup, depth)?;
            }
        }
        _ => {}
    }

    Ok(())
}

/// Expand `${ENV_VAR:default}` in every string value.
fn expand_variables(value: &mut YamlValue, lookup: &dyn Fn(&str) -> Option<String>) {
    match value {
        YamlValue::String(s) => {
            if let Some(expanded) = expand_env_in_string(s, lookup) {
                *value = retype(expanded);
            }
        }
        YamlValue::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                expand_variables(v, lookup);
            }
        }
        YamlValue::Sequence(seq) => {
            for item in seq.iter_mut() {
                expand_variables(item, lookup);
            }
        }
        _ => {}
    }
}

/// Expanded numbers and booleans become typed scalars again.
fn retype(expanded: String) -> YamlValue {
    match serde_yaml::from_str::<YamlValue>(&expanded) {
        Ok(scalar @ (YamlValue::Number(_) | YamlValue::Bool(_))) => scalar,
        _ => YamlValue::String(expanded),
    }
}

fn expand_env_in_string(s: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Option<String> {
    if !s.contains("${") {
        return None;
    }

    let re = regex::Regex::new(r"\$\{([^:}]+)(?::([^}]*))?\}").ok()?;
    let expanded = re.replace_all(s, |caps: &regex::Captures<'_>| {
        let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        lookup(&caps[1]).unwrap_or_else(|| default_value.to_string())
    });
    Some(expanded.into_owned())
}

/// Convert a YAML value to JSON for deserialization.
pub fn yaml_to_json(yaml: &YamlValue) -> Result<JsonValue, OrchestratorError> {
    match yaml {
        YamlValue::Null => Ok(JsonValue::Null),
        YamlValue::Bool(b) => Ok(JsonValue::Bool(*b)),
        YamlValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(JsonValue::Number(i.into()))
            } else if let Some(u) = n.as_u64() {
                Ok(JsonValue::Number(u.into()))
            } else if let Some(f) = n.as_f64() {
                serde_json::Number::from_f64(f)
                    .map(JsonValue::Number)
                    .ok_or_else(|| config_error(format!("invalid number: {}", f)))
            } else {
                Err(config_error("invalid number".to_string()))
            }
        }
        YamlValue::String(s) => Ok(JsonValue::String(s.clone())),
        YamlValue::Sequence(seq) => {
            let items: Result<Vec<JsonValue>, _> = seq.iter().map(yaml_to_json).collect();
            Ok(JsonValue::Array(items?))
        }
        YamlValue::Mapping(map) => {
            let mut json_map = serde_json::Map::new();
            for (k, v) in map {
                let key = match k {
                    YamlValue::String(s) => s.clone(),
                    YamlValue::Number(n) => n.to_string(),
                    YamlValue::Bool(b) => b.to_string(),
                    _ => return Err(config_error("map keys must be scalars".to_string())),
                };
                json_map.insert(key, yaml_to_json(v)?);
            }
            Ok(JsonValue::Object(json_map))
        }
        YamlValue::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

/// Merge two YAML values deeply
///
/// For mappings, merges keys recursively. For other types, `other` overrides `base`.
pub fn deep_merge(base: &mut YamlValue, other: &YamlValue) {
    match (base, other) {
        (YamlValue::Mapping(base_map), YamlValue::Mapping(other_map)) => {
            for (key, other_value) in other_map {
                if let Some(base_value) = base_map.get_mut(key) {
                    deep_merge(base_value, other_value);
                } else {
                    base_map.insert(key.clone(), other_value.clone());
                }
            }
        }
        (base, other) => {
            *base = other.clone();
        }
    }
}
