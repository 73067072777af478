//! Identity Assigner
//!
//! Every output document gets exactly one `$id`, derived from the configured
//! base URL and the document's logical path.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use url::Url;

use crate::document::SchemaDocument;
use crate::error::{Result, SpecError};

pub const ID_KEY: &str = "$id";
pub const SCHEMA_KEY: &str = "$schema";

/// Environment variable the base URL is traditionally read from
pub const BASE_URL_VARIABLE: &str = "BASE_URL";

/// Where an output document lives, relative to the output root and base URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum LogicalPath {
    Manifest,
    BaseConfig,
    EngineConfig {
        engine: String,
    },
    Component {
        engine: String,
        version: String,
        component: String,
    },
}

impl LogicalPath {
    pub fn engine_config(engine: &str) -> Self {
        Self::EngineConfig {
            engine: engine.to_lowercase(),
        }
    }

    pub fn component(engine: &str, version: &str, component: &str) -> Self {
        Self::Component {
            engine: engine.to_lowercase(),
            version: version.to_string(),
            component: component.to_string(),
        }
    }

    /// Relative output path, `/`-separated
    pub fn file_name(&self) -> String {
        match self {
            Self::Manifest => "manifest.json".to_string(),
            Self::BaseConfig => "config/base.json".to_string(),
            Self::EngineConfig { engine } => format!("config/{}.json", engine),
            Self::Component {
                engine,
                version,
                component,
            } => format!("{}/{}/{}.json", engine, version, component),
        }
    }

    /// Canonical identity of the document at this path
    pub fn id(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.file_name())
    }
}

impl fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// A fully resolved document with its identity injected
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOutputDocument {
    pub logical_path: LogicalPath,
    pub id: String,
    pub body: Value,
}

/// Check that `raw` is an absolute URL usable as a base, without trailing `/`,
/// query or fragment
pub fn validate_base_url(raw: &str) -> Result<String> {
    let config_error = |message: String| SpecError::Config {
        variable: BASE_URL_VARIABLE.to_string(),
        message,
    };

    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(config_error("base URL is empty".into()));
    }
    let url = Url::parse(trimmed).map_err(|e| config_error(format!("'{}' is not an absolute URL: {}", raw, e)))?;
    if url.cannot_be_a_base() {
        return Err(config_error(format!("'{}' cannot be used as a base URL", raw)));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(config_error(format!(
            "'{}' must not carry a query or fragment",
            raw
        )));
    }
    Ok(trimmed.to_string())
}

/// Inject the canonical `$id` and remove any nested identities
pub fn assign_ids(
    document: &SchemaDocument,
    logical_path: LogicalPath,
    base_url: &str,
) -> Result<ResolvedOutputDocument> {
    let base_url = validate_base_url(base_url)?;
    let id = logical_path.id(&base_url);

    let Value::Object(root) = document.tree() else {
        return Err(SpecError::Internal(format!(
            "root of {} (from {}) is not an object",
            logical_path,
            document.locator()
        )));
    };

    let mut body = Map::with_capacity(root.len() + 1);
    if !root.contains_key(SCHEMA_KEY) {
        body.insert(ID_KEY.to_string(), Value::String(id.clone()));
    }
    for (key, value) in root {
        if key == ID_KEY && value.is_string() {
            continue;
        }
        body.insert(key.clone(), strip_ids(value));
        if key == SCHEMA_KEY {
            body.insert(ID_KEY.to_string(), Value::String(id.clone()));
        }
    }

    Ok(ResolvedOutputDocument {
        logical_path,
        id,
        body: Value::Object(body),
    })
}

fn strip_ids(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, value)| !(key.as_str() == ID_KEY && value.is_string()))
                .map(|(key, value)| (key.clone(), strip_ids(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_ids).collect()),
        scalar => scalar.clone(),
    }
}

/// Count string-valued `$id` keys anywhere in `value`
pub fn count_ids(value: &Value) -> usize {
    match value {
        Value::Object(map) => {
            let own = usize::from(matches!(map.get(ID_KEY), Some(Value::String(_))));
            own + map.values().map(count_ids).sum::<usize>()
        }
        Value::Array(items) => items.iter().map(count_ids).sum(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_logical_paths() {
        assert_eq!(LogicalPath::Manifest.file_name(), "manifest.json");
        assert_eq!(LogicalPath::BaseConfig.file_name(), "config/base.json");
        assert_eq!(LogicalPath::engine_config("PostgreSQL").file_name(), "config/postgresql.json");
        assert_eq!(
            LogicalPath::component("PostgreSQL", "15.0", "constraint").id("https://x.test/schemas/"),
            "https://x.test/schemas/postgresql/15.0/constraint.json"
        );
    }

    #[test]
    fn test_id_follows_schema_and_nested_ids_removed() {
        let doc = SchemaDocument::new(
            "engines/postgresql/15.0/table.json",
            json!({
                "title": "Table",
                "$schema": "https://json-schema.org/draft/2020-12/schema",
                "$id": "old",
                "properties": { "column": { "$id": "column.json", "type": "object" } }
            }),
        );
        let out = assign_ids(&doc, LogicalPath::component("postgresql", "15.0", "table"), "https://x.test/schemas").unwrap();
        let keys: Vec<&str> = out.body.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["title", "$schema", "$id", "properties"]);
        assert_eq!(out.body["$id"], "https://x.test/schemas/postgresql/15.0/table.json");
        assert_eq!(out.id, "https://x.test/schemas/postgresql/15.0/table.json");
        assert_eq!(count_ids(&out.body), 1);
    }

    #[test]
    fn test_id_first_without_schema() {
        let doc = SchemaDocument::new("project/manifest.json", json!({ "type": "object" }));
        let out = assign_ids(&doc, LogicalPath::Manifest, "https://x.test").unwrap();
        let first = out.body.as_object().unwrap().keys().next().cloned();
        assert_eq!(first.as_deref(), Some("$id"));
    }

    #[test]
    fn test_invalid_base_url() {
        for bad in [
            "",
            "   ",
            "schemas/relative",
            "mailto:someone@x.test",
            "https://x.test/s?v=1",
            "https://x.test/s#top",
            "https://x.test/s?",
        ] {
            let err = validate_base_url(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config, "{}", bad);
        }
        assert_eq!(validate_base_url("https://x.test/schemas/").unwrap(), "https://x.test/schemas");
    }

    #[test]
    fn test_non_object_root_is_internal() {
        let doc = SchemaDocument::new("a.json", json!(true));
        let err = assign_ids(&doc, LogicalPath::Manifest, "https://x.test").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
