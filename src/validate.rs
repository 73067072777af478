//! Metaschema checks for generated documents

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;
use tracing::warn;

use crate::config::ValidationConfig;
use crate::error::{Result, SpecError};
use crate::identity::{ResolvedOutputDocument, SCHEMA_KEY};

/// Keywords every published schema should carry
pub const RECOMMENDED_KEYWORDS: &[&str] = &[SCHEMA_KEY, "title"];

/// Fail if the document is not itself a valid JSON Schema
pub fn check_metaschema(document: &ResolvedOutputDocument) -> Result<()> {
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&document.body)
        .map(|_| ())
        .map_err(|e| SpecError::Validation {
            logical_path: document.logical_path.file_name(),
            message: e.to_string(),
        })
}

/// Recommended keywords missing from the document root; object schemas
/// should also declare `properties`
pub fn missing_recommended(document: &ResolvedOutputDocument) -> Vec<&'static str> {
    let mut missing: Vec<&'static str> = RECOMMENDED_KEYWORDS
        .iter()
        .copied()
        .filter(|keyword| document.body.get(keyword).is_none())
        .collect();
    if is_object_schema(&document.body) && document.body.get("properties").is_none() {
        missing.push("properties");
    }
    missing
}

fn is_object_schema(body: &Value) -> bool {
    match body.get("type") {
        Some(Value::String(kind)) => kind == "object",
        Some(Value::Array(kinds)) => kinds.iter().any(|k| k == "object"),
        _ => false,
    }
}

/// Run the checks enabled in `config`
pub fn validate_output(document: &ResolvedOutputDocument, config: &ValidationConfig) -> Result<()> {
    if config.warn_missing_recommended {
        let missing = missing_recommended(document);
        if !missing.is_empty() {
            warn!(
                document = %document.logical_path,
                missing = ?missing,
                "generated schema lacks recommended keywords"
            );
        }
    }
    if config.check_metaschema {
        check_metaschema(document)?;
    }
    Ok(())
}
