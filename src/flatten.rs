//! Variant Flattener
//!
//! Checks that every `oneOf` group of a resolved document consists of
//! concrete schema objects and labels discriminated branches. Branch order
//! and duplicates are kept exactly as written.

use serde_json::{Map, Value};
use tracing::debug;

use crate::document::SchemaDocument;
use crate::error::{BuildFailure, SpecError};
use crate::pointer::JsonPointer;
use crate::resolver::contains_ref;

pub const ONE_OF: &str = "oneOf";

/// Keywords whose object value maps names to schemas, so its keys are data
pub(crate) const SCHEMA_MAP_KEYWORDS: &[&str] = &["properties", "patternProperties", "$defs", "definitions"];

/// Validate and label every `oneOf` group, reporting all invalid branches
pub fn flatten(document: &SchemaDocument) -> Result<SchemaDocument, BuildFailure> {
    let mut flattener = Flattener {
        locator: document.locator(),
        errors: Vec::new(),
        groups: 0,
    };
    let root = document.pointer_root().cloned().unwrap_or_default();
    let tree = flattener.visit(document.tree(), &root, true);

    if !flattener.errors.is_empty() {
        return Err(BuildFailure::new(flattener.errors));
    }
    debug!(
        locator = document.locator(),
        groups = flattener.groups,
        "oneOf groups checked"
    );
    Ok(document.derive(tree))
}

struct Flattener<'a> {
    locator: &'a str,
    errors: Vec<SpecError>,
    groups: usize,
}

impl Flattener<'_> {
    /// `schema` is false for the name maps under `properties` and friends
    fn visit(&mut self, value: &Value, path: &JsonPointer, schema: bool) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, child) in map {
                    let child_is_schema = !schema || !SCHEMA_MAP_KEYWORDS.contains(&key.as_str());
                    out.insert(
                        key.clone(),
                        self.visit(child, &path.child(key.clone()), child_is_schema),
                    );
                }
                if schema && out.contains_key(ONE_OF) {
                    self.check_group(&mut out, path);
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.visit(item, &path.child(i.to_string()), true))
                    .collect(),
            ),
            scalar => scalar.clone(),
        }
    }

    fn check_group(&mut self, group: &mut Map<String, Value>, path: &JsonPointer) {
        self.groups += 1;
        let discriminator = discriminator_property(group);
        let group_path = path.child(ONE_OF);

        let Some(Value::Array(branches)) = group.get_mut(ONE_OF) else {
            self.error(&group_path, "oneOf must be an array of schemas");
            return;
        };
        if branches.is_empty() {
            self.error(&group_path, "oneOf must list at least one variant");
            return;
        }

        for (index, branch) in branches.iter_mut().enumerate() {
            let branch_path = group_path.child(index.to_string());
            let branch = match branch {
                Value::Object(branch) => branch,
                other => {
                    let found = type_name(other);
                    self.error(&branch_path, &format!("variant must be a schema object, found {}", found));
                    continue;
                }
            };
            if branch.values().any(contains_ref) || matches!(branch.get("$ref"), Some(Value::String(_))) {
                self.error(&branch_path, "variant still contains an unresolved $ref");
                continue;
            }
            if let Some(property) = &discriminator {
                label_branch(branch, property);
            }
        }
    }

    fn error(&mut self, path: &JsonPointer, message: &str) {
        self.errors.push(SpecError::InvalidVariant {
            locator: self.locator.to_string(),
            path: path.to_string(),
            message: message.to_string(),
        });
    }
}

/// `discriminator.propertyName` (OpenAPI form) or `x-discriminator`
fn discriminator_property(group: &Map<String, Value>) -> Option<String> {
    group
        .get("discriminator")
        .and_then(|d| d.get("propertyName"))
        .and_then(Value::as_str)
        .or_else(|| group.get("x-discriminator").and_then(Value::as_str))
        .map(str::to_string)
}

fn label_branch(branch: &mut Map<String, Value>, property: &str) {
    if branch.get("title").map(Value::is_string).unwrap_or(false) {
        return;
    }
    let tag = branch
        .get("properties")
        .and_then(|p| p.get(property))
        .and_then(discriminator_value);
    if let Some(tag) = tag {
        branch.insert("title".to_string(), Value::String(tag));
    }
}

fn discriminator_value(schema: &Value) -> Option<String> {
    if let Some(value) = schema.get("const").and_then(Value::as_str) {
        return Some(value.to_string());
    }
    match schema.get("enum").and_then(Value::as_array).map(Vec::as_slice) {
        Some([Value::String(value)]) => Some(value.clone()),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(tree: Value) -> SchemaDocument {
        SchemaDocument::new("engines/postgresql/15.0/constraint.json", tree)
    }

    #[test]
    fn test_order_and_duplicates_preserved() {
        let tree = json!({
            "oneOf": [
                { "type": "string" },
                { "type": "integer" },
                { "type": "string" }
            ]
        });
        let flattened = flatten(&doc(tree.clone())).unwrap();
        assert_eq!(flattened.tree(), &tree);
    }

    #[test]
    fn test_invalid_branches_all_reported() {
        let tree = json!({
            "properties": {
                "check": { "oneOf": [ { "type": "string" }, true, { "$ref": "column.json" } ] },
                "kind": { "oneOf": { "type": "string" } }
            }
        });
        let failure = flatten(&doc(tree)).unwrap_err();
        let paths: Vec<String> = failure
            .errors
            .iter()
            .map(|e| match e {
                SpecError::InvalidVariant { path, locator, .. } => {
                    assert_eq!(locator, "engines/postgresql/15.0/constraint.json");
                    path.clone()
                }
                other => panic!("unexpected error {:?}", other),
            })
            .collect();
        assert_eq!(
            paths,
            vec![
                "/properties/check/oneOf/1",
                "/properties/check/oneOf/2",
                "/properties/kind/oneOf"
            ]
        );
    }

    #[test]
    fn test_discriminator_titles() {
        let tree = json!({
            "discriminator": { "propertyName": "kind" },
            "oneOf": [
                { "properties": { "kind": { "const": "primary_key" } } },
                { "properties": { "kind": { "enum": ["foreign_key"] } } },
                { "title": "Check", "properties": { "kind": { "const": "check" } } },
                { "properties": { "kind": { "type": "string" } } }
            ]
        });
        let flattened = flatten(&doc(tree)).unwrap();
        let branches = flattened.tree()["oneOf"].as_array().unwrap();
        assert_eq!(branches[0]["title"], "primary_key");
        assert_eq!(branches[1]["title"], "foreign_key");
        assert_eq!(branches[2]["title"], "Check");
        assert!(branches[3].get("title").is_none());
    }

    #[test]
    fn test_x_discriminator_and_nested_groups() {
        let tree = json!({
            "x-discriminator": "type",
            "oneOf": [
                {
                    "properties": {
                        "type": { "const": "numeric" },
                        "precision": { "oneOf": [ { "type": "integer" }, { "type": "null" } ] }
                    }
                }
            ]
        });
        let flattened = flatten(&doc(tree)).unwrap();
        assert_eq!(flattened.tree()["oneOf"][0]["title"], "numeric");
    }

    #[test]
    fn test_property_named_one_of_is_not_a_group() {
        let tree = json!({
            "properties": {
                "oneOf": { "type": "string" },
                "choice": { "oneOf": [ { "type": "string" }, { "type": "null" } ] }
            },
            "$defs": { "oneOf": { "type": "integer" } }
        });
        let flattened = flatten(&doc(tree.clone())).unwrap();
        assert_eq!(flattened.tree(), &tree);

        let failure = flatten(&doc(json!({ "properties": { "oneOf": { "oneOf": true } } }))).unwrap_err();
        assert_eq!(failure.errors.len(), 1);
        assert!(failure.errors[0].to_string().contains("#/properties/oneOf/oneOf:"));
    }

    #[test]
    fn test_empty_group_rejected() {
        let failure = flatten(&doc(json!({ "oneOf": [] }))).unwrap_err();
        assert_eq!(failure.errors.len(), 1);
        assert!(failure.errors[0].to_string().contains("at least one variant"));
    }
}
