//! Engine Variant Selection
//!
//! A component schema may describe several engines or versions at once
//! through a `oneOf` group whose branches are each conditioned on the
//! variant being built, either in `if`/`then` form:
//!
//! ```json
//! { "if": { "properties": { "engine": { "const": "postgresql" } } },
//!   "then": { "properties": { "schema": { "type": "string" } } } }
//! ```
//!
//! or directly as `properties.engine.const` / `properties.version.const`.
//! For each engine/version build the single matching branch is merged into
//! the enclosing schema and the group is removed. Groups whose branches are
//! not all conditioned this way are left alone for the flattener.

use serde_json::{Map, Value};
use std::fmt;
use tracing::debug;

use crate::document::SchemaDocument;
use crate::error::{BuildFailure, SpecError};
use crate::flatten::{ONE_OF, SCHEMA_MAP_KEYWORDS};
use crate::pointer::JsonPointer;

/// The engine and version a document is being built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variant<'a> {
    pub engine: &'a str,
    pub version: &'a str,
}

impl fmt::Display for Variant<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.engine, self.version)
    }
}

/// Resolve every engine-conditioned `oneOf` group of `document` for `variant`
pub fn select_variant(
    document: &SchemaDocument,
    variant: Variant<'_>,
) -> Result<SchemaDocument, BuildFailure> {
    let mut selector = Selector {
        locator: document.locator(),
        variant,
        errors: Vec::new(),
        selected: 0,
    };
    let root = document.pointer_root().cloned().unwrap_or_default();
    let tree = selector.visit(document.tree(), &root, true);

    if !selector.errors.is_empty() {
        return Err(BuildFailure::new(selector.errors));
    }
    if selector.selected > 0 {
        debug!(
            locator = document.locator(),
            %variant,
            groups = selector.selected,
            "engine variants selected"
        );
    }
    Ok(document.derive(tree))
}

/// Engine and version constants a branch is conditioned on
#[derive(Debug, Default)]
struct Condition {
    engine: Option<String>,
    version: Option<String>,
}

impl Condition {
    fn from_properties(properties: &Map<String, Value>) -> Option<Self> {
        let condition = Condition {
            engine: properties.get("engine").and_then(constant),
            version: properties.get("version").and_then(constant),
        };
        (condition.engine.is_some() || condition.version.is_some()).then_some(condition)
    }

    fn matches(&self, variant: Variant<'_>) -> bool {
        let engine = self
            .engine
            .as_deref()
            .map_or(true, |e| e.eq_ignore_ascii_case(variant.engine));
        let version = self.version.as_deref().map_or(true, |v| v == variant.version);
        engine && version
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.engine.as_deref().unwrap_or("*"),
            self.version.as_deref().unwrap_or("*")
        )
    }
}

/// How a matching branch contributes to the enclosing schema
enum Branch<'a> {
    /// `if` holds the condition; only `then` is merged
    IfThen(Option<&'a Map<String, Value>>),
    /// The whole branch is merged
    Direct(&'a Map<String, Value>),
}

struct Selector<'a> {
    locator: &'a str,
    variant: Variant<'a>,
    errors: Vec<SpecError>,
    selected: usize,
}

impl Selector<'_> {
    fn visit(&mut self, value: &Value, path: &JsonPointer, schema: bool) -> Value {
        match value {
            Value::Object(map) => {
                let mut current = map.clone();
                if schema {
                    // a merged `then` may bring its own conditioned group
                    while let Some(merged) = self.select(&current, path) {
                        current = merged;
                    }
                }
                let mut out = Map::with_capacity(current.len());
                for (key, child) in &current {
                    let child_is_schema = !schema || !SCHEMA_MAP_KEYWORDS.contains(&key.as_str());
                    out.insert(
                        key.clone(),
                        self.visit(child, &path.child(key.clone()), child_is_schema),
                    );
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

    /// The schema with its conditioned group resolved, or `None` when
    /// there is no such group (or it failed and the error was recorded)
    fn select(&mut self, schema: &Map<String, Value>, path: &JsonPointer) -> Option<Map<String, Value>> {
        let Some(Value::Array(branches)) = schema.get(ONE_OF) else {
            return None;
        };
        let conditioned: Vec<(Condition, Branch<'_>)> =
            branches.iter().map_while(conditioned_branch).collect();
        if conditioned.is_empty() || conditioned.len() != branches.len() {
            return None;
        }

        let group_path = path.child(ONE_OF);
        let matching: Vec<&Branch<'_>> = conditioned
            .iter()
            .filter(|(condition, _)| condition.matches(self.variant))
            .map(|(_, branch)| branch)
            .collect();
        let branch = match matching.as_slice() {
            [branch] => *branch,
            [] => {
                let supported: Vec<String> = conditioned.iter().map(|(c, _)| c.to_string()).collect();
                self.error(
                    &group_path,
                    format!(
                        "no variant matches {}; supported: {}",
                        self.variant,
                        supported.join(", ")
                    ),
                );
                return None;
            }
            many => {
                self.error(
                    &group_path,
                    format!(
                        "{} variants match {}; engine conditions must be mutually exclusive",
                        many.len(),
                        self.variant
                    ),
                );
                return None;
            }
        };

        let mut merged: Map<String, Value> = schema
            .iter()
            .filter(|(key, _)| key.as_str() != ONE_OF)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        match branch {
            Branch::IfThen(Some(then)) => merge_into(&mut merged, then),
            Branch::IfThen(None) => {}
            Branch::Direct(body) => merge_into(&mut merged, body),
        }
        self.selected += 1;
        Some(merged)
    }

    fn error(&mut self, path: &JsonPointer, message: String) {
        self.errors.push(SpecError::InvalidVariant {
            locator: self.locator.to_string(),
            path: path.to_string(),
            message,
        });
    }
}

fn conditioned_branch(branch: &Value) -> Option<(Condition, Branch<'_>)> {
    let branch = branch.as_object()?;
    if let Some(Value::Object(when)) = branch.get("if") {
        let properties = when.get("properties")?.as_object()?;
        // nested form: if.properties.database.properties.engine
        let properties = match properties.get("database").and_then(|d| d.get("properties")) {
            Some(Value::Object(nested)) => nested,
            _ => properties,
        };
        let then = branch.get("then").and_then(Value::as_object);
        return Some((Condition::from_properties(properties)?, Branch::IfThen(then)));
    }
    let properties = branch.get("properties")?.as_object()?;
    Some((Condition::from_properties(properties)?, Branch::Direct(branch)))
}

/// `{"const": "x"}` or a bare string
fn constant(schema: &Value) -> Option<String> {
    match schema {
        Value::String(value) => Some(value.clone()),
        Value::Object(map) => map.get("const").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Deep merge with `overlay` winning; `required` lists are unioned
fn merge_into(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(inner)) => merge_into(existing, inner),
            (Some(Value::Array(existing)), Value::Array(extra)) if key == "required" => {
                for item in extra {
                    if !existing.contains(item) {
                        existing.push(item.clone());
                    }
                }
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PG15: Variant<'static> = Variant {
        engine: "postgresql",
        version: "15.0",
    };

    fn doc(tree: Value) -> SchemaDocument {
        SchemaDocument::new("engines/shared/connection.json", tree)
    }

    fn engine_group() -> Value {
        json!({
            "title": "Connection",
            "type": "object",
            "properties": { "host": { "type": "string" } },
            "required": ["host"],
            "oneOf": [
                {
                    "if": { "properties": { "engine": { "const": "postgresql" } } },
                    "then": {
                        "properties": { "sslmode": { "type": "string" } },
                        "required": ["sslmode"]
                    }
                },
                {
                    "if": { "properties": { "engine": { "const": "mysql" } } },
                    "then": { "properties": { "charset": { "type": "string" } } }
                }
            ]
        })
    }

    #[test]
    fn test_if_then_branch_merged() {
        let selected = select_variant(&doc(engine_group()), PG15).unwrap();
        let tree = selected.tree();
        assert!(tree.get("oneOf").is_none());
        assert_eq!(
            tree["properties"],
            json!({ "host": { "type": "string" }, "sslmode": { "type": "string" } })
        );
        assert_eq!(tree["required"], json!(["host", "sslmode"]));
        assert_eq!(tree["title"], "Connection");
    }

    #[test]
    fn test_direct_branches_keyed_on_version() {
        let tree = json!({
            "type": "object",
            "oneOf": [
                { "properties": { "engine": { "const": "PostgreSQL" }, "version": { "const": "15.0" },
                                  "nulls_distinct": { "type": "boolean" } } },
                { "properties": { "engine": { "const": "PostgreSQL" }, "version": { "const": "14.0" } } }
            ]
        });
        let selected = select_variant(&doc(tree), PG15).unwrap();
        let properties = &selected.tree()["properties"];
        assert_eq!(properties["nulls_distinct"]["type"], "boolean");
        assert_eq!(properties["version"]["const"], "15.0");
    }

    #[test]
    fn test_no_matching_variant() {
        let variant = Variant {
            engine: "sqlite",
            version: "3",
        };
        let failure = select_variant(&doc(engine_group()), variant).unwrap_err();
        assert_eq!(failure.errors.len(), 1);
        let message = failure.errors[0].to_string();
        assert!(message.contains("#/oneOf:"), "{}", message);
        assert!(message.contains("no variant matches sqlite 3; supported: postgresql *, mysql *"));
    }

    #[test]
    fn test_overlapping_variants_rejected() {
        let tree = json!({
            "oneOf": [
                { "properties": { "engine": { "const": "postgresql" } } },
                { "properties": { "version": { "const": "15.0" } } }
            ]
        });
        let failure = select_variant(&doc(tree), PG15).unwrap_err();
        assert!(failure.errors[0].to_string().contains("2 variants match postgresql 15.0"));
    }

    #[test]
    fn test_plain_groups_untouched() {
        let tree = json!({
            "properties": {
                "engine": { "type": "string" },
                "kind": {
                    "oneOf": [
                        { "properties": { "kind": { "const": "check" } } },
                        { "properties": { "engine": { "const": "postgresql" } } }
                    ]
                }
            }
        });
        let selected = select_variant(&doc(tree.clone()), PG15).unwrap();
        assert_eq!(selected.tree(), &tree);
    }

    #[test]
    fn test_nested_database_condition() {
        let tree = json!({
            "properties": {
                "options": {
                    "oneOf": [{
                        "if": { "properties": { "database": { "properties": {
                            "engine": { "const": "postgresql" }, "version": { "const": "15.0" } } } } },
                        "then": { "properties": { "fillfactor": { "type": "integer" } } }
                    }]
                }
            }
        });
        let selected = select_variant(&doc(tree), PG15).unwrap();
        assert_eq!(
            selected.tree()["properties"]["options"],
            json!({ "properties": { "fillfactor": { "type": "integer" } } })
        );
    }
}
