//! Reference Resolver
//!
//! Inlines every `$ref` in a document, depth-first and left-to-right.
//! Targets are loaded through the shared [`DocumentLoader`], resolved in
//! their own file's context and memoized for the rest of the run.

use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::debug;

use crate::document::{DocumentLoader, Locator, SchemaDocument};
use crate::error::{Result, SpecError};
use crate::pointer::{join_locator, JsonPointer, ReferencePointer};

pub const REF_KEY: &str = "$ref";

/// Default limit on nested reference chains
pub const DEFAULT_MAX_REF_DEPTH: usize = 64;

/// A resolution target: a file plus a location inside it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefKey {
    pub locator: Locator,
    pub pointer: JsonPointer,
}

impl RefKey {
    pub fn new(locator: impl Into<Locator>, pointer: JsonPointer) -> Self {
        Self {
            locator: locator.into(),
            pointer,
        }
    }
}

impl fmt::Display for RefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.locator, self.pointer)
    }
}

/// A cross-file reference followed during resolution
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceEdge {
    pub from: Locator,
    pub to: RefKey,
}

/// Per-run resolution state.
///
/// The visited stack detects cycles and reports the chain; the memo holds
/// fully resolved targets so each is walked once.
#[derive(Debug)]
pub struct ResolutionContext {
    visited: Vec<RefKey>,
    memo: HashMap<RefKey, Value>,
    edges: BTreeSet<ReferenceEdge>,
    max_depth: usize,
}

impl Default for ResolutionContext {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REF_DEPTH)
    }
}

impl ResolutionContext {
    pub fn new(max_depth: usize) -> Self {
        Self {
            visited: Vec::new(),
            memo: HashMap::new(),
            edges: BTreeSet::new(),
            max_depth,
        }
    }

    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }

    /// Cross-file edges followed so far, sorted
    pub fn edges(&self) -> impl Iterator<Item = &ReferenceEdge> {
        self.edges.iter()
    }

    fn cycle_from(&self, key: &RefKey) -> Option<Vec<String>> {
        let start = self.visited.iter().position(|k| k == key)?;
        let mut chain: Vec<String> = self.visited[start..].iter().map(RefKey::to_string).collect();
        chain.push(key.to_string());
        Some(chain)
    }
}

/// Resolves references against documents served by a loader
pub struct Resolver<'a> {
    loader: &'a DocumentLoader,
}

impl<'a> Resolver<'a> {
    pub fn new(loader: &'a DocumentLoader) -> Self {
        Self { loader }
    }

    /// Produce a new document with every `$ref` inlined
    pub fn resolve_document(
        &self,
        document: &SchemaDocument,
        context: &mut ResolutionContext,
    ) -> Result<SchemaDocument> {
        let key = RefKey::new(
            document.locator(),
            document.pointer_root().cloned().unwrap_or_default(),
        );
        if let Some(chain) = context.cycle_from(&key) {
            return Err(SpecError::CircularReference { chain });
        }
        if let Some(cached) = context.memo.get(&key) {
            return Ok(document.derive(cached.clone()));
        }

        context.visited.push(key.clone());
        let resolved = self.resolve_value(document.tree(), document.locator(), context);
        context.visited.pop();
        let resolved = resolved?;

        context.memo.insert(key, resolved.clone());
        Ok(document.derive(resolved))
    }

    fn resolve_value(
        &self,
        value: &Value,
        locator: &str,
        context: &mut ResolutionContext,
    ) -> Result<Value> {
        match value {
            Value::Object(map) => match map.get(REF_KEY) {
                Some(Value::String(raw)) => self.resolve_reference(raw, map, locator, context),
                _ => {
                    let mut resolved = Map::with_capacity(map.len());
                    for (key, child) in map {
                        resolved.insert(key.clone(), self.resolve_value(child, locator, context)?);
                    }
                    Ok(Value::Object(resolved))
                }
            },
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_value(item, locator, context))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            scalar => Ok(scalar.clone()),
        }
    }

    fn resolve_reference(
        &self,
        raw: &str,
        map: &Map<String, Value>,
        locator: &str,
        context: &mut ResolutionContext,
    ) -> Result<Value> {
        let reference_error = |message: String| SpecError::Reference {
            locator: locator.to_string(),
            pointer: raw.to_string(),
            message,
        };

        let reference = ReferencePointer::parse(raw).map_err(reference_error)?;
        let target_locator = match &reference.target_file {
            Some(file) => join_locator(locator, file).map_err(reference_error)?,
            None => locator.to_string(),
        };
        let key = RefKey::new(target_locator, reference.pointer);

        let target = self.resolve_target(key, raw, locator, context)?;
        if map.len() == 1 {
            return Ok(target);
        }

        // Siblings override same-named target keys in place; new keys follow.
        let mut siblings = Map::with_capacity(map.len() - 1);
        for (key, value) in map {
            if key != REF_KEY {
                siblings.insert(key.clone(), self.resolve_value(value, locator, context)?);
            }
        }
        let Value::Object(target) = target else {
            return Err(reference_error("target of a reference with siblings is not an object".into()));
        };

        let mut merged = Map::with_capacity(target.len() + siblings.len());
        for (key, value) in target {
            let value = match siblings.get(&key) {
                Some(sibling) => merge_sibling(value, sibling),
                None => value,
            };
            merged.insert(key, value);
        }
        for (key, value) in siblings {
            if !merged.contains_key(&key) {
                merged.insert(key, value);
            }
        }
        Ok(Value::Object(merged))
    }

    fn resolve_target(
        &self,
        key: RefKey,
        raw: &str,
        from: &str,
        context: &mut ResolutionContext,
    ) -> Result<Value> {
        if let Some(chain) = context.cycle_from(&key) {
            return Err(SpecError::CircularReference { chain });
        }
        if key.locator != from {
            context.edges.insert(ReferenceEdge {
                from: from.to_string(),
                to: key.clone(),
            });
        }
        if let Some(cached) = context.memo.get(&key) {
            debug!(target = %key, "reference served from memo");
            return Ok(cached.clone());
        }
        if context.visited.len() >= context.max_depth {
            return Err(SpecError::Reference {
                locator: from.to_string(),
                pointer: raw.to_string(),
                message: format!(
                    "reference chain exceeds the maximum depth of {}",
                    context.max_depth
                ),
            });
        }

        let document = self.loader.load(&key.locator)?;
        let target = key.pointer.navigate(document.tree()).map_err(|e| SpecError::Reference {
            locator: from.to_string(),
            pointer: raw.to_string(),
            message: e.to_string(),
        })?;
        if !target.is_object() {
            return Err(SpecError::Reference {
                locator: from.to_string(),
                pointer: raw.to_string(),
                message: format!("'{}' does not select a schema object", key),
            });
        }

        context.visited.push(key.clone());
        let resolved = self.resolve_value(target, &key.locator, context);
        context.visited.pop();
        let resolved = resolved?;

        context.memo.insert(key, resolved.clone());
        Ok(resolved)
    }
}

/// Resolve `document` with a fresh resolver over `loader`
pub fn resolve(
    document: &SchemaDocument,
    context: &mut ResolutionContext,
    loader: &DocumentLoader,
) -> Result<SchemaDocument> {
    Resolver::new(loader).resolve_document(document, context)
}

/// Object-valued keys merge one level deep with the sibling winning per
/// inner key; anything else is replaced by the sibling value.
fn merge_sibling(target: Value, sibling: &Value) -> Value {
    match (target, sibling) {
        (Value::Object(mut inner), Value::Object(overrides)) => {
            for (key, value) in overrides {
                inner.insert(key.clone(), value.clone());
            }
            Value::Object(inner)
        }
        (_, sibling) => sibling.clone(),
    }
}

/// Whether any string-valued `$ref` remains in `value`
pub fn contains_ref(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            matches!(map.get(REF_KEY), Some(Value::String(_))) || map.values().any(contains_ref)
        }
        Value::Array(items) => items.iter().any(contains_ref),
        _ => false,
    }
}
