//! Schema Documents and Loading
//!
//! A [`SchemaDocument`] is an immutable parsed tree tagged with the file it
//! came from. The [`DocumentLoader`] parses each file at most once per run
//! and hands out the same shared document on every later request.

use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

use crate::error::LoadError;
use crate::pointer::{normalize_path, JsonPointer, PointerError};

/// Normalized, `/`-separated path of a source file relative to the input root
pub type Locator = String;

/// A parsed schema tree and where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDocument {
    locator: Locator,
    /// The in-document path this tree represents, for partial inclusion
    pointer_root: Option<JsonPointer>,
    tree: Arc<Value>,
}

impl SchemaDocument {
    pub fn new(locator: impl Into<Locator>, tree: Value) -> Self {
        Self {
            locator: locator.into(),
            pointer_root: None,
            tree: Arc::new(tree),
        }
    }

    pub fn with_pointer_root(mut self, pointer: JsonPointer) -> Self {
        self.pointer_root = if pointer.is_root() { None } else { Some(pointer) };
        self
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn pointer_root(&self) -> Option<&JsonPointer> {
        self.pointer_root.as_ref()
    }

    pub fn tree(&self) -> &Value {
        &self.tree
    }

    /// `locator#pointer`, the form used in error chains
    pub fn address(&self) -> String {
        match &self.pointer_root {
            Some(pointer) => format!("{}#{}", self.locator, pointer),
            None => format!("{}#", self.locator),
        }
    }

    /// A new document for the subtree at `pointer`
    pub fn subtree(&self, pointer: &JsonPointer) -> Result<SchemaDocument, PointerError> {
        let value = pointer.navigate(&self.tree)?;
        Ok(SchemaDocument::new(self.locator.clone(), value.clone()).with_pointer_root(pointer.clone()))
    }

    /// Same identity, different tree. Used by passes that rewrite a document.
    pub fn derive(&self, tree: Value) -> SchemaDocument {
        Self {
            locator: self.locator.clone(),
            pointer_root: self.pointer_root.clone(),
            tree: Arc::new(tree),
        }
    }

    pub fn into_tree(self) -> Value {
        Arc::try_unwrap(self.tree).unwrap_or_else(|shared| (*shared).clone())
    }
}

type Slot = Arc<OnceLock<Result<Arc<SchemaDocument>, LoadError>>>;

/// Read-through cache of parsed source files.
///
/// Each locator has its own latch: the first caller parses, concurrent
/// callers for the same locator wait for that result. Failures are cached
/// as well.
#[derive(Debug)]
pub struct DocumentLoader {
    root: PathBuf,
    cache: Mutex<HashMap<Locator, Slot>>,
}

impl DocumentLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load (or fetch from cache) the document at `locator`
    pub fn load(&self, locator: &str) -> Result<Arc<SchemaDocument>, LoadError> {
        let locator = normalize_path(locator).map_err(|reason| LoadError::new(locator, reason))?;

        let slot = {
            let mut cache = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            cache.entry(locator.clone()).or_default().clone()
        };

        slot.get_or_init(|| self.read(&locator)).clone()
    }

    /// Whether a file exists for `locator` (does not parse it)
    pub fn exists(&self, locator: &str) -> bool {
        normalize_path(locator)
            .map(|l| self.root.join(l).is_file())
            .unwrap_or(false)
    }

    /// Number of distinct locators requested so far
    pub fn cached_count(&self) -> usize {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    fn read(&self, locator: &str) -> Result<Arc<SchemaDocument>, LoadError> {
        let path = self.root.join(locator);
        debug!(locator, path = %path.display(), "loading schema document");

        let content = fs::read_to_string(&path).map_err(|e| {
            let reason = if e.kind() == std::io::ErrorKind::NotFound {
                format!("file not found: {}", path.display())
            } else {
                format!("cannot read {}: {}", path.display(), e)
            };
            LoadError::new(locator, reason)
        })?;

        let tree = parse_document(locator, &content)?;
        Ok(Arc::new(SchemaDocument::new(locator, tree)))
    }
}

/// Parse text into a document tree, choosing YAML or JSON by extension
pub fn parse_document(locator: &str, content: &str) -> Result<Value, LoadError> {
    let extension = Path::new(locator)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match extension {
        "yaml" | "yml" => serde_yaml::from_str(content)
            .map_err(|e| LoadError::new(locator, format!("invalid YAML: {}", e))),
        _ => serde_json::from_str(content)
            .map_err(|e| LoadError::new(locator, format!("invalid JSON: {}", e))),
    }
}
