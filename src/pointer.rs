//! `$ref` and JSON Pointer handling
//!
//! Splits `$ref` strings into a target file and an RFC 6901 pointer,
//! normalizes file targets relative to the referencing document, and
//! navigates pointers inside parsed documents.

use serde_json::Value;
use std::fmt;
use std::path::{Component, Path};
use thiserror::Error;

/// Why a pointer could not be followed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PointerError {
    #[error("key '{segment}' not found at '{at}'")]
    NotFound { segment: String, at: String },

    #[error("invalid array index '{segment}' at '{at}'")]
    InvalidIndex { segment: String, at: String },

    #[error("cannot descend into a scalar at '{at}'")]
    NotContainer { at: String },
}

/// A parsed RFC 6901 JSON Pointer
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JsonPointer {
    segments: Vec<String>,
}

impl JsonPointer {
    /// The pointer selecting the whole document
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a fragment (the part after `#`).
    ///
    /// Both `""` and `"/"` select the whole document.
    pub fn parse(fragment: &str) -> Result<Self, String> {
        if fragment.is_empty() || fragment == "/" {
            return Ok(Self::root());
        }
        let rest = fragment.strip_prefix('/').ok_or_else(|| {
            format!("fragment '{}' is not a JSON pointer (plain-name anchors are not supported)", fragment)
        })?;
        let segments = rest.split('/').map(unescape).collect();
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// A new pointer one level deeper
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// Follow the pointer inside `value`
    pub fn navigate<'a>(&self, value: &'a Value) -> Result<&'a Value, PointerError> {
        let mut current = value;
        let mut at = JsonPointer::root();
        for segment in &self.segments {
            current = match current {
                Value::Object(map) => map.get(segment).ok_or_else(|| PointerError::NotFound {
                    segment: segment.clone(),
                    at: at.to_string(),
                })?,
                Value::Array(items) => {
                    let index = parse_index(segment).ok_or_else(|| PointerError::InvalidIndex {
                        segment: segment.clone(),
                        at: at.to_string(),
                    })?;
                    items.get(index).ok_or_else(|| PointerError::NotFound {
                        segment: segment.clone(),
                        at: at.to_string(),
                    })?
                }
                _ => {
                    return Err(PointerError::NotContainer { at: at.to_string() });
                }
            };
            at = at.child(segment.clone());
        }
        Ok(current)
    }
}

impl fmt::Display for JsonPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "/{}", escape(segment))?;
        }
        Ok(())
    }
}

/// RFC 6901 forbids leading zeros and signs in array indices
fn parse_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if segment.len() > 1 && segment.starts_with('0') {
        return None;
    }
    segment.parse().ok()
}

fn unescape(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// A `$ref` value split into its file part and pointer part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencePointer {
    /// `None` when the reference stays inside the current document
    pub target_file: Option<String>,
    pub pointer: JsonPointer,
}

impl ReferencePointer {
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.contains("://") || raw.starts_with("urn:") {
            return Err(format!("remote reference '{}' is not supported", raw));
        }
        let (file, fragment) = match raw.split_once('#') {
            Some((file, fragment)) => (file, fragment),
            None => (raw, ""),
        };
        let target_file = if file.is_empty() {
            None
        } else {
            Some(file.to_string())
        };
        let pointer = JsonPointer::parse(fragment)?;
        Ok(Self { target_file, pointer })
    }
}

/// Normalize a root-relative path into a locator (`/`-separated, no `.` or `..`)
pub fn normalize_path(path: &str) -> Result<String, String> {
    join_locator("", path)
}

/// Resolve `target` relative to the directory of the `current` locator.
///
/// Fails when the result would leave the input root.
pub fn join_locator(current: &str, target: &str) -> Result<String, String> {
    if target.starts_with('/') || Path::new(target).is_absolute() {
        return Err(format!("absolute file reference '{}' is not supported", target));
    }

    let mut components: Vec<String> = Path::new(current)
        .parent()
        .map(|parent| {
            parent
                .components()
                .filter_map(|c| match c {
                    Component::Normal(s) => Some(s.to_string_lossy().to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    for component in Path::new(target).components() {
        match component {
            Component::ParentDir => {
                if components.pop().is_none() {
                    return Err(format!("reference '{}' escapes the input root", target));
                }
            }
            Component::Normal(s) => components.push(s.to_string_lossy().to_string()),
            _ => {}
        }
    }

    if components.is_empty() {
        return Err(format!("reference '{}' does not name a file", target));
    }
    Ok(components.join("/"))
}
