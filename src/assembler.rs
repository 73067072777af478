//! Output Assembler
//!
//! Puts resolved documents into their final order, checks the output
//! invariants one last time and serializes everything, the schema map and
//! the checksum listing included.

use std::collections::HashSet;
use tracing::debug;

use crate::checksum::{render_checksums, Checksum, CHECKSUM_FILE};
use crate::config::OutputFormat;
use crate::error::{Result, SpecError};
use crate::identity::{count_ids, LogicalPath, ResolvedOutputDocument, ID_KEY};
use crate::resolver::contains_ref;
use crate::smap::{SchemaMap, SMAP_FILE};

#[derive(Debug, Clone, Copy)]
pub struct AssembleOptions {
    pub format: OutputFormat,
    pub checksums: bool,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Pretty,
            checksums: true,
        }
    }
}

/// One serialized output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledFile {
    /// Path relative to the output root, `/`-separated
    pub path: String,
    pub contents: String,
    pub checksum: Checksum,
}

impl AssembledFile {
    fn new(path: impl Into<String>, contents: String) -> Self {
        let checksum = Checksum::from_str(&contents);
        Self {
            path: path.into(),
            contents,
            checksum,
        }
    }
}

/// Manifest, base config, engine configs by engine, then components as given
fn order_key(path: &LogicalPath) -> (u8, &str) {
    match path {
        LogicalPath::Manifest => (0, ""),
        LogicalPath::BaseConfig => (1, ""),
        LogicalPath::EngineConfig { engine } => (2, engine),
        LogicalPath::Component { .. } => (3, ""),
    }
}

/// Order, verify and serialize the full output set
pub fn assemble(
    documents: &[ResolvedOutputDocument],
    map: &SchemaMap,
    options: &AssembleOptions,
) -> Result<Vec<AssembledFile>> {
    let mut ordered: Vec<&ResolvedOutputDocument> = documents.iter().collect();
    // stable: components keep registry order
    ordered.sort_by(|a, b| order_key(&a.logical_path).cmp(&order_key(&b.logical_path)));

    let mut files = Vec::with_capacity(ordered.len() + 2);
    let mut ids = HashSet::with_capacity(ordered.len());
    for document in ordered {
        verify_document(document)?;
        ids.insert(document.id.as_str());

        let contents = options
            .format
            .render(&document.body)
            .map_err(|e| SpecError::Internal(format!("cannot serialize {}: {}", document.logical_path, e)))?;
        files.push(AssembledFile::new(document.logical_path.file_name(), contents));
    }

    if let Some(url) = map.urls().into_iter().find(|url| !ids.contains(url)) {
        return Err(SpecError::Internal(format!(
            "schema map lists {} but no document carries that $id",
            url
        )));
    }

    let smap = options
        .format
        .render(map)
        .map_err(|e| SpecError::Internal(format!("cannot serialize {}: {}", SMAP_FILE, e)))?;
    files.push(AssembledFile::new(SMAP_FILE, smap));

    if options.checksums {
        let listing = render_checksums(files.iter().map(|f| (f.path.as_str(), &f.checksum)));
        files.push(AssembledFile::new(CHECKSUM_FILE, listing));
    }

    debug!(files = files.len(), "output assembled");
    Ok(files)
}

fn verify_document(document: &ResolvedOutputDocument) -> Result<()> {
    let path = &document.logical_path;
    if contains_ref(&document.body) {
        return Err(SpecError::Internal(format!("{} still contains a $ref", path)));
    }
    let count = count_ids(&document.body);
    if count != 1 {
        return Err(SpecError::Internal(format!(
            "{} carries {} $id keys instead of exactly one",
            path, count
        )));
    }
    match document.body.get(ID_KEY).and_then(|id| id.as_str()) {
        Some(id) if id == document.id => Ok(()),
        Some(id) => Err(SpecError::Internal(format!(
            "{} has $id {} but should be {}",
            path, id, document.id
        ))),
        None => Err(SpecError::Internal(format!("{} has no root $id", path))),
    }
}
