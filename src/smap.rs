//! Schema Map Builder
//!
//! Builds `smap.json`, the discovery index from logical category to the URL
//! of every generated document.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::error::{Result, SpecError};
use crate::identity::{LogicalPath, ResolvedOutputDocument};

pub const SMAP_FILE: &str = "smap.json";

/// `component -> url`
pub type ComponentUrls = BTreeMap<String, String>;

/// The discovery map written as `smap.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaMap {
    pub project: ProjectUrls,
    /// `engine -> version -> component -> url`
    pub engines: BTreeMap<String, BTreeMap<String, ComponentUrls>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectUrls {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
    /// `base` plus one key per engine
    pub config: BTreeMap<String, String>,
}

impl SchemaMap {
    /// Every URL in the map
    pub fn urls(&self) -> Vec<&str> {
        let mut urls: Vec<&str> = self.project.manifest.iter().map(String::as_str).collect();
        urls.extend(self.project.config.values().map(String::as_str));
        for versions in self.engines.values() {
            for components in versions.values() {
                urls.extend(components.values().map(String::as_str));
            }
        }
        urls
    }

    pub fn component_url(&self, engine: &str, version: &str, component: &str) -> Option<&str> {
        self.engines
            .get(&engine.to_lowercase())?
            .get(version)?
            .get(component)
            .map(String::as_str)
    }
}

/// Group documents by logical category. Two documents may not share a path.
pub fn build_map(documents: &[ResolvedOutputDocument]) -> Result<SchemaMap> {
    let mut map = SchemaMap::default();
    let mut seen = HashSet::new();

    for document in documents {
        if !seen.insert(&document.logical_path) {
            return Err(SpecError::Internal(format!(
                "two documents share the logical path {}",
                document.logical_path
            )));
        }
        let url = document.id.clone();
        match &document.logical_path {
            LogicalPath::Manifest => map.project.manifest = Some(url),
            LogicalPath::BaseConfig => {
                map.project.config.insert("base".to_string(), url);
            }
            LogicalPath::EngineConfig { engine } => {
                map.project.config.insert(engine.clone(), url);
            }
            LogicalPath::Component {
                engine,
                version,
                component,
            } => {
                map.engines
                    .entry(engine.clone())
                    .or_default()
                    .entry(version.clone())
                    .or_default()
                    .insert(component.clone(), url);
            }
        }
    }

    Ok(map)
}
