//! Engine/Version Registry
//!
//! Loads the registry document that names the project schemas and every
//! supported `(engine, version)` pair with its component schema files.
//! All inconsistencies are collected and reported together.

use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::conditional::Variant;
use crate::document::{DocumentLoader, Locator};
use crate::error::{BuildFailure, SpecError};
use crate::pointer::normalize_path;

/// Engine names that would collide with project config keys or output paths
pub const RESERVED_ENGINE_NAMES: &[&str] = &["base", "config"];

/// File extensions treated as schema sources
pub const SCHEMA_EXTENSIONS: &[&str] = &["json", "yaml", "yml"];

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").unwrap())
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap())
}

// =============================================================================
// Registry file format
// =============================================================================

#[derive(Debug, Deserialize)]
struct RegistryFile {
    project: ProjectSection,
    #[serde(default)]
    engines: Vec<EngineSection>,
}

#[derive(Debug, Deserialize)]
struct ProjectSection {
    manifest: String,
    config: ConfigSection,
}

#[derive(Debug, Deserialize)]
struct ConfigSection {
    base: String,
    #[serde(default)]
    engines: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct EngineSection {
    engine: String,
    version: String,
    #[serde(default)]
    components: BTreeMap<String, String>,
    /// Every schema file directly inside becomes a component
    #[serde(default)]
    directory: Option<String>,
}

// =============================================================================
// Validated registry
// =============================================================================

/// Project-level schema sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSchemas {
    pub manifest: Locator,
    pub base_config: Locator,
    /// Keyed by lowercased engine name
    pub engine_configs: BTreeMap<String, Locator>,
}

/// One supported engine/version and its component sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineVersionEntry {
    pub engine: String,
    pub version: String,
    /// Component name to source locator, sorted by name
    pub components: BTreeMap<String, Locator>,
}

impl EngineVersionEntry {
    /// Engine name as used in output paths and map keys
    pub fn engine_key(&self) -> String {
        self.engine.to_lowercase()
    }

    pub fn variant(&self) -> Variant<'_> {
        Variant {
            engine: &self.engine,
            version: &self.version,
        }
    }
}

impl std::fmt::Display for EngineVersionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.engine, self.version)
    }
}

/// The validated registry
#[derive(Debug, Clone)]
pub struct Registry {
    locator: Locator,
    project: ProjectSchemas,
    entries: Vec<EngineVersionEntry>,
}

impl Registry {
    /// Load and validate the registry at `locator`
    pub fn load(loader: &DocumentLoader, locator: &str) -> Result<Self, BuildFailure> {
        let document = loader.load(locator).map_err(SpecError::from)?;
        let locator = document.locator().to_string();

        let file: RegistryFile = serde_json::from_value(document.tree().clone()).map_err(|e| {
            SpecError::Registry {
                locator: locator.clone(),
                message: format!("malformed registry: {}", e),
            }
        })?;

        let mut problems = Problems::new(&locator);
        let project = Self::validate_project(&file.project, loader, &mut problems);

        let mut entries = Vec::with_capacity(file.engines.len());
        let mut seen = HashSet::new();
        for section in &file.engines {
            if let Some(entry) = Self::validate_entry(section, loader, &mut problems) {
                if !seen.insert((entry.engine_key(), entry.version.clone())) {
                    problems.push(format!(
                        "engine '{}' version '{}' is declared more than once",
                        entry.engine, entry.version
                    ));
                    continue;
                }
                entries.push(entry);
            }
        }

        let declared_engines: BTreeSet<String> = entries.iter().map(|e| e.engine_key()).collect();
        for engine in &declared_engines {
            if !project.engine_configs.contains_key(engine) {
                problems.push(format!(
                    "engine '{}' has versions but no config schema under project.config.engines",
                    engine
                ));
            }
        }
        for engine in project.engine_configs.keys() {
            if !declared_engines.contains(engine) {
                warn!(engine = %engine, "engine config declared without any engine version");
            }
        }

        problems.finish()?;
        debug!(
            registry = %locator,
            entries = entries.len(),
            "registry loaded"
        );

        Ok(Self {
            locator,
            project,
            entries,
        })
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn project(&self) -> &ProjectSchemas {
        &self.project
    }

    /// Engine/version entries in registry order
    pub fn entries(&self) -> &[EngineVersionEntry] {
        &self.entries
    }

    pub fn get(&self, engine: &str, version: &str) -> Option<&EngineVersionEntry> {
        let engine = engine.to_lowercase();
        self.entries
            .iter()
            .find(|e| e.engine_key() == engine && e.version == version)
    }

    /// Every source file the registry names directly
    pub fn declared_locators(&self) -> Vec<&str> {
        let mut locators = vec![
            self.project.manifest.as_str(),
            self.project.base_config.as_str(),
        ];
        locators.extend(self.project.engine_configs.values().map(String::as_str));
        for entry in &self.entries {
            locators.extend(entry.components.values().map(String::as_str));
        }
        locators
    }

    fn validate_project(
        section: &ProjectSection,
        loader: &DocumentLoader,
        problems: &mut Problems,
    ) -> ProjectSchemas {
        let manifest = problems.existing_file(loader, "project manifest", &section.manifest);
        let base_config = problems.existing_file(loader, "base config", &section.config.base);

        let mut engine_configs = BTreeMap::new();
        for (engine, path) in &section.config.engines {
            if !problems.check_engine_name(engine) {
                continue;
            }
            let label = format!("config schema for engine '{}'", engine);
            let locator = problems.existing_file(loader, &label, path);
            if engine_configs.insert(engine.to_lowercase(), locator).is_some() {
                problems.push(format!("config schema for engine '{}' is declared more than once", engine));
            }
        }

        ProjectSchemas {
            manifest,
            base_config,
            engine_configs,
        }
    }

    fn validate_entry(
        section: &EngineSection,
        loader: &DocumentLoader,
        problems: &mut Problems,
    ) -> Option<EngineVersionEntry> {
        let engine_ok = problems.check_engine_name(&section.engine);
        if !version_pattern().is_match(&section.version) {
            problems.push(format!(
                "version '{}' of engine '{}' must contain only alphanumerics, dots, hyphens and underscores",
                section.version, section.engine
            ));
            return None;
        }
        if !engine_ok {
            return None;
        }

        let label = format!("{} {}", section.engine, section.version);
        let mut components = BTreeMap::new();

        if let Some(directory) = &section.directory {
            for (name, locator) in discover_components(loader.root(), directory, &label, problems) {
                components.insert(name, locator);
            }
        }

        for (name, path) in &section.components {
            if !name_pattern().is_match(name) {
                problems.push(format!("{}: invalid component name '{}'", label, name));
                continue;
            }
            let what = format!("{} component '{}'", label, name);
            let locator = problems.existing_file(loader, &what, path);
            components.insert(name.clone(), locator);
        }

        if components.is_empty() {
            problems.push(format!("{} declares no component schemas", label));
            return None;
        }

        Some(EngineVersionEntry {
            engine: section.engine.clone(),
            version: section.version.clone(),
            components,
        })
    }
}

/// Schema files directly inside `directory`, named by file stem, in file name order
fn discover_components(
    root: &Path,
    directory: &str,
    label: &str,
    problems: &mut Problems,
) -> Vec<(String, Locator)> {
    let directory = match normalize_path(directory) {
        Ok(d) => d,
        Err(reason) => {
            problems.push(format!("{}: component directory {}", label, reason));
            return Vec::new();
        }
    };
    let full = root.join(&directory);
    if !full.is_dir() {
        problems.push(format!(
            "{}: component directory '{}' does not exist",
            label, directory
        ));
        return Vec::new();
    }

    let mut found: Vec<(String, Locator)> = Vec::new();
    for entry in WalkDir::new(&full)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() || !has_schema_extension(path) {
            continue;
        }
        let (Some(stem), Some(file_name)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.file_name().and_then(|s| s.to_str()),
        ) else {
            continue;
        };
        if !name_pattern().is_match(stem) {
            problems.push(format!("{}: invalid component file name '{}'", label, file_name));
            continue;
        }
        let locator = format!("{}/{}", directory, file_name);
        if let Some((_, first)) = found.iter().find(|(name, _)| name == stem) {
            problems.push(format!(
                "{}: component '{}' is provided by both '{}' and '{}'",
                label, stem, first, locator
            ));
            continue;
        }
        found.push((stem.to_string(), locator));
    }
    found
}

pub(crate) fn has_schema_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SCHEMA_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

/// Accumulates registry problems so they can be reported in one pass
struct Problems {
    locator: Locator,
    errors: Vec<SpecError>,
}

impl Problems {
    fn new(locator: &str) -> Self {
        Self {
            locator: locator.to_string(),
            errors: Vec::new(),
        }
    }

    fn push(&mut self, message: String) {
        self.errors.push(SpecError::Registry {
            locator: self.locator.clone(),
            message,
        });
    }

    fn check_engine_name(&mut self, engine: &str) -> bool {
        if !name_pattern().is_match(engine) {
            self.push(format!(
                "engine name '{}' must contain only alphanumerics, hyphens and underscores",
                engine
            ));
            return false;
        }
        if RESERVED_ENGINE_NAMES.contains(&engine.to_lowercase().as_str()) {
            self.push(format!("engine name '{}' is reserved", engine));
            return false;
        }
        true
    }

    /// Normalize `path` and record a problem unless it names an existing file
    fn existing_file(&mut self, loader: &DocumentLoader, what: &str, path: &str) -> Locator {
        match normalize_path(path) {
            Ok(locator) => {
                if !loader.exists(&locator) {
                    self.push(format!("{} file '{}' does not exist", what, locator));
                }
                locator
            }
            Err(reason) => {
                self.push(format!("{}: {}", what, reason));
                path.to_string()
            }
        }
    }

    fn finish(self) -> Result<(), BuildFailure> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(BuildFailure::new(self.errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn write(root: &Path, path: &str, value: serde_json::Value) {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, serde_json::to_string_pretty(&value).unwrap()).unwrap();
    }

    fn project_files(root: &Path) {
        write(root, "project/manifest.json", json!({ "type": "object" }));
        write(root, "config/base.json", json!({ "type": "object" }));
        write(root, "config/engines/postgresql.json", json!({ "$ref": "../base.json" }));
    }

    #[test]
    fn test_load_registry_with_directory_and_explicit_components() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        project_files(root);
        write(root, "engines/postgresql/15.0/table.json", json!({}));
        write(root, "engines/postgresql/15.0/column.json", json!({}));
        write(root, "shared/snapshot.json", json!({}));
        write(
            root,
            "registry.json",
            json!({
                "project": {
                    "manifest": "project/manifest.json",
                    "config": {
                        "base": "config/base.json",
                        "engines": { "postgresql": "config/engines/postgresql.json" }
                    }
                },
                "engines": [{
                    "engine": "PostgreSQL",
                    "version": "15.0",
                    "directory": "engines/postgresql/15.0",
                    "components": { "stored-snapshot": "shared/snapshot.json" }
                }]
            }),
        );

        let loader = DocumentLoader::new(root);
        let registry = Registry::load(&loader, "registry.json").unwrap();
        let entry = registry.get("postgresql", "15.0").unwrap();
        let names: Vec<&str> = entry.components.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["column", "stored-snapshot", "table"]);
        assert_eq!(entry.components["column"], "engines/postgresql/15.0/column.json");
        assert_eq!(entry.engine_key(), "postgresql");
        assert_eq!(registry.declared_locators().len(), 6);
    }

    #[test]
    fn test_registry_collects_all_problems() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        project_files(root);
        write(root, "engines/postgresql/15.0/table.json", json!({}));
        write(
            root,
            "registry.json",
            json!({
                "project": {
                    "manifest": "project/manifest.json",
                    "config": {
                        "base": "config/base.json",
                        "engines": { "postgresql": "config/engines/postgresql.json" }
                    }
                },
                "engines": [
                    { "engine": "postgresql", "version": "15.0",
                      "components": { "table": "engines/postgresql/15.0/table.json",
                                      "column": "engines/postgresql/15.0/column.json" } },
                    { "engine": "postgresql", "version": "15.0",
                      "components": { "table": "engines/postgresql/15.0/table.json" } },
                    { "engine": "base", "version": "1",
                      "components": { "table": "engines/postgresql/15.0/table.json" } },
                    { "engine": "mysql", "version": "8.0",
                      "components": { "table": "engines/postgresql/15.0/table.json" } }
                ]
            }),
        );

        let loader = DocumentLoader::new(root);
        let failure = Registry::load(&loader, "registry.json").unwrap_err();
        assert!(failure.errors.iter().all(|e| e.kind() == ErrorKind::Registry));

        let messages: Vec<String> = failure.errors.iter().map(|e| e.to_string()).collect();
        assert_eq!(messages.len(), 4, "{:#?}", messages);
        assert!(messages[0].contains("column.json' does not exist"));
        assert!(messages[1].contains("declared more than once"));
        assert!(messages[2].contains("reserved"));
        assert!(messages[3].contains("'mysql' has versions but no config schema"));
    }

    #[test]
    fn test_registry_rejects_invalid_names() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        project_files(root);
        write(root, "t.json", json!({}));
        write(
            root,
            "registry.json",
            json!({
                "project": {
                    "manifest": "project/manifest.json",
                    "config": { "base": "config/base.json",
                                "engines": { "postgresql": "config/engines/postgresql.json" } }
                },
                "engines": [
                    { "engine": "postgresql", "version": "15 0", "components": { "table": "t.json" } },
                    { "engine": "my sql", "version": "8.0", "components": { "table": "t.json" } }
                ]
            }),
        );
        let loader = DocumentLoader::new(root);
        let failure = Registry::load(&loader, "registry.json").unwrap_err();
        assert_eq!(failure.errors.len(), 2);
    }

    #[test]
    fn test_directory_files_sharing_a_stem_are_rejected() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        project_files(root);
        write(root, "engines/postgresql/15.0/table.json", json!({ "title": "JsonTable" }));
        fs::write(root.join("engines/postgresql/15.0/table.yaml"), "title: YamlTable\n").unwrap();
        write(root, "engines/postgresql/15.0/column.json", json!({}));
        write(
            root,
            "registry.json",
            json!({
                "project": {
                    "manifest": "project/manifest.json",
                    "config": { "base": "config/base.json",
                                "engines": { "postgresql": "config/engines/postgresql.json" } }
                },
                "engines": [{
                    "engine": "postgresql",
                    "version": "15.0",
                    "directory": "engines/postgresql/15.0"
                }]
            }),
        );

        let loader = DocumentLoader::new(root);
        let failure = Registry::load(&loader, "registry.json").unwrap_err();
        assert_eq!(failure.errors.len(), 1);
        assert_eq!(failure.errors[0].kind(), ErrorKind::Registry);
        let message = failure.errors[0].to_string();
        assert!(message.contains("component 'table' is provided by both"), "{}", message);
        assert!(message.contains("'engines/postgresql/15.0/table.json' and 'engines/postgresql/15.0/table.yaml'"));
    }

    #[test]
    fn test_malformed_registry() {
        let dir = tempdir().unwrap();
        write(dir.path(), "registry.json", json!({ "engines": [] }));
        let loader = DocumentLoader::new(dir.path());
        let failure = Registry::load(&loader, "registry.json").unwrap_err();
        assert!(failure.errors[0].to_string().contains("malformed registry"));
    }
}
