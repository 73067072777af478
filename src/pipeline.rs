//! Build Pipeline
//!
//! One build run: registry, then per document resolve, select the engine
//! variant (components only), flatten, identify and validate, then the schema map and the assembled output set.
//! Per-document failures do not stop sibling documents; every error is
//! returned together.

use std::thread;
use tracing::{debug, info};

use crate::assembler::{assemble, AssembleOptions, AssembledFile};
use crate::conditional::{select_variant, Variant};
use crate::config::BuildConfig;
use crate::document::{DocumentLoader, Locator};
use crate::error::{BuildFailure, SpecError};
use crate::flatten::flatten;
use crate::graph::DependencyGraph;
use crate::identity::{assign_ids, LogicalPath, ResolvedOutputDocument};
use crate::registry::{EngineVersionEntry, Registry};
use crate::resolver::{ResolutionContext, Resolver};
use crate::smap::{build_map, SchemaMap};
use crate::validate::validate_output;
use crate::writer::{Drift, OutputWriter};

/// Everything a successful build produced, in memory
#[derive(Debug)]
pub struct BuildOutput {
    pub documents: Vec<ResolvedOutputDocument>,
    pub map: SchemaMap,
    pub files: Vec<AssembledFile>,
}

impl BuildOutput {
    pub fn file(&self, path: &str) -> Option<&AssembledFile> {
        self.files.iter().find(|f| f.path == path)
    }
}

/// Documents built so far plus the errors hit along the way
type Batch = (Vec<ResolvedOutputDocument>, Vec<SpecError>);

/// Build every document in memory without touching the output root
pub fn build(config: &BuildConfig) -> Result<BuildOutput, BuildFailure> {
    let base_url = config.base_url()?;
    let loader = DocumentLoader::new(config.input_root());
    let registry = Registry::load(&loader, config.registry_locator())?;
    info!(
        input = %config.input_root().display(),
        engines = registry.entries().len(),
        "registry loaded"
    );

    let builder = DocumentBuilder {
        loader: &loader,
        config,
        base_url: &base_url,
    };

    let (mut documents, mut errors) = builder.build_project(&registry);

    let batches: Vec<Batch> = if config.build.parallel {
        let builder = &builder;
        thread::scope(|scope| {
            let handles: Vec<_> = registry
                .entries()
                .iter()
                .map(|entry| (entry, scope.spawn(move || builder.build_entry(entry))))
                .collect();
            handles
                .into_iter()
                .map(|(entry, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        (
                            Vec::new(),
                            vec![SpecError::Internal(format!("build of {} panicked", entry))],
                        )
                    })
                })
                .collect()
        })
    } else {
        registry
            .entries()
            .iter()
            .map(|entry| builder.build_entry(entry))
            .collect()
    };

    for (built, failed) in batches {
        documents.extend(built);
        errors.extend(failed);
    }

    if !errors.is_empty() {
        return Err(BuildFailure::new(errors));
    }

    let map = build_map(&documents)?;
    let options = AssembleOptions {
        format: config.output.format,
        checksums: config.output.checksums,
    };
    let files = assemble(&documents, &map, &options)?;

    report_orphans(&registry, &loader);
    info!(documents = documents.len(), files = files.len(), "build complete");

    Ok(BuildOutput {
        documents,
        map,
        files,
    })
}

/// Build, then write the output set under the configured output root
pub fn build_and_write(config: &BuildConfig) -> Result<BuildOutput, BuildFailure> {
    let output = build(config)?;
    OutputWriter::new(config.output_root()).write_all(&output.files)?;
    Ok(output)
}

/// Build in memory and compare with the configured output root
pub fn check(config: &BuildConfig) -> Result<Vec<Drift>, BuildFailure> {
    let output = build(config)?;
    let drift = OutputWriter::new(config.output_root()).check_drift(&output.files)?;
    Ok(drift)
}

fn report_orphans(registry: &Registry, loader: &DocumentLoader) {
    match DependencyGraph::build(registry, loader) {
        Ok(graph) => {
            for orphan in graph.orphaned_files(loader.root(), registry.locator()) {
                debug!(file = %orphan, "schema file is not reachable from the registry");
            }
        }
        Err(failure) => debug!(errors = failure.errors.len(), "dependency graph unavailable"),
    }
}

/// Per-run settings shared by every document build
struct DocumentBuilder<'a> {
    loader: &'a DocumentLoader,
    config: &'a BuildConfig,
    base_url: &'a str,
}

impl DocumentBuilder<'_> {
    fn build_project(&self, registry: &Registry) -> Batch {
        let project = registry.project();
        let mut sources: Vec<(LogicalPath, &Locator)> = vec![
            (LogicalPath::Manifest, &project.manifest),
            (LogicalPath::BaseConfig, &project.base_config),
        ];
        for (engine, locator) in &project.engine_configs {
            sources.push((LogicalPath::engine_config(engine), locator));
        }

        let mut context = ResolutionContext::new(self.config.build.max_ref_depth);
        let batch = self.build_all(sources, None, &mut context);
        debug!(
            cross_file_refs = context.edges().count(),
            "project schemas resolved"
        );
        batch
    }

    fn build_entry(&self, entry: &EngineVersionEntry) -> Batch {
        info!(engine = %entry.engine, version = %entry.version, "building engine version");
        let sources: Vec<(LogicalPath, &Locator)> = entry
            .components
            .iter()
            .map(|(component, locator)| {
                (
                    LogicalPath::component(&entry.engine, &entry.version, component),
                    locator,
                )
            })
            .collect();

        let mut context = ResolutionContext::new(self.config.build.max_ref_depth);
        self.build_all(sources, Some(entry.variant()), &mut context)
    }

    fn build_all(
        &self,
        sources: Vec<(LogicalPath, &Locator)>,
        variant: Option<Variant<'_>>,
        context: &mut ResolutionContext,
    ) -> Batch {
        let mut documents = Vec::with_capacity(sources.len());
        let mut errors = Vec::new();
        for (logical_path, locator) in sources {
            match self.build_one(locator, logical_path, variant, context) {
                Ok(document) => documents.push(document),
                Err(failure) => errors.extend(failure.errors),
            }
        }
        (documents, errors)
    }

    fn build_one(
        &self,
        locator: &str,
        logical_path: LogicalPath,
        variant: Option<Variant<'_>>,
        context: &mut ResolutionContext,
    ) -> Result<ResolvedOutputDocument, BuildFailure> {
        let source = self.loader.load(locator).map_err(SpecError::from)?;
        let mut resolved = Resolver::new(self.loader).resolve_document(&source, context)?;
        if let Some(variant) = variant {
            resolved = select_variant(&resolved, variant)?;
        }
        let flattened = flatten(&resolved)?;
        let output = assign_ids(&flattened, logical_path, self.base_url)?;
        validate_output(&output, &self.config.validation)?;
        debug!(document = %output.logical_path, source = locator, "document built");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::{json, Value};
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn write(root: &Path, path: &str, value: Value) {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, serde_json::to_string_pretty(&value).unwrap()).unwrap();
    }

    fn config(root: &Path) -> BuildConfig {
        let mut config = BuildConfig {
            base_url: Some("https://x.test/schemas".to_string()),
            ..BuildConfig::default()
        };
        config.paths.input_root = root.join("docs");
        config.paths.output_root = root.join("output");
        config
    }

    fn minimal_tree(root: &Path) {
        let docs = root.join("docs");
        write(&docs, "project/manifest.json", json!({ "title": "Manifest", "type": "object" }));
        write(&docs, "config/base.json", json!({ "title": "Base", "type": "object" }));
        write(&docs, "config/engines/sqlite.json", json!({ "allOf": [{ "$ref": "../base.json" }] }));
        write(&docs, "engines/sqlite/3/table.json", json!({ "title": "Table", "type": "object" }));
        write(
            &docs,
            "registry.json",
            json!({
                "project": {
                    "manifest": "project/manifest.json",
                    "config": { "base": "config/base.json", "engines": { "sqlite": "config/engines/sqlite.json" } }
                },
                "engines": [{ "engine": "sqlite", "version": "3", "directory": "engines/sqlite/3" }]
            }),
        );
    }

    #[test]
    fn test_build_in_memory() {
        let dir = tempdir().unwrap();
        minimal_tree(dir.path());
        let output = build(&config(dir.path())).unwrap();

        assert_eq!(output.documents.len(), 4);
        assert_eq!(
            output.map.component_url("sqlite", "3", "table"),
            Some("https://x.test/schemas/sqlite/3/table.json")
        );
        assert!(output.file("smap.json").is_some());
        assert!(!dir.path().join("output").exists());
    }

    #[test]
    fn test_missing_base_url_fails_before_loading() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path());
        config.base_url = None;
        let failure = build(&config).unwrap_err();
        assert_eq!(failure.errors.len(), 1);
        assert_eq!(failure.errors[0].kind(), ErrorKind::Config);
    }

    #[test]
    fn test_errors_from_sibling_documents_are_all_reported() {
        let dir = tempdir().unwrap();
        minimal_tree(dir.path());
        let docs = dir.path().join("docs");
        write(&docs, "config/base.json", json!({ "items": { "$ref": "#/$defs/missing" } }));
        write(&docs, "engines/sqlite/3/index.json", json!({ "oneOf": [true] }));

        let failure = build(&config(dir.path())).unwrap_err();
        let kinds: Vec<ErrorKind> = failure.errors.iter().map(|e| e.kind()).collect();
        // base config directly and again through the sqlite config
        assert_eq!(
            kinds,
            vec![ErrorKind::Reference, ErrorKind::Reference, ErrorKind::InvalidVariant]
        );
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let dir = tempdir().unwrap();
        minimal_tree(dir.path());
        let docs = dir.path().join("docs");
        write(&docs, "config/engines/mysql.json", json!({ "title": "MySQL", "type": "object" }));
        write(&docs, "engines/mysql/8.0/table.json", json!({ "title": "Table", "type": "object" }));
        write(
            &docs,
            "registry.json",
            json!({
                "project": {
                    "manifest": "project/manifest.json",
                    "config": { "base": "config/base.json",
                                "engines": { "sqlite": "config/engines/sqlite.json", "mysql": "config/engines/mysql.json" } }
                },
                "engines": [
                    { "engine": "sqlite", "version": "3", "directory": "engines/sqlite/3" },
                    { "engine": "mysql", "version": "8.0", "directory": "engines/mysql/8.0" }
                ]
            }),
        );

        let sequential = build(&config(dir.path())).unwrap();
        let mut parallel_config = config(dir.path());
        parallel_config.build.parallel = true;
        let parallel = build(&parallel_config).unwrap();
        assert_eq!(sequential.files, parallel.files);
    }

    #[test]
    fn test_check_reports_drift() {
        let dir = tempdir().unwrap();
        minimal_tree(dir.path());
        let config = config(dir.path());

        build_and_write(&config).unwrap();
        assert!(check(&config).unwrap().is_empty());

        fs::write(dir.path().join("output/manifest.json"), "{}\n").unwrap();
        let drift = check(&config).unwrap();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].path(), "manifest.json");
    }
}
