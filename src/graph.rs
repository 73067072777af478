//! File Dependency Graph
//!
//! A file-level view of the `$ref` structure reachable from the registry,
//! built on petgraph. Used for DOT export, mutual-dependency reporting and
//! finding source files nothing uses.

use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::Path;
use walkdir::WalkDir;

use crate::document::{DocumentLoader, Locator};
use crate::error::{BuildFailure, SpecError};
use crate::pointer::{join_locator, ReferencePointer};
use crate::registry::{has_schema_extension, Registry};
use crate::resolver::REF_KEY;

/// Files as nodes, one edge per distinct `$ref` target pointer
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<Locator, String>,
    nodes: HashMap<Locator, NodeIndex>,
}

impl DependencyGraph {
    /// Walk every file reachable from the registry, breadth-first
    pub fn build(registry: &Registry, loader: &DocumentLoader) -> Result<Self, BuildFailure> {
        let mut graph = Self::default();
        let mut errors = Vec::new();
        let mut queue: VecDeque<Locator> = VecDeque::new();

        for locator in registry.declared_locators() {
            if !graph.nodes.contains_key(locator) {
                graph.node(locator);
                queue.push_back(locator.to_string());
            }
        }

        while let Some(locator) = queue.pop_front() {
            let document = match loader.load(&locator) {
                Ok(document) => document,
                Err(e) => {
                    errors.push(SpecError::from(e));
                    continue;
                }
            };

            let mut targets = BTreeSet::new();
            collect_refs(document.tree(), &locator, &mut targets, &mut errors);

            let from = graph.node(&locator);
            for (target, pointer) in targets {
                let is_new = !graph.nodes.contains_key(&target);
                let to = graph.node(&target);
                graph.graph.add_edge(from, to, pointer);
                if is_new {
                    queue.push_back(target);
                }
            }
        }

        if errors.is_empty() {
            Ok(graph)
        } else {
            Err(BuildFailure::new(errors))
        }
    }

    fn node(&mut self, locator: &str) -> NodeIndex {
        if let Some(index) = self.nodes.get(locator) {
            return *index;
        }
        let index = self.graph.add_node(locator.to_string());
        self.nodes.insert(locator.to_string(), index);
        index
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, locator: &str) -> bool {
        self.nodes.contains_key(locator)
    }

    /// Files `locator` refers to directly, sorted
    pub fn dependencies(&self, locator: &str) -> Vec<&str> {
        let Some(index) = self.nodes.get(locator) else {
            return Vec::new();
        };
        let targets: BTreeSet<&str> = self
            .graph
            .edges(*index)
            .map(|edge| self.graph[edge.target()].as_str())
            .collect();
        targets.into_iter().collect()
    }

    /// Groups of files that refer to each other, each sorted.
    ///
    /// Mutual file dependencies are legal as long as the pointer-level
    /// chain does not loop; the resolver decides that.
    pub fn mutual_dependencies(&self) -> Vec<Vec<&str>> {
        let mut groups: Vec<Vec<&str>> = kosaraju_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || self
                        .graph
                        .edges(component[0])
                        .any(|edge| edge.target() == component[0])
            })
            .map(|component| {
                let mut files: Vec<&str> = component.iter().map(|i| self.graph[*i].as_str()).collect();
                files.sort_unstable();
                files
            })
            .collect();
        groups.sort();
        groups
    }

    /// Schema files under `root` that the registry never reaches, sorted
    pub fn orphaned_files(&self, root: &Path, registry_locator: &str) -> Vec<Locator> {
        let mut orphans: Vec<Locator> = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && has_schema_extension(e.path()))
            .filter_map(|e| {
                let relative = e.path().strip_prefix(root).ok()?;
                let parts: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect();
                Some(parts.join("/"))
            })
            .filter(|locator| locator != registry_locator && !self.nodes.contains_key(locator))
            .collect();
        orphans.sort();
        orphans
    }

    /// Export the file graph to GraphViz DOT format
    pub fn to_dot(&self) -> String {
        let mut output = String::new();

        output.push_str("digraph SchemaSources {\n");
        output.push_str("  rankdir=LR;\n");
        output.push_str("  node [shape=box, style=\"rounded\", fontname=\"Helvetica\", fontsize=10];\n");
        output.push_str("  edge [fontname=\"Helvetica\", fontsize=8, fontcolor=\"#808080\"];\n");
        output.push('\n');

        let mut nodes: Vec<&Locator> = self.nodes.keys().collect();
        nodes.sort();
        for locator in nodes {
            output.push_str(&format!("  \"{}\";\n", locator));
        }

        output.push('\n');

        let mut edges: Vec<(&str, &str, &str)> = self
            .graph
            .edge_references()
            .map(|edge| {
                (
                    self.graph[edge.source()].as_str(),
                    self.graph[edge.target()].as_str(),
                    edge.weight().as_str(),
                )
            })
            .collect();
        edges.sort();
        for (source, target, pointer) in edges {
            if pointer.is_empty() {
                output.push_str(&format!("  \"{}\" -> \"{}\";\n", source, target));
            } else {
                output.push_str(&format!(
                    "  \"{}\" -> \"{}\" [label=\"#{}\"];\n",
                    source, target, pointer
                ));
            }
        }

        output.push_str("}\n");
        output
    }
}

/// Cross-file `$ref` targets in `value` as `(locator, pointer)`
fn collect_refs(
    value: &Value,
    current: &str,
    targets: &mut BTreeSet<(Locator, String)>,
    errors: &mut Vec<SpecError>,
) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(raw)) = map.get(REF_KEY) {
                let parsed = ReferencePointer::parse(raw).and_then(|reference| {
                    reference
                        .target_file
                        .map(|file| join_locator(current, &file))
                        .transpose()
                        .map(|target| target.map(|t| (t, reference.pointer.to_string())))
                });
                match parsed {
                    Ok(Some(target)) if target.0 != current => {
                        targets.insert(target);
                    }
                    Ok(_) => {}
                    Err(message) => errors.push(SpecError::Reference {
                        locator: current.to_string(),
                        pointer: raw.clone(),
                        message,
                    }),
                }
            }
            for child in map.values() {
                collect_refs(child, current, targets, errors);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_refs(item, current, targets, errors);
            }
        }
        _ => {}
    }
}
