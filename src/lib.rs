//! Schema Spec Builder
//!
//! Assembles modular JSON Schema sources (a project manifest, a base config
//! schema, per-engine config schemas and per-engine-version component
//! schemas) into self-contained output documents, each with a stable `$id`,
//! plus a discovery map (`smap.json`) indexing them all by URL.
//!
//! ## Features
//!
//! - **Reference Inlining**: every `$ref` is resolved across files and JSON
//!   pointers, with cycle detection and sibling-key overrides
//! - **Engine Variants**: `oneOf` groups conditioned on engine or version
//!   collapse to the branch for the variant being built
//! - **Variant Checks**: `oneOf` branches must be concrete schema objects
//! - **Stable Identity**: `$id` derived from a base URL and the output path
//! - **Reproducible Output**: byte-identical output and SHA256 checksums
//!
//! ## Layout
//!
//! ```text
//! output/
//! ├── manifest.json
//! ├── config/
//! │   ├── base.json
//! │   └── postgresql.json
//! ├── postgresql/
//! │   └── 15.0/
//! │       ├── table.json
//! │       ├── column.json
//! │       └── constraint.json
//! ├── smap.json
//! └── checksums.sha256
//! ```

pub mod assembler;
pub mod checksum;
pub mod conditional;
pub mod config;
pub mod document;
pub mod error;
pub mod flatten;
pub mod graph;
pub mod identity;
pub mod pipeline;
pub mod pointer;
pub mod registry;
pub mod resolver;
pub mod smap;
pub mod validate;
pub mod writer;

pub use assembler::{assemble, AssembleOptions, AssembledFile};
pub use checksum::Checksum;
pub use conditional::{select_variant, Variant};
pub use config::{BuildConfig, OutputFormat};
pub use document::{DocumentLoader, Locator, SchemaDocument};
pub use error::{BuildFailure, Diagnostic, ErrorKind, LoadError, Result, SpecError};
pub use flatten::flatten;
pub use graph::DependencyGraph;
pub use identity::{assign_ids, LogicalPath, ResolvedOutputDocument};
pub use pipeline::{build, build_and_write, check, BuildOutput};
pub use pointer::{JsonPointer, ReferencePointer};
pub use registry::{EngineVersionEntry, Registry};
pub use resolver::{resolve, ResolutionContext, Resolver};
pub use smap::{build_map, SchemaMap};
pub use writer::{Drift, OutputWriter};
