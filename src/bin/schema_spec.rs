//! Schema Spec CLI
//!
//! Builds the self-contained schema set, checks an existing output directory
//! for drift, and exports the source dependency graph.
//!
//! Usage:
//!   schema-spec build --input docs --output output --base-url https://schemas.example.com/v1
//!   schema-spec check --input docs --output output
//!   schema-spec graph --output sources.dot
//!   schema-spec init-config

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use schema_spec::{
    build_and_write, check, BuildConfig, BuildFailure, DependencyGraph, DocumentLoader, Registry,
    SpecError,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schema-spec")]
#[command(about = "Assemble self-contained JSON Schema specifications per engine and version")]
struct Cli {
    /// Explicit config file, layered over the default locations
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging (debug level unless RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every document and write the output set
    Build(BuildArgs),

    /// Build in memory and compare with the output directory
    Check(BuildArgs),

    /// Export the file-level $ref graph as GraphViz DOT
    Graph {
        /// Input root (overrides paths.input_root)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write the default configuration as TOML
    InitConfig {
        #[arg(default_value = "schema-spec.toml")]
        path: PathBuf,
    },
}

#[derive(Args)]
struct BuildArgs {
    /// Input root (overrides paths.input_root)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output root (overrides paths.output_root)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Base URL for every $id (overrides BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Report format
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
    format: ReportFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli) {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let config_path = cli.config.as_deref().map(|p| p.to_string_lossy().to_string());

    match cli.command {
        Commands::Build(args) => {
            let config = match load_config(config_path.as_deref(), &args) {
                Ok(config) => config,
                Err(failure) => return Ok(report_failure(&failure, args.format)),
            };
            match build_and_write(&config) {
                Ok(output) => {
                    match args.format {
                        ReportFormat::Text => {
                            println!(
                                "✅ Built {} documents into {}",
                                output.documents.len(),
                                config.output_root().display()
                            );
                            for file in &output.files {
                                println!("   {}", file.path);
                            }
                        }
                        ReportFormat::Json => {
                            let files: Vec<_> = output
                                .files
                                .iter()
                                .map(|f| serde_json::json!({ "path": f.path, "sha256": f.checksum }))
                                .collect();
                            let report = serde_json::json!({ "status": "ok", "files": files });
                            println!("{}", serde_json::to_string_pretty(&report)?);
                        }
                    }
                    Ok(0)
                }
                Err(failure) => Ok(report_failure(&failure, args.format)),
            }
        }

        Commands::Check(args) => {
            let config = match load_config(config_path.as_deref(), &args) {
                Ok(config) => config,
                Err(failure) => return Ok(report_failure(&failure, args.format)),
            };
            let drift = match check(&config) {
                Ok(drift) => drift,
                Err(failure) => return Ok(report_failure(&failure, args.format)),
            };

            match args.format {
                ReportFormat::Text => {
                    if drift.is_empty() {
                        println!("✅ {} is up to date", config.output_root().display());
                    } else {
                        println!("❌ {} file(s) drifted:", drift.len());
                        for item in &drift {
                            println!("{}", item);
                        }
                    }
                }
                ReportFormat::Json => {
                    let items: Vec<_> = drift
                        .iter()
                        .map(|d| serde_json::json!({ "path": d.path(), "detail": d.to_string() }))
                        .collect();
                    let status = if drift.is_empty() { "ok" } else { "drift" };
                    let report = serde_json::json!({ "status": status, "drift": items });
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
            Ok(if drift.is_empty() { 0 } else { 1 })
        }

        Commands::Graph { input, output } => {
            let mut config = BuildConfig::load_from(config_path.as_deref())
                .context("Failed to load configuration")?;
            if let Some(input) = input {
                config.paths.input_root = input;
            }

            let loader = DocumentLoader::new(config.input_root());
            let graph = Registry::load(&loader, config.registry_locator())
                .and_then(|registry| DependencyGraph::build(&registry, &loader));
            let graph = match graph {
                Ok(graph) => graph,
                Err(failure) => return Ok(report_failure(&failure, ReportFormat::Text)),
            };

            eprintln!(
                "Graph loaded: {} files, {} references",
                graph.node_count(),
                graph.edge_count()
            );
            for group in graph.mutual_dependencies() {
                eprintln!("   mutually dependent: {}", group.join(", "));
            }

            let dot = graph.to_dot();
            match output {
                Some(path) => {
                    std::fs::write(&path, &dot)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    eprintln!("✅ Exported DOT to: {}", path.display());
                }
                None => print!("{}", dot),
            }
            Ok(0)
        }

        Commands::InitConfig { path } => {
            if path.exists() {
                anyhow::bail!("{} already exists", path.display());
            }
            BuildConfig::default()
                .save(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✅ Wrote default configuration to {}", path.display());
            Ok(0)
        }
    }
}

/// Layered configuration with command-line overrides on top
fn load_config(config_path: Option<&str>, args: &BuildArgs) -> Result<BuildConfig, BuildFailure> {
    let mut config = BuildConfig::load_from(config_path).map_err(|e| SpecError::Config {
        variable: config_path.unwrap_or("schema-spec.toml").to_string(),
        message: e.to_string(),
    })?;

    if let Some(input) = &args.input {
        config.paths.input_root = input.clone();
    }
    if let Some(output) = &args.output {
        config.paths.output_root = output.clone();
    }
    if let Some(base_url) = &args.base_url {
        config.base_url = Some(base_url.clone());
    }
    Ok(config)
}

/// Print every diagnostic and return the exit code of the first one
fn report_failure(failure: &BuildFailure, format: ReportFormat) -> i32 {
    let code = failure.exit_code();
    match format {
        ReportFormat::Text => {
            eprintln!("❌ Build failed with {} error(s):", failure.errors.len());
            for diagnostic in failure.diagnostics() {
                eprintln!("   {}", diagnostic);
            }
        }
        ReportFormat::Json => {
            let report = serde_json::json!({
                "status": "failed",
                "exit_code": code,
                "errors": failure.diagnostics(),
            });
            match serde_json::to_string_pretty(&report) {
                Ok(text) => println!("{}", text),
                Err(e) => eprintln!("❌ Error: {}", e),
            }
        }
    }
    code
}
