//! Error types for the schema spec builder

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for build operations
pub type Result<T> = std::result::Result<T, SpecError>;

/// A source file that is missing or does not parse.
///
/// Cloneable so the loader can cache failures alongside successes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to load {locator}: {reason}")]
pub struct LoadError {
    pub locator: String,
    pub reason: String,
}

impl LoadError {
    pub fn new(locator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            reason: reason.into(),
        }
    }
}

/// Build errors
#[derive(Error, Debug)]
pub enum SpecError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Registry error in {locator}: {message}")]
    Registry { locator: String, message: String },

    #[error("Cannot resolve '{pointer}' from {locator}: {message}")]
    Reference {
        locator: String,
        pointer: String,
        message: String,
    },

    #[error("Circular reference detected: {}", .chain.join(" -> "))]
    CircularReference { chain: Vec<String> },

    #[error("Invalid oneOf variant at {locator}#{path}: {message}")]
    InvalidVariant {
        locator: String,
        path: String,
        message: String,
    },

    #[error("Generated schema {logical_path} is not a valid JSON Schema: {message}")]
    Validation { logical_path: String, message: String },

    #[error("Configuration variable '{variable}' is missing or invalid: {message}")]
    Config { variable: String, message: String },

    #[error("Internal invariant violated: {0}")]
    Internal(String),

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Coarse error category, stable for machine-readable reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Load,
    Registry,
    Reference,
    CircularReference,
    InvalidVariant,
    Validation,
    Config,
    Internal,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Registry => "registry",
            Self::Reference => "reference",
            Self::CircularReference => "circular_reference",
            Self::InvalidVariant => "invalid_variant",
            Self::Validation => "validation",
            Self::Config => "config",
            Self::Internal => "internal",
            Self::Io => "io",
        }
    }

    /// Process exit code reported by the CLI for this kind of failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Load => 1,
            Self::Registry | Self::Reference | Self::InvalidVariant | Self::Config => 2,
            Self::CircularReference => 3,
            Self::Validation => 4,
            Self::Internal | Self::Io => 5,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl SpecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Load(_) => ErrorKind::Load,
            Self::Registry { .. } => ErrorKind::Registry,
            Self::Reference { .. } => ErrorKind::Reference,
            Self::CircularReference { .. } => ErrorKind::CircularReference,
            Self::InvalidVariant { .. } => ErrorKind::InvalidVariant,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Config { .. } => ErrorKind::Config,
            Self::Internal(_) => ErrorKind::Internal,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    /// The source or output location the error is about, if any
    pub fn locator(&self) -> Option<String> {
        match self {
            Self::Load(e) => Some(e.locator.clone()),
            Self::Registry { locator, .. }
            | Self::Reference { locator, .. }
            | Self::InvalidVariant { locator, .. } => Some(locator.clone()),
            Self::CircularReference { chain } => chain.first().cloned(),
            Self::Validation { logical_path, .. } => Some(logical_path.clone()),
            Self::Io { path, .. } => Some(path.display().to_string()),
            Self::Config { .. } | Self::Internal(_) => None,
        }
    }

    pub fn diagnostic(&self) -> Diagnostic {
        Diagnostic {
            kind: self.kind(),
            locator: self.locator(),
            message: self.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Machine-readable form of a single error
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Every error encountered by a failed build, in encounter order
#[derive(Debug)]
pub struct BuildFailure {
    pub errors: Vec<SpecError>,
}

impl BuildFailure {
    pub fn new(errors: Vec<SpecError>) -> Self {
        Self { errors }
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.errors.iter().map(SpecError::diagnostic).collect()
    }

    /// Exit code of the first error (the one the user should fix first)
    pub fn exit_code(&self) -> i32 {
        self.errors
            .first()
            .map(|e| e.kind().exit_code())
            .unwrap_or(ErrorKind::Internal.exit_code())
    }

    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind() == kind)
    }
}

impl fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "build failed with {} error(s)", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n  - {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for BuildFailure {}

impl From<SpecError> for BuildFailure {
    fn from(error: SpecError) -> Self {
        Self::new(vec![error])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circular_chain_display() {
        let err = SpecError::CircularReference {
            chain: vec!["a.json#".into(), "b.json#".into(), "a.json#".into()],
        };
        assert_eq!(
            err.to_string(),
            "Circular reference detected: a.json# -> b.json# -> a.json#"
        );
        assert_eq!(err.kind().exit_code(), 3);
        assert_eq!(err.locator().as_deref(), Some("a.json#"));
    }

    #[test]
    fn test_diagnostic_serializes_kind_in_snake_case() {
        let err = SpecError::from(LoadError::new("engines/pg/15.0/column.json", "not found"));
        let json = serde_json::to_value(err.diagnostic()).unwrap();
        assert_eq!(json["kind"], "load");
        assert_eq!(json["locator"], "engines/pg/15.0/column.json");
    }

    #[test]
    fn test_failure_exit_code_follows_first_error() {
        let failure = BuildFailure::new(vec![
            SpecError::Internal("boom".into()),
            SpecError::from(LoadError::new("x.json", "missing")),
        ]);
        assert_eq!(failure.exit_code(), 5);
        assert!(failure.has_kind(ErrorKind::Load));
        assert!(failure.to_string().contains("2 error(s)"));
    }
}
