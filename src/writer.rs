//! Output Writer
//!
//! Writes an assembled output set under the output root. Files are staged
//! first and only moved into place once every one of them was written.
//! Also compares an assembled set with what is on disk (drift).

use similar::TextDiff;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::assembler::AssembledFile;
use crate::error::{Result, SpecError};

/// Staging directory created inside the output root during a write
pub const STAGING_DIR: &str = ".schema-spec-staging";

/// Writes assembled files below a root directory
#[derive(Debug, Clone)]
pub struct OutputWriter {
    root: PathBuf,
}

impl OutputWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stage every file, then move them into place
    pub fn write_all(&self, files: &[AssembledFile]) -> Result<()> {
        let stage = self.root.join(STAGING_DIR);
        if stage.exists() {
            fs::remove_dir_all(&stage).map_err(|e| SpecError::io(&stage, e))?;
        }

        let result = self.stage(&stage, files).and_then(|_| self.publish(&stage, files));
        if stage.exists() {
            if let Err(e) = fs::remove_dir_all(&stage) {
                debug!(path = %stage.display(), error = %e, "could not remove staging directory");
            }
        }
        result?;

        info!(root = %self.root.display(), files = files.len(), "output written");
        Ok(())
    }

    fn stage(&self, stage: &Path, files: &[AssembledFile]) -> Result<()> {
        for file in files {
            let path = stage.join(&file.path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| SpecError::io(parent, e))?;
            }
            fs::write(&path, &file.contents).map_err(|e| SpecError::io(&path, e))?;
        }
        Ok(())
    }

    fn publish(&self, stage: &Path, files: &[AssembledFile]) -> Result<()> {
        for file in files {
            let from = stage.join(&file.path);
            let to = self.root.join(&file.path);
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).map_err(|e| SpecError::io(parent, e))?;
            }
            fs::rename(&from, &to).map_err(|e| SpecError::io(&to, e))?;
            debug!(path = %file.path, checksum = %file.checksum, "document written");
        }
        Ok(())
    }

    /// Compare `files` with the current contents of the output root
    pub fn check_drift(&self, files: &[AssembledFile]) -> Result<Vec<Drift>> {
        let mut drift = Vec::new();

        for file in files {
            let path = self.root.join(&file.path);
            match fs::read_to_string(&path) {
                Ok(current) => {
                    if !file.checksum.verify(&current) {
                        let diff = TextDiff::from_lines(current.as_str(), file.contents.as_str())
                            .unified_diff()
                            .context_radius(3)
                            .header(&format!("a/{}", file.path), &format!("b/{}", file.path))
                            .to_string();
                        drift.push(Drift::Changed {
                            path: file.path.clone(),
                            diff,
                        });
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    drift.push(Drift::Missing {
                        path: file.path.clone(),
                    });
                }
                Err(e) => return Err(SpecError::io(path, e)),
            }
        }

        let expected: HashSet<&str> = files.iter().map(|f| f.path.as_str()).collect();
        if self.root.is_dir() {
            for entry in WalkDir::new(&self.root)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| e.file_name() != STAGING_DIR)
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                    continue;
                };
                let relative: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect();
                let relative = relative.join("/");
                if !expected.contains(relative.as_str()) {
                    drift.push(Drift::Unexpected { path: relative });
                }
            }
        }

        Ok(drift)
    }
}

/// One difference between an assembled set and the output root
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    /// Would be written but is not on disk
    Missing { path: String },
    /// On disk with different contents; `diff` is unified, disk to build
    Changed { path: String, diff: String },
    /// On disk but not produced by the build
    Unexpected { path: String },
}

impl Drift {
    pub fn path(&self) -> &str {
        match self {
            Self::Missing { path } | Self::Changed { path, .. } | Self::Unexpected { path } => path,
        }
    }
}

impl std::fmt::Display for Drift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing { path } => write!(f, "missing: {}", path),
            Self::Changed { path, diff } => write!(f, "changed: {}\n{}", path, diff),
            Self::Unexpected { path } => write!(f, "unexpected: {}", path),
        }
    }
}
