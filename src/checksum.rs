//! Checksum utilities for output reproducibility

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

pub const CHECKSUM_FILE: &str = "checksums.sha256";

/// SHA256 checksum of serialized output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute checksum from a string
    pub fn from_str(content: &str) -> Self {
        Self::from_bytes(content.as_bytes())
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify that content matches this checksum
    pub fn verify(&self, content: &str) -> bool {
        Self::from_str(content) == *self
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Render `sha256sum`-compatible lines: `<hex>  <path>`
pub fn render_checksums<'a>(entries: impl IntoIterator<Item = (&'a str, &'a Checksum)>) -> String {
    let mut out = String::new();
    for (path, checksum) in entries {
        out.push_str(checksum.as_str());
        out.push_str("  ");
        out.push_str(path);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_consistency() {
        let content = r#"{"$id": "https://x.test/manifest.json"}"#;
        assert_eq!(Checksum::from_str(content), Checksum::from_str(content));
        assert!(Checksum::from_str(content).verify(content));
    }

    #[test]
    fn test_checksum_different_content() {
        assert_ne!(Checksum::from_str("{}\n"), Checksum::from_str("{ }\n"));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            Checksum::from_str("").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_render_checksums() {
        let a = Checksum::from_str("a");
        let b = Checksum::from_str("b");
        let text = render_checksums([("manifest.json", &a), ("config/base.json", &b)]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], format!("{}  manifest.json", a));
        assert_eq!(lines[1], format!("{}  config/base.json", b));
        assert!(text.ends_with('\n'));
    }
}
