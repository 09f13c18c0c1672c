//! Identifier types shared by every capsa crate.
//!
//! Both types serialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use thiserror::Error;

/// Name given on the command line when the entry point should be inferred.
pub const NAME_PLACEHOLDER: &str = "-";

const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("package name must be 1-{MAX_NAME_LEN} characters")]
    Length,
    #[error("package name '{0}' must match [A-Za-z0-9._+-]")]
    Charset(String),
    #[error("package name '{0}' must not start with '.' or '-'")]
    LeadingChar(String),
}

/// A validated package name.
///
/// The name doubles as the command name, the store directory name, and the
/// global symlink name, so it has to be a single safe path segment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageName(String);

impl PackageName {
    pub fn parse(s: impl Into<String>) -> Result<Self, NameError> {
        let s = s.into();
        if s.is_empty() || s.len() > MAX_NAME_LEN {
            return Err(NameError::Length);
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'+' | b'-'))
        {
            return Err(NameError::Charset(s));
        }
        if s.starts_with('.') || s.starts_with('-') {
            return Err(NameError::LeadingChar(s));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PackageName {
    type Error = NameError;
    fn try_from(s: String) -> Result<Self, NameError> {
        Self::parse(s)
    }
}

impl From<PackageName> for String {
    fn from(n: PackageName) -> Self {
        n.0
    }
}

impl std::str::FromStr for PackageName {
    type Err = NameError;
    fn from_str(s: &str) -> Result<Self, NameError> {
        Self::parse(s)
    }
}

impl Deref for PackageName {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<std::path::Path> for PackageName {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

impl PartialEq<str> for PackageName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for PackageName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Opaque snapshot identifier handed out by the build engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for SnapshotId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SnapshotId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SnapshotId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for SnapshotId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_command_like_names() {
        for name in ["xeyes", "g++", "python3.12", "7z", "node_modules-bin"] {
            assert!(PackageName::parse(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn rejects_path_like_names() {
        assert_eq!(PackageName::parse(""), Err(NameError::Length));
        assert!(matches!(
            PackageName::parse("a/b"),
            Err(NameError::Charset(_))
        ));
        assert!(matches!(
            PackageName::parse(".."),
            Err(NameError::LeadingChar(_))
        ));
        assert!(matches!(
            PackageName::parse(NAME_PLACEHOLDER),
            Err(NameError::LeadingChar(_))
        ));
        assert_eq!(PackageName::parse("a".repeat(65)), Err(NameError::Length));
    }

    #[test]
    fn package_name_serde_is_validated() {
        let json = serde_json::to_string(&PackageName::parse("xeyes").unwrap()).unwrap();
        assert_eq!(json, "\"xeyes\"");
        assert!(serde_json::from_str::<PackageName>("\"../etc\"").is_err());
    }

    #[test]
    fn snapshot_id_display() {
        let id = SnapshotId::from("42");
        assert_eq!(id.to_string(), "42");
        assert_eq!(id.as_str(), "42");
    }
}
