//! Text format of a frozen package set.
//!
//! One shell-parseable line per package:
//!
//! ```text
//! capsa install xeyes --from alpine:3.20 --apk xeyes
//! ```
//!
//! Replaying the file re-runs each install in order.

use crate::recipe::{Recipe, RecipeError};
use crate::types::{NameError, PackageName};
use std::fmt::Write as _;
use std::path::Path;
use thiserror::Error;

/// Canonical install invocation every freeze line must start with.
pub const INSTALL_PREFIX: &[&str] = &["capsa", "install"];

#[derive(Debug, Error)]
pub enum FreezeError {
    #[error("failed to read freeze file: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: unbalanced quoting")]
    Unbalanced { line: usize },
    #[error("line {line}: expected '{}', found '{found}'", INSTALL_PREFIX.join(" "))]
    BadPrefix { line: usize, found: String },
    #[error("line {line}: missing package name")]
    MissingName { line: usize },
    #[error("line {line}: {source}")]
    InvalidName {
        line: usize,
        #[source]
        source: NameError,
    },
    #[error("line {line}: {source}")]
    InvalidRecipe {
        line: usize,
        #[source]
        source: RecipeError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreezeEntry {
    pub name: PackageName,
    pub recipe: Recipe,
}

impl FreezeEntry {
    pub fn to_line(&self) -> Result<String, RecipeError> {
        let mut line = INSTALL_PREFIX.join(" ");
        let _ = write!(line, " {} {}", self.name, self.recipe.render()?);
        Ok(line)
    }
}

/// An ordered list of (name, recipe) pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreezeRecord {
    pub entries: Vec<FreezeEntry>,
}

impl FreezeRecord {
    pub fn to_text(&self) -> Result<String, RecipeError> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.to_line()?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Parse a freeze file. Blank lines and `#` comments are skipped; any
    /// other line that is not an install invocation fails the whole parse.
    pub fn parse_str(input: &str) -> Result<Self, FreezeError> {
        let mut entries = Vec::new();
        for (idx, raw) in input.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let words = shlex::split(trimmed).ok_or(FreezeError::Unbalanced { line })?;

            let prefix_len = INSTALL_PREFIX.len();
            if words.len() < prefix_len
                || words[..prefix_len]
                    .iter()
                    .zip(INSTALL_PREFIX)
                    .any(|(w, p)| w.as_str() != *p)
            {
                return Err(FreezeError::BadPrefix {
                    line,
                    found: words
                        .iter()
                        .take(prefix_len)
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(" "),
                });
            }

            let mut rest = words.into_iter().skip(prefix_len);
            let name = rest.next().ok_or(FreezeError::MissingName { line })?;
            let name =
                PackageName::parse(name).map_err(|source| FreezeError::InvalidName { line, source })?;
            let recipe = Recipe::new(rest.collect())
                .map_err(|source| FreezeError::InvalidRecipe { line, source })?;
            entries.push(FreezeEntry { name, recipe });
        }
        Ok(Self { entries })
    }

    pub fn parse_file(path: &Path) -> Result<Self, FreezeError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, tokens: &[&str]) -> FreezeEntry {
        FreezeEntry {
            name: PackageName::parse(name).unwrap(),
            recipe: Recipe::new(tokens.iter().map(|s| (*s).to_owned()).collect()).unwrap(),
        }
    }

    #[test]
    fn line_format() {
        let e = entry("xeyes", &["--apk", "xeyes"]);
        assert_eq!(e.to_line().unwrap(), "capsa install xeyes --apk xeyes");
    }

    #[test]
    fn text_reparses_to_same_record() {
        let record = FreezeRecord {
            entries: vec![
                entry("xeyes", &["--apk", "xeyes"]),
                entry("rg", &["--run", "cargo install ripgrep", "--layer"]),
            ],
        };
        let text = record.to_text().unwrap();
        assert_eq!(FreezeRecord::parse_str(&text).unwrap(), record);
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        let record =
            FreezeRecord::parse_str("# frozen\n\ncapsa install xeyes --apk xeyes\n   \n").unwrap();
        assert_eq!(record.entries.len(), 1);
        assert_eq!(record.entries[0].name, "xeyes");
    }

    #[test]
    fn foreign_line_fails_whole_parse() {
        let err = FreezeRecord::parse_str("capsa install a --apk a\nrm -rf /\n").unwrap_err();
        assert!(matches!(err, FreezeError::BadPrefix { line: 2, .. }));
    }

    #[test]
    fn missing_name_and_bad_recipe() {
        assert!(matches!(
            FreezeRecord::parse_str("capsa install").unwrap_err(),
            FreezeError::MissingName { line: 1 }
        ));
        assert!(matches!(
            FreezeRecord::parse_str("capsa install xeyes").unwrap_err(),
            FreezeError::InvalidRecipe { line: 1, .. }
        ));
        assert!(matches!(
            FreezeRecord::parse_str("capsa install x/y --apk a").unwrap_err(),
            FreezeError::InvalidName { line: 1, .. }
        ));
    }

    #[test]
    fn parse_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frozen.txt");
        std::fs::write(&path, "capsa install xeyes --apk xeyes\n").unwrap();
        let record = FreezeRecord::parse_file(&path).unwrap();
        assert_eq!(record.entries.len(), 1);
    }
}
