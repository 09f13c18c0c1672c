use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecipeError {
    #[error("no build arguments given")]
    Empty,
    #[error("first build argument must be an option, got positional '{0}'")]
    Positional(String),
    #[error("build argument cannot be shell-quoted: {0}")]
    Unquotable(String),
    #[error("unbalanced quoting in recipe line: {0}")]
    Unbalanced(String),
}

/// `-x` and `--long` are options; a lone `-` is not.
pub fn is_option_like(token: &str) -> bool {
    token.len() > 1 && token.starts_with('-')
}

/// The ordered build-argument tokens a package was installed from.
///
/// A recipe always starts with an option token; anything else is rejected
/// before the build engine is ever called.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Recipe {
    tokens: Vec<String>,
}

impl Recipe {
    pub fn new(tokens: Vec<String>) -> Result<Self, RecipeError> {
        let Some(first) = tokens.first() else {
            return Err(RecipeError::Empty);
        };
        if !is_option_like(first) {
            return Err(RecipeError::Positional(first.clone()));
        }
        Ok(Self { tokens })
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Shell-quote every token and join with single spaces.
    ///
    /// The encoding is deterministic, so rendering a parsed line again gives
    /// back the same bytes.
    pub fn render(&self) -> Result<String, RecipeError> {
        shlex::try_join(self.tokens.iter().map(String::as_str))
            .map_err(|e| RecipeError::Unquotable(e.to_string()))
    }

    /// Parse a line produced by [`render`](Self::render).
    pub fn parse_line(line: &str) -> Result<Self, RecipeError> {
        let tokens =
            shlex::split(line.trim()).ok_or_else(|| RecipeError::Unbalanced(line.to_owned()))?;
        Self::new(tokens)
    }
}

impl TryFrom<Vec<String>> for Recipe {
    type Error = RecipeError;
    fn try_from(tokens: Vec<String>) -> Result<Self, RecipeError> {
        Self::new(tokens)
    }
}

impl From<Recipe> for Vec<String> {
    fn from(r: Recipe) -> Self {
        r.tokens
    }
}
