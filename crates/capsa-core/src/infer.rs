//! Entry-point inference.
//!
//! When a package is installed without a name, the command it should expose
//! is picked from the executables the build introduced. The rules are tried
//! in order and the first one that yields a candidate wins:
//!
//! 1. nothing new: fail
//! 2. exactly one new command: take it
//! 3. a build token that is itself a new command
//! 4. a new command contained in some token, shortest first
//! 5. a token contained in a new command of at least four characters,
//!    shortest first, scanning tokens from the end
//!
//! Anything else is ambiguous and the caller has to name the package.

use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

/// Candidates shorter than this never win rule 5; short generic names like
/// `cc` or `ls` would otherwise match almost any token.
const MIN_REVERSE_MATCH_LEN: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InferenceError {
    #[error("no new command found")]
    NoNewCommand,
    #[error(
        "cannot tell which new command is the entry point ({}); pass the package name explicitly",
        .0.join(", ")
    )]
    Ambiguous(Vec<String>),
}

/// Basenames present in `after` but not in `before`.
pub fn new_executables(after: &BTreeSet<String>, before: &BTreeSet<String>) -> BTreeSet<String> {
    let basename = |p: &String| {
        Path::new(p)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    };
    let old: BTreeSet<String> = before.iter().filter_map(basename).collect();
    after
        .iter()
        .filter_map(basename)
        .filter(|n| !old.contains(n))
        .collect()
}

fn by_length(new: &BTreeSet<String>) -> Vec<&String> {
    let mut sorted: Vec<&String> = new.iter().collect();
    // Stable sort over an already ordered set: equal lengths stay lexicographic.
    sorted.sort_by_key(|c| c.chars().count());
    sorted
}

pub fn infer_command(new: &BTreeSet<String>, tokens: &[String]) -> Result<String, InferenceError> {
    if new.is_empty() {
        return Err(InferenceError::NoNewCommand);
    }
    if new.len() == 1 {
        if let Some(only) = new.iter().next() {
            return Ok(only.clone());
        }
    }

    if let Some(exact) = tokens.iter().find(|t| new.contains(*t)) {
        return Ok(exact.clone());
    }

    // Every candidate contains the empty string, so empty tokens are dropped.
    let tokens: Vec<&String> = tokens.iter().filter(|t| !t.is_empty()).collect();
    let candidates = by_length(new);

    for candidate in &candidates {
        if tokens.iter().any(|t| t.contains(candidate.as_str())) {
            return Ok((*candidate).clone());
        }
    }

    for candidate in &candidates {
        if candidate.chars().count() < MIN_REVERSE_MATCH_LEN {
            continue;
        }
        if tokens.iter().rev().any(|t| candidate.contains(t.as_str())) {
            return Ok((*candidate).clone());
        }
    }

    Err(InferenceError::Ambiguous(new.iter().cloned().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(v: &[&str]) -> BTreeSet<String> {
        v.iter().map(|s| (*s).to_owned()).collect()
    }

    fn toks(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn empty_set_fails() {
        assert_eq!(
            infer_command(&set(&[]), &toks(&["--apk", "xeyes"])),
            Err(InferenceError::NoNewCommand)
        );
        assert_eq!(InferenceError::NoNewCommand.to_string(), "no new command found");
    }

    #[test]
    fn singleton_wins_regardless_of_tokens() {
        assert_eq!(
            infer_command(&set(&["xeyes"]), &toks(&["--run", "something-else"])).unwrap(),
            "xeyes"
        );
    }

    #[test]
    fn exact_match_precedes_substring_rules() {
        assert_eq!(
            infer_command(&set(&["a", "ab", "abc"]), &toks(&["--foo", "ab", "--bar"])).unwrap(),
            "ab"
        );
    }

    #[test]
    fn exact_match_takes_first_token() {
        assert_eq!(
            infer_command(&set(&["htop", "vim"]), &toks(&["--apk", "vim", "htop"])).unwrap(),
            "vim"
        );
    }

    #[test]
    fn forward_substring_prefers_shortest_candidate() {
        assert_eq!(
            infer_command(&set(&["vim", "vimdiff"]), &toks(&["--apk", "neovim-editor"])).unwrap(),
            "vim"
        );
    }

    #[test]
    fn forward_substring_ties_break_lexicographically() {
        assert_eq!(
            infer_command(&set(&["bbb", "aaa"]), &toks(&["--x", "aaabbb"])).unwrap(),
            "aaa"
        );
    }

    #[test]
    fn reverse_substring_with_length_floor() {
        assert_eq!(
            infer_command(
                &set(&["python3", "python3-config"]),
                &toks(&["--apk", "python"])
            )
            .unwrap(),
            "python3"
        );
    }

    #[test]
    fn short_candidates_never_match_in_reverse() {
        let err = infer_command(&set(&["gcc", "g++"]), &toks(&["--apk", "gc"])).unwrap_err();
        assert_eq!(
            err,
            InferenceError::Ambiguous(vec!["g++".to_owned(), "gcc".to_owned()])
        );
    }

    #[test]
    fn empty_tokens_are_ignored() {
        let err = infer_command(&set(&["alpha", "bravo"]), &toks(&["--run", ""])).unwrap_err();
        assert!(matches!(err, InferenceError::Ambiguous(_)));
    }

    #[test]
    fn ambiguity_lists_all_candidates() {
        let err = infer_command(&set(&["foo", "bar"]), &toks(&["--apk", "baz"])).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("bar, foo"));
    }

    #[test]
    fn new_executables_compares_basenames() {
        let before = set(&["/bin/sh", "/usr/bin/env"]);
        let after = set(&["/bin/sh", "/usr/bin/env", "/usr/local/bin/sh", "/usr/bin/xeyes"]);
        assert_eq!(new_executables(&after, &before), set(&["xeyes"]));
    }
}
