//! Compile-command canonicalization.
//!
//! Build systems record one shell string per translation unit. To reuse
//! such a command for assembly inspection it is tokenized with POSIX
//! quoting rules and rewritten: object-emission and dependency-tracking
//! flags are stripped, `-g1 -S` is appended, and the output path is left
//! for the producer to fill in per invocation. The rewritten argv, the
//! working directory and the annotation target together form the
//! content-addressable key under which produced assembly is cached.
//! The `-o` value never participates, so two runs of the same logical
//! command collide in the cache regardless of their temp paths.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Flags dropped together with their separate argument.
const FLAGS_WITH_ARG: &[&str] = &["-o", "-MF", "-MT", "-MQ"];

/// Flags dropped on their own.
const BARE_FLAGS: &[&str] = &["-c", "-S", "-E", "-MMD", "-MD", "-MP"];

/// Errors raised while canonicalizing a compile command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// A quote opened in the command was never closed.
    #[error("unterminated {kind} quote in command")]
    UnterminatedQuote {
        /// `'single'` or `"double"`.
        kind: &'static str,
    },

    /// The command ended in a bare backslash.
    #[error("trailing escape in command")]
    TrailingEscape,

    /// The command tokenized to nothing.
    #[error("empty compile command")]
    Empty,
}

/// Splits a shell command into argv honoring POSIX quoting.
///
/// Single quotes protect everything; double quotes protect everything but
/// `\"` and `\\`; an unquoted backslash escapes the next character.
/// Unquoted whitespace separates words.
///
/// # Errors
///
/// Fails on unterminated quotes or a trailing backslash.
pub fn tokenize(raw: &str) -> Result<Vec<String>, CommandError> {
    let mut argv = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = raw.chars();

    loop {
        let Some(c) = chars.next() else { break };
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => word.push(inner),
                        None => return Err(CommandError::UnterminatedQuote { kind: "single" }),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\')) => word.push(escaped),
                            Some(other) => {
                                word.push('\\');
                                word.push(other);
                            }
                            None => {
                                return Err(CommandError::UnterminatedQuote { kind: "double" });
                            }
                        },
                        Some(inner) => word.push(inner),
                        None => return Err(CommandError::UnterminatedQuote { kind: "double" }),
                    }
                }
            }
            '\\' => match chars.next() {
                Some(escaped) => {
                    in_word = true;
                    word.push(escaped);
                }
                None => return Err(CommandError::TrailingEscape),
            },
            c if c.is_whitespace() => {
                if in_word {
                    argv.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            other => {
                in_word = true;
                word.push(other);
            }
        }
    }
    if in_word {
        argv.push(word);
    }
    Ok(argv)
}

/// Rewrites an argv so the compiler emits assembly with line info.
///
/// Strips `-o`, `-c`, `-S`, `-E` and the dependency-tracking family in
/// both `-X value` and `-X=value`/`-Xvalue` spellings, then appends
/// `-g1 -S`. The source-file positional is left untouched. The output
/// path is not appended here; the producer adds `-o <temp>` when it runs.
///
/// # Errors
///
/// Fails when the argv is empty.
pub fn rewrite_for_assembly(argv: Vec<String>) -> Result<Vec<String>, CommandError> {
    let mut iter = argv.into_iter();
    let compiler = iter.next().ok_or(CommandError::Empty)?;

    let mut out = vec![compiler];
    let mut skip_next = false;
    for arg in iter {
        if skip_next {
            skip_next = false;
            continue;
        }
        if BARE_FLAGS.contains(&arg.as_str()) {
            continue;
        }
        if let Some(flag) = FLAGS_WITH_ARG.iter().find(|f| arg.starts_with(**f)) {
            if arg.len() == flag.len() {
                skip_next = true;
            }
            // `-o=path` and `-opath` carry the value in the same token.
            continue;
        }
        out.push(arg);
    }

    out.push(String::from("-g1"));
    out.push(String::from("-S"));
    Ok(out)
}

/// Tokenizes and rewrites a raw command string in one step.
///
/// # Errors
///
/// Propagates tokenizer failures and rejects empty commands.
pub fn canonicalize(raw: &str) -> Result<Vec<String>, CommandError> {
    rewrite_for_assembly(tokenize(raw)?)
}

/// Strips `-o` (and its value) from an argv supplied by a caller, so an
/// explicit inference keys identically to a database-derived one.
pub fn strip_output_args(argv: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(argv.len());
    let mut skip_next = false;
    for arg in argv {
        if skip_next {
            skip_next = false;
            continue;
        }
        if arg == "-o" {
            skip_next = true;
            continue;
        }
        if arg.starts_with("-o") {
            continue;
        }
        out.push(arg);
    }
    out
}

/// The content-addressable identity of one assembly production.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalKey {
    /// Rewritten argv, `-o` excluded.
    pub argv: Vec<String>,
    /// Exact invocation directory.
    pub directory: PathBuf,
    /// Annotation target as recorded on the inference.
    pub target: PathBuf,
}
