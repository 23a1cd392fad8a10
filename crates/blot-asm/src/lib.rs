//! Assembly filter and symbol demangler.
//!
//! Takes raw assembler text as emitted by `gcc -S -g1` or `clang -S -g1`,
//! strips the noise (unreferenced labels, directives, comments, library
//! routines) and maps the surviving instruction lines back to lines of the
//! source file that was asked about. The shape of the filter is a two-pass
//! sweep: the first pass discovers labels, globals and the annotation
//! target's debug-info file tags; the second pass keeps only code reachable
//! from the target's routines and records the source-line mapping.

mod demangle;
mod filter;

use std::path::Path;

use serde::Serialize;
use thiserror::Error;

pub use demangle::demangle_batch;

/// Options understood by the filter.
///
/// Wire callers only control `demangle`, `preserve_directives` and
/// `preserve_comments`; the remaining knobs exist for the CLI and default
/// to off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationOptions {
    /// Demangle Itanium-ABI (`_Z…`) symbols in the output.
    pub demangle: bool,
    /// Keep assembler directives that would otherwise be stripped.
    pub preserve_directives: bool,
    /// Keep comment-only lines.
    pub preserve_comments: bool,
    /// Keep routines that are not reachable from the annotation target.
    pub preserve_library_functions: bool,
    /// Keep labels that nothing references.
    pub preserve_unused_labels: bool,
}

impl Default for AnnotationOptions {
    fn default() -> Self {
        Self {
            demangle: true,
            preserve_directives: false,
            preserve_comments: false,
            preserve_library_functions: false,
            preserve_unused_labels: false,
        }
    }
}

/// One contiguous run of output lines produced by one source line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineMapping {
    /// Source file the range belongs to.
    pub source_file: String,
    /// 1-based line in the source file.
    pub source_line: usize,
    /// First 1-based line of the run in the filtered listing.
    pub asm_line_start: usize,
    /// Last 1-based line of the run in the filtered listing (inclusive).
    pub asm_line_end: usize,
}

/// Result of a filter run: the cleaned listing plus source mappings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotatedAsm {
    /// Filtered assembly lines, in order.
    pub lines: Vec<String>,
    /// Source-line mappings, ordered by source line then asm range.
    pub line_mappings: Vec<LineMapping>,
}

/// Failures while filtering assembler text.
#[derive(Debug, Error)]
pub enum AnnotateError {
    /// The listing carried no usable debug-info `.file` directives, so no
    /// compilation directory could be established.
    #[error("no compilation directory found in assembly directives")]
    NoCompileDir,

    /// No `.file` entry matched the requested annotation target.
    #[error("no debug info for annotation target '{target}'")]
    TargetNotFound {
        /// The target that was looked for.
        target: String,
    },

    /// A numeric field in a directive failed to parse.
    #[error("malformed directive operand '{text}'")]
    BadOperand {
        /// The operand text.
        text: String,
    },
}

/// Filters `input` down to the code relevant to `annotation_target`.
///
/// `annotation_target` is the source path the caller asked about; when
/// `None` the main file named by the DWARF5 `.file 0` directive is used.
///
/// # Errors
///
/// Fails when the listing has no debug info or none of it refers to the
/// requested target. Callers are expected to have compiled with `-g1`.
pub fn annotate(
    input: &str,
    options: &AnnotationOptions,
    annotation_target: Option<&Path>,
) -> Result<AnnotatedAsm, AnnotateError> {
    filter::run(input, options, annotation_target)
}
