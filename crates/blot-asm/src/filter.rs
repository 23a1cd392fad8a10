//! Two-pass filter over assembler text.
//!
//! Pass one walks the raw listing collecting globals, the label-reference
//! graph of each routine, and the debug-info `.file` tags belonging to the
//! annotation target. Pass two walks the pass-one survivors again, keeps
//! only lines reachable from the target's routines, and records which
//! source line produced each kept instruction.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace};

use crate::{AnnotateError, AnnotatedAsm, AnnotationOptions, LineMapping};

const FILTER_TARGET: &str = "blot_asm::filter";

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid filter regex '{pattern}': {e}"))
}

static LABEL_START: Lazy<Regex> = Lazy::new(|| re(r"^([^:]+): *(?:#|$)"));
static HAS_OPCODE: Lazy<Regex> = Lazy::new(|| re(r"^[\t ]+[A-Za-z]+[\t ]*"));
static COMMENT_ONLY: Lazy<Regex> = Lazy::new(|| re(r"^\s*(?:[#;@]|//|/\*.*\*/)"));
static LABEL_REFERENCE: Lazy<Regex> = Lazy::new(|| re(r"\.[A-Za-z_][A-Za-z0-9$._]*"));
static DEFINES_GLOBAL: Lazy<Regex> =
    Lazy::new(|| re(r"^\s*\.globa?l\s*([A-Za-z_.][A-Za-z0-9$._]*)"));
static DEFINES_FUNCTION_OR_OBJECT: Lazy<Regex> = Lazy::new(|| re(r"^\s*\.type\s*(.*),\s*[%@]"));
static FILE_DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    re(r#"^\s*\.file\s+([0-9]+)(?:\s+"([^"]+)")?\s+"([^"]+)"(?:\s+md5\s+0x[0-9a-fA-F]+)?"#)
});
static SOURCE_TAG: Lazy<Regex> = Lazy::new(|| re(r"^\s*\.loc\s+([0-9]+)\s+([0-9]+)"));
static SOURCE_STAB: Lazy<Regex> = Lazy::new(|| re(r"\.stabn\s+([0-9]+),0,([0-9]+),"));
static ENDBLOCK: Lazy<Regex> = Lazy::new(|| re(r"\.(?:cfi_endproc|data|section|text)"));
static DATA_DEFN: Lazy<Regex> =
    Lazy::new(|| re(r"^\s*\.(?:string|asciz|ascii|[1248]?byte|short|word|long|quad|value|zero)"));
static MANGLED_SYMBOL: Lazy<Regex> = Lazy::new(|| re(r"_Z[A-Za-z0-9_]+"));

/// Debug-info identity of the annotation target.
struct TargetInfo {
    /// `.file` numbers that refer to the target.
    tags: BTreeSet<usize>,
    /// File name as spelled in the matching `.file` directive.
    filename: String,
}

#[derive(Default)]
struct ParserState<'a> {
    routines: HashMap<&'a str, Vec<&'a str>>,
    globals: HashSet<&'a str>,
    current_global: Option<&'a str>,
    compile_dir: PathBuf,
    target_info: Option<TargetInfo>,
    target_file_routines: HashSet<&'a str>,
    used_labels: HashSet<&'a str>,
    linemap: BTreeMap<usize, BTreeSet<(usize, usize)>>,
}

impl ParserState<'_> {
    fn target_tags_contain(&self, tag: usize) -> bool {
        self.target_info
            .as_ref()
            .is_some_and(|info| info.tags.contains(&tag))
    }

    /// Records that `asm_line` came from `source_line`, merging the new
    /// line into an adjacent range when one exists.
    fn register_mapping(&mut self, source_line: usize, asm_line: usize) {
        let ranges = self.linemap.entry(source_line).or_default();

        let before = ranges
            .iter()
            .find(|(_, end)| end + 1 == asm_line)
            .copied();
        let after = ranges
            .iter()
            .find(|(start, _)| asm_line + 1 == *start)
            .copied();

        match (before, after) {
            (Some(b), Some(a)) => {
                ranges.remove(&b);
                ranges.remove(&a);
                ranges.insert((b.0, a.1));
            }
            (Some(b), None) => {
                ranges.remove(&b);
                ranges.insert((b.0, asm_line));
            }
            (None, Some(a)) => {
                ranges.remove(&a);
                ranges.insert((asm_line, a.1));
            }
            (None, None) => {
                ranges.insert((asm_line, asm_line));
            }
        }
    }
}

fn parse_usize(text: &str) -> Result<usize, AnnotateError> {
    text.parse().map_err(|_| AnnotateError::BadOperand {
        text: text.to_owned(),
    })
}

/// Lexically normalizes a path without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub(crate) fn run(
    input: &str,
    options: &AnnotationOptions,
    annotation_target: Option<&Path>,
) -> Result<AnnotatedAsm, AnnotateError> {
    let mut state = ParserState::default();
    let first = first_pass(input, &mut state, options, annotation_target)?;
    collect_used_labels(&mut state, options);
    let (kept, linemap) = second_pass(&first, &mut state, options);

    let source_file = state
        .target_info
        .as_ref()
        .map(|info| info.filename.clone())
        .unwrap_or_default();

    let lines = if options.demangle {
        apply_demanglings(&kept)
    } else {
        kept.iter().map(|line| (*line).to_owned()).collect()
    };

    let mut line_mappings = Vec::new();
    for (source_line, ranges) in linemap {
        for (start, end) in ranges {
            line_mappings.push(LineMapping {
                source_file: source_file.clone(),
                source_line,
                asm_line_start: start,
                asm_line_end: end,
            });
        }
    }

    debug!(
        target: FILTER_TARGET,
        kept = lines.len(),
        mappings = line_mappings.len(),
        "filter finished"
    );
    Ok(AnnotatedAsm {
        lines,
        line_mappings,
    })
}

/// What a sweep decided to do with one line.
enum Action {
    Preserve,
    Kill,
    /// Fall back to the `preserve_directives` option.
    Directive,
}

fn first_pass<'a>(
    input: &'a str,
    state: &mut ParserState<'a>,
    options: &AnnotationOptions,
    annotation_target: Option<&Path>,
) -> Result<Vec<&'a str>, AnnotateError> {
    let mut target = annotation_target.map(Path::to_path_buf);
    let mut output = Vec::new();

    for line in input.lines() {
        if line.is_empty() {
            continue;
        }

        let action = if !line.starts_with('\t') {
            if let Some(caps) = LABEL_START.captures(line) {
                let label = caps.get(1).map_or("", |m| m.as_str());
                if state.globals.contains(label) {
                    state.current_global = Some(label);
                }
                Action::Preserve
            } else {
                Action::Kill
            }
        } else if state.current_global.is_some() {
            if let Some(m) = HAS_OPCODE.find(line) {
                sweep_opcode(state, line, m.end());
                Action::Preserve
            } else {
                sweep_directive(state, line, options, &mut target)?
            }
        } else {
            sweep_directive(state, line, options, &mut target)?
        };

        match action {
            Action::Preserve => output.push(line),
            Action::Kill => {}
            Action::Directive => {
                if options.preserve_directives {
                    output.push(line);
                }
            }
        }
    }

    if state.target_info.is_none() {
        return Err(AnnotateError::TargetNotFound {
            target: target
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| String::from("<unknown>")),
        });
    }
    Ok(output)
}

/// Collects the label references an instruction line makes.
fn sweep_opcode<'a>(state: &mut ParserState<'a>, line: &'a str, opcode_end: usize) {
    let Some(global) = state.current_global else {
        return;
    };
    let refs = state.routines.entry(global).or_default();
    for m in LABEL_REFERENCE.find_iter(&line[opcode_end..]) {
        trace!(target: FILTER_TARGET, global, reference = m.as_str(), "label reference");
        refs.push(m.as_str());
    }
}

/// Classifies a directive (non-opcode) line during the first pass.
fn sweep_directive<'a>(
    state: &mut ParserState<'a>,
    line: &'a str,
    options: &AnnotationOptions,
    target: &mut Option<PathBuf>,
) -> Result<Action, AnnotateError> {
    if !options.preserve_comments && COMMENT_ONLY.is_match(line) {
        return Ok(Action::Kill);
    }

    if let Some(caps) = DEFINES_GLOBAL
        .captures(line)
        .or_else(|| DEFINES_FUNCTION_OR_OBJECT.captures(line))
    {
        if let Some(name) = caps.get(1) {
            state.globals.insert(name.as_str().trim());
        }
        return Ok(Action::Directive);
    }

    if let Some(caps) = FILE_DIRECTIVE.captures(line) {
        sweep_file_directive(state, &caps, target)?;
        return Ok(Action::Directive);
    }

    if let Some(caps) = SOURCE_TAG.captures(line) {
        let tag = parse_usize(&caps[1])?;
        if state.current_global.is_some() && state.target_tags_contain(tag) {
            if let Some(global) = state.current_global {
                state.target_file_routines.insert(global);
            }
        }
        return Ok(Action::Preserve);
    }

    if ENDBLOCK.is_match(line) {
        state.current_global = None;
        return Ok(Action::Preserve);
    }

    Ok(Action::Preserve)
}

/// Digests a numbered `.file` directive.
///
/// Compilers disagree on the shape of these. GCC emits
/// `.file 0 "/abs/dir" "source.cpp"` then `.file N "relative.hpp"`;
/// Clang emits `.file N "./dir" "name.hpp" md5 0x…`. The DWARF5 entry 0
/// establishes the compilation directory, against which every later
/// relative entry is resolved before comparing with the annotation target.
fn sweep_file_directive(
    state: &mut ParserState<'_>,
    caps: &regex::Captures<'_>,
    target: &mut Option<PathBuf>,
) -> Result<(), AnnotateError> {
    let fileno = parse_usize(&caps[1])?;
    let directory = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    let raw_filename = &caps[3];
    let filename = if raw_filename == "-" {
        "<stdin>"
    } else {
        raw_filename
    };

    if fileno == 0 {
        state.compile_dir = normalize(Path::new(directory));
        *target = Some(match target.take() {
            None => state.compile_dir.join(filename),
            Some(t) if t.is_relative() => normalize(&state.compile_dir.join(t)),
            Some(t) => normalize(&t),
        });
        debug!(
            target: FILTER_TARGET,
            compile_dir = %state.compile_dir.display(),
            annotation_target = %target.as_deref().unwrap_or_else(|| Path::new("")).display(),
            "established compilation directory"
        );
    }
    if state.compile_dir.as_os_str().is_empty() {
        return Err(AnnotateError::NoCompileDir);
    }

    let entry_path = if directory.is_empty() {
        normalize(&state.compile_dir.join(filename))
    } else {
        let dir = Path::new(directory);
        if dir.is_absolute() {
            normalize(&dir.join(filename))
        } else {
            normalize(&state.compile_dir.join(dir).join(filename))
        }
    };

    let matches_target = target
        .as_deref()
        .is_some_and(|probe| entry_path == *probe);
    if matches_target {
        trace!(target: FILTER_TARGET, tag = fileno, entry = %entry_path.display(), "target file tag");
        match state.target_info.as_mut() {
            Some(info) => {
                info.tags.insert(fileno);
            }
            None => {
                state.target_info = Some(TargetInfo {
                    tags: BTreeSet::from([fileno]),
                    filename: filename.to_owned(),
                });
            }
        }
    }
    Ok(())
}

/// Seeds the used-label set from the routines reachable for this request.
fn collect_used_labels(state: &mut ParserState<'_>, options: &AnnotationOptions) {
    if options.preserve_library_functions {
        for (&label, callees) in &state.routines {
            state.used_labels.insert(label);
            state.used_labels.extend(callees.iter().copied());
        }
    } else {
        for &label in &state.target_file_routines {
            state.used_labels.insert(label);
            if let Some(callees) = state.routines.get(label) {
                state.used_labels.extend(callees.iter().copied());
            }
        }
    }
}

fn second_pass<'a>(
    input: &[&'a str],
    state: &mut ParserState<'a>,
    options: &AnnotationOptions,
) -> (Vec<&'a str>, BTreeMap<usize, BTreeSet<(usize, usize)>>) {
    let mut reachable: Option<&str> = None;
    let mut source_line: Option<usize> = None;
    let mut output: Vec<&'a str> = Vec::new();

    for &line in input {
        let next_linum = output.len() + 1;

        let action = if !line.starts_with('\t') {
            if let Some(caps) = LABEL_START.captures(line) {
                let label = caps.get(1).map_or("", |m| m.as_str());
                if state.used_labels.contains(label) {
                    reachable = Some(label);
                    Action::Preserve
                } else if options.preserve_unused_labels {
                    Action::Preserve
                } else {
                    Action::Kill
                }
            } else {
                Action::Directive
            }
        } else if DATA_DEFN.is_match(line) && reachable.is_some() {
            Action::Preserve
        } else if HAS_OPCODE.is_match(line) && reachable.is_some() {
            if let Some(src) = source_line {
                state.register_mapping(src, next_linum);
            }
            Action::Preserve
        } else if let Some(caps) = SOURCE_TAG.captures(line) {
            source_line = match caps[1].parse::<usize>() {
                Ok(tag) if state.target_tags_contain(tag) => caps[2].parse().ok(),
                _ => None,
            };
            Action::Directive
        } else if let Some(caps) = SOURCE_STAB.captures(line) {
            match caps[1].parse::<usize>() {
                Ok(68) => source_line = caps[2].parse().ok(),
                Ok(100) | Ok(132) => source_line = None,
                _ => {}
            }
            Action::Directive
        } else if ENDBLOCK.is_match(line) {
            reachable = None;
            Action::Directive
        } else {
            Action::Directive
        };

        match action {
            Action::Preserve => output.push(line),
            Action::Kill => {}
            Action::Directive => {
                if options.preserve_directives {
                    output.push(line);
                }
            }
        }
    }

    (output, std::mem::take(&mut state.linemap))
}

/// Replaces every distinct mangled symbol in `lines` with its demangled
/// form, resolved through one batch call.
fn apply_demanglings(lines: &[&str]) -> Vec<String> {
    let mut symbols = BTreeSet::new();
    for line in lines {
        for m in MANGLED_SYMBOL.find_iter(line) {
            symbols.insert(m.as_str().to_owned());
        }
    }
    let demangled = crate::demangle::demangle_batch(&symbols);
    if demangled.is_empty() {
        return lines.iter().map(|line| (*line).to_owned()).collect();
    }

    lines
        .iter()
        .map(|line| {
            MANGLED_SYMBOL
                .replace_all(line, |caps: &regex::Captures<'_>| {
                    let sym = &caps[0];
                    demangled.get(sym).cloned().unwrap_or_else(|| sym.to_owned())
                })
                .into_owned()
        })
        .collect()
}
