//! Batch symbol demangling.
//!
//! The filter collects every distinct mangled symbol it keeps and resolves
//! them here in one call, so callers pay the demangler setup cost once per
//! listing rather than once per line.

use std::collections::{BTreeMap, BTreeSet};

use cpp_demangle::Symbol;
use tracing::trace;

const DEMANGLE_TARGET: &str = "blot_asm::demangle";

/// Demangles every symbol in `symbols`, returning only the ones that
/// actually changed. Symbols the demangler cannot parse are left out and
/// appear unmodified in the output listing.
pub fn demangle_batch(symbols: &BTreeSet<String>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for mangled in symbols {
        let Ok(symbol) = Symbol::new(mangled.as_bytes()) else {
            trace!(target: DEMANGLE_TARGET, symbol = %mangled, "not demanglable");
            continue;
        };
        let readable = symbol.to_string();
        if readable != *mangled {
            out.insert(mangled.clone(), readable);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn demangles_plain_function() {
        let symbols = BTreeSet::from([String::from("_Z3foov")]);
        let out = demangle_batch(&symbols);
        assert_eq!(out.get("_Z3foov").map(String::as_str), Some("foo()"));
    }

    #[rstest]
    fn skips_undemanglable_symbols() {
        let symbols = BTreeSet::from([String::from("_Z")]);
        let out = demangle_batch(&symbols);
        assert!(out.is_empty());
    }

    #[rstest]
    fn batch_handles_multiple_symbols() {
        let symbols = BTreeSet::from([
            String::from("_Z3foov"),
            String::from("_Z3bari"),
        ]);
        let out = demangle_batch(&symbols);
        assert_eq!(out.len(), 2);
        assert_eq!(out.get("_Z3bari").map(String::as_str), Some("bar(int)"));
    }
}
