//! Wire-level annotate options.
//!
//! The recognized option set is fixed; unknown keys in the `options`
//! object are ignored. The full record is part of the annotate cache key,
//! so two requests with different options never alias.

use serde_json::Value;

use blot_asm::AnnotationOptions;

/// Options accepted by `blot/annotate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnnotateOptions {
    /// Demangle `_Z…` symbols. On by default.
    pub demangle: bool,
    /// Keep assembler directives.
    pub preserve_directives: bool,
    /// Keep comment-only lines.
    pub preserve_comments: bool,
}

impl Default for AnnotateOptions {
    fn default() -> Self {
        Self {
            demangle: true,
            preserve_directives: false,
            preserve_comments: false,
        }
    }
}

impl AnnotateOptions {
    /// Reads recognized keys out of a JSON `options` object. Missing
    /// keys keep their defaults; non-boolean values and unknown keys are
    /// ignored.
    pub fn from_json(value: Option<&Value>) -> Self {
        let mut options = Self::default();
        let Some(object) = value.and_then(Value::as_object) else {
            return options;
        };
        let mut read = |key: &str, dst: &mut bool| {
            if let Some(flag) = object.get(key).and_then(Value::as_bool) {
                *dst = flag;
            }
        };
        read("demangle", &mut options.demangle);
        read("preserve_directives", &mut options.preserve_directives);
        read("preserve_comments", &mut options.preserve_comments);
        options
    }

    /// The filter-level options this record selects.
    pub fn to_filter_options(self) -> AnnotationOptions {
        AnnotationOptions {
            demangle: self.demangle,
            preserve_directives: self.preserve_directives,
            preserve_comments: self.preserve_comments,
            ..AnnotationOptions::default()
        }
    }
}
