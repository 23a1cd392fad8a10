//! Project-relative path validation.
//!
//! Both the JSONRPC methods and the HTTP endpoints accept user-supplied
//! source paths. The rules are identical on both surfaces: the path must
//! be relative, must not contain `..` components, and must not be empty.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Rejection reasons for a user-supplied project path.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    /// The path was empty.
    #[error("empty path")]
    Empty,

    /// The path was absolute; only project-relative paths are served.
    #[error("absolute path not allowed: {path}")]
    Absolute {
        /// Offending path.
        path: String,
    },

    /// The path attempted to escape the project root.
    #[error("path traversal denied: {path}")]
    Traversal {
        /// Offending path.
        path: String,
    },
}

/// Validates a user-supplied project-relative path.
///
/// Returns the path with `.` components dropped, ready to be joined onto
/// the project root.
///
/// # Errors
///
/// Rejects empty, absolute, and `..`-containing paths.
pub fn validate_project_relative(raw: &str) -> Result<PathBuf, PathError> {
    if raw.is_empty() {
        return Err(PathError::Empty);
    }

    let path = Path::new(raw);
    if path.is_absolute() {
        return Err(PathError::Absolute {
            path: raw.to_owned(),
        });
    }

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => {
                return Err(PathError::Traversal {
                    path: raw.to_owned(),
                });
            }
        }
    }

    if out.as_os_str().is_empty() {
        return Err(PathError::Empty);
    }
    Ok(out)
}
