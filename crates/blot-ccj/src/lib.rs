//! Compilation-database reader for the blot service.
//!
//! A compilation database (`compile_commands.json`) is a JSON array of
//! entries, each naming a source `file`, the `directory` the compiler was
//! invoked in, and the raw `command` line. This crate loads the database
//! once, resolves entry paths against their directories, and answers
//! "which command builds this source file?" lookups.
//!
//! It also owns the project-relative path rules shared by the JSONRPC and
//! HTTP surfaces: requested paths must be relative, normalized, and free
//! of `..` components.

mod paths;

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

pub use paths::{validate_project_relative, PathError};

const CCJ_TARGET: &str = "blot_ccj";

/// One translation unit: a source file plus the command that compiles it.
#[derive(Debug, Clone, Deserialize)]
pub struct CcjEntry {
    /// Source file path, absolute or relative to `directory`.
    pub file: String,
    /// Directory the command is invoked in.
    pub directory: String,
    /// Raw shell command line from the build system.
    pub command: String,
}

/// Errors raised while loading a compilation database.
#[derive(Debug, Error)]
pub enum CcjError {
    /// The database file could not be read.
    #[error("could not read compilation database at {path}: {source}")]
    Read {
        /// Path that was opened.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The database file is not a JSON array of entries.
    #[error("malformed compilation database at {path}: {source}")]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// An in-memory compilation database, read-only after load.
#[derive(Debug)]
pub struct CcjDatabase {
    path: PathBuf,
    project_root: PathBuf,
    entries: Vec<CcjEntry>,
}

impl CcjDatabase {
    /// Loads a compilation database from `path`.
    ///
    /// The project root is the directory containing the database file;
    /// relative requests are resolved against it.
    ///
    /// # Errors
    ///
    /// Returns [`CcjError::Read`] when the file cannot be read and
    /// [`CcjError::Parse`] when it is not a JSON array of
    /// `{file, directory, command}` objects.
    pub fn load(path: &Path) -> Result<Self, CcjError> {
        let text = fs::read_to_string(path).map_err(|source| CcjError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let entries: Vec<CcjEntry> =
            serde_json::from_str(&text).map_err(|source| CcjError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let absolute = absolute_lossy(path);
        let project_root = absolute
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));

        debug!(
            target: CCJ_TARGET,
            path = %absolute.display(),
            entries = entries.len(),
            "loaded compilation database"
        );

        Ok(Self {
            path: absolute,
            project_root,
            entries,
        })
    }

    /// Absolute path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory containing the database file.
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Number of translation units in the database.
    pub fn tu_count(&self) -> usize {
        self.entries.len()
    }

    /// Finds the entry that compiles `target`, a path relative to the
    /// project root.
    ///
    /// Entry `file` fields may be absolute or relative to the entry's
    /// `directory`; both are resolved before comparison. When several
    /// entries name the same file the first match wins.
    pub fn lookup(&self, target: &Path) -> Option<ResolvedEntry> {
        let absolute_target = normalize(&self.project_root.join(target));

        for entry in &self.entries {
            let directory = self.resolve_directory(entry);
            let entry_file = resolve_against(&directory, Path::new(&entry.file));
            if entry_file == absolute_target {
                return Some(ResolvedEntry {
                    command: entry.command.clone(),
                    directory,
                    file: entry_file,
                });
            }
        }

        warn!(
            target: CCJ_TARGET,
            file = %absolute_target.display(),
            "no compilation-database entry for file"
        );
        None
    }

    fn resolve_directory(&self, entry: &CcjEntry) -> PathBuf {
        resolve_against(&self.project_root, Path::new(&entry.directory))
    }
}

/// A database entry with its paths resolved to absolute form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    /// Raw shell command line.
    pub command: String,
    /// Absolute invocation directory.
    pub directory: PathBuf,
    /// Absolute source file path.
    pub file: PathBuf,
}

fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&base.join(path))
    }
}

fn absolute_lossy(path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        match std::env::current_dir() {
            Ok(cwd) => normalize(&cwd.join(path)),
            Err(_) => path.to_path_buf(),
        }
    }
}

/// Lexically normalizes a path: drops `.` components and folds `..`
/// against preceding components. Does not touch the filesystem.
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

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

#[cfg(test)]
mod tests {
    use std::fs;

    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    fn write_ccj(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("compile_commands.json");
        fs::write(&path, body).expect("write ccj");
        path
    }

    #[rstest]
    fn loads_entries_and_project_root() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_ccj(
            &dir,
            r#"[{"file":"source.cpp","directory":".","command":"g++ -c source.cpp"}]"#,
        );

        let db = CcjDatabase::load(&path).expect("load");

        assert_eq!(db.tu_count(), 1);
        assert_eq!(db.project_root(), normalize(dir.path()));
        assert!(db.path().ends_with("compile_commands.json"));
    }

    #[rstest]
    fn lookup_resolves_relative_entry_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_ccj(
            &dir,
            r#"[{"file":"source.cpp","directory":".","command":"g++ -c source.cpp"}]"#,
        );

        let db = CcjDatabase::load(&path).expect("load");
        let entry = db.lookup(Path::new("source.cpp")).expect("entry");

        assert_eq!(entry.command, "g++ -c source.cpp");
        assert!(entry.file.is_absolute());
        assert!(entry.file.ends_with("source.cpp"));
    }

    #[rstest]
    fn lookup_resolves_absolute_entry_file() {
        let dir = TempDir::new().expect("tempdir");
        let absolute = dir.path().join("source.cpp");
        let body = format!(
            r#"[{{"file":"{}","directory":"{}","command":"g++ -c source.cpp"}}]"#,
            absolute.display(),
            dir.path().display()
        );
        let path = write_ccj(&dir, &body);

        let db = CcjDatabase::load(&path).expect("load");

        assert!(db.lookup(Path::new("source.cpp")).is_some());
    }

    #[rstest]
    fn lookup_prefers_first_match() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_ccj(
            &dir,
            r#"[
                {"file":"source.cpp","directory":".","command":"g++ -O0 -c source.cpp"},
                {"file":"source.cpp","directory":".","command":"g++ -O2 -c source.cpp"}
            ]"#,
        );

        let db = CcjDatabase::load(&path).expect("load");
        let entry = db.lookup(Path::new("source.cpp")).expect("entry");

        assert_eq!(entry.command, "g++ -O0 -c source.cpp");
    }

    #[rstest]
    fn lookup_misses_unknown_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_ccj(
            &dir,
            r#"[{"file":"source.cpp","directory":".","command":"g++ -c source.cpp"}]"#,
        );

        let db = CcjDatabase::load(&path).expect("load");

        assert!(db.lookup(Path::new("other.cpp")).is_none());
    }

    #[rstest]
    fn load_rejects_non_array() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_ccj(&dir, r#"{"not":"an array"}"#);

        let result = CcjDatabase::load(&path);

        assert!(matches!(result, Err(CcjError::Parse { .. })));
    }

    #[rstest]
    fn load_reports_missing_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("nope.json");

        let result = CcjDatabase::load(&path);

        assert!(matches!(result, Err(CcjError::Read { .. })));
    }

    #[rstest]
    #[case("a/../b.cpp", "b.cpp")]
    #[case("./x/./y.cpp", "x/y.cpp")]
    fn normalize_folds_components(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize(Path::new(input)), PathBuf::from(expected));
    }
}
