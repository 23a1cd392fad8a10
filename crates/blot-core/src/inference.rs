//! Canonical inferences and the resolver that produces them.
//!
//! An [`Inference`] is the canonical description of what to compile: the
//! rewritten argv, the directory to run it in, and the source file the
//! caller asked about. The resolver maps the three accepted parameter
//! shapes (project file, previously minted token, explicit inference)
//! onto a token plus inference, consulting the session's infer caches
//! according to the `token` / `other` / miss protocol.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use blot_ccj::{CcjDatabase, PathError};

use crate::command::{self, CanonicalKey, CommandError};
use crate::session::{Session, Token};

const RESOLVE_TARGET: &str = "blot_core::resolve";

/// The canonical description of one assembly production.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inference {
    /// Exact argv to run, already rewritten to emit assembly. The output
    /// path is absent; the producer appends `-o <temp>` per invocation.
    pub compilation_command: Vec<String>,
    /// Absolute directory to invoke the command in.
    pub compilation_directory: PathBuf,
    /// Source path the caller asked about, relative to
    /// `compilation_directory` where possible.
    pub annotation_target: PathBuf,
}

impl Inference {
    /// The cache key for assembly produced from this inference.
    pub fn canonical_key(&self) -> CanonicalKey {
        CanonicalKey {
            argv: self.compilation_command.clone(),
            directory: self.compilation_directory.clone(),
            target: self.annotation_target.clone(),
        }
    }

    /// Absolute path of the annotation target.
    pub fn absolute_target(&self) -> PathBuf {
        if self.annotation_target.is_absolute() {
            self.annotation_target.clone()
        } else {
            self.compilation_directory.join(&self.annotation_target)
        }
    }
}

/// The three parameter shapes accepted by `blot/infer`.
#[derive(Debug, Clone)]
pub enum InferParams {
    /// Project-relative source path.
    File(String),
    /// Token minted by a prior infer in this session.
    Token(Token),
    /// Explicit inference, treated as already canonical.
    Explicit(Inference),
}

/// How a resolution was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHit {
    /// Fresh work was performed.
    Miss,
    /// The caller's own token was found.
    Token,
    /// Another pipeline's artifact satisfied the request.
    Other,
}

impl CacheHit {
    /// Wire encoding: `false`, `"token"` or `"other"`.
    pub fn to_json(self) -> serde_json::Value {
        match self {
            CacheHit::Miss => serde_json::Value::Bool(false),
            CacheHit::Token => serde_json::Value::String(String::from("token")),
            CacheHit::Other => serde_json::Value::String(String::from("other")),
        }
    }
}

/// A resolved inference with its token and cache provenance.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Token identifying the inference in this session.
    pub token: Token,
    /// The canonical inference.
    pub inference: Inference,
    /// Whether and how a cache satisfied the request.
    pub cached: CacheHit,
}

/// Failures while resolving caller parameters to an inference.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The supplied file path broke the project-relative rules.
    #[error(transparent)]
    Path(#[from] PathError),

    /// The token does not exist in this session.
    #[error("token {token} not found in infer cache")]
    StaleToken {
        /// The unknown token.
        token: Token,
    },

    /// The file has no compilation-database entry.
    #[error("no compilation-database entry for '{file}'")]
    UnknownFile {
        /// The file that was looked up.
        file: String,
    },

    /// The database entry's command could not be canonicalized.
    #[error("compilation database holds an invalid command for '{file}': {source}")]
    InvalidCommand {
        /// The file whose entry is defective.
        file: String,
        /// The canonicalizer failure.
        #[source]
        source: CommandError,
    },

    /// An explicit inference was missing a field or carried empty values.
    #[error("explicit inference is missing {field}")]
    IncompleteInference {
        /// Name of the absent or empty field.
        field: &'static str,
    },
}

/// Resolves caller parameters to `(token, inference, cached)`.
///
/// Cache protocol: a known token is returned as-is (`"token"`), a file
/// already inferred this session reuses its token (`"other"`), anything
/// else mints a fresh token and populates the infer caches.
///
/// # Errors
///
/// See [`ResolveError`]; the dispatcher maps these onto JSONRPC codes.
pub fn resolve(
    params: InferParams,
    session: &mut Session,
    database: &CcjDatabase,
) -> Result<Resolution, ResolveError> {
    match params {
        InferParams::Token(token) => {
            let inference = session
                .infer_cache_1
                .get(&token)
                .cloned()
                .ok_or(ResolveError::StaleToken { token })?;
            Ok(Resolution {
                token,
                inference,
                cached: CacheHit::Token,
            })
        }

        InferParams::File(file) => {
            let relative = blot_ccj::validate_project_relative(&file)?;

            if let Some(&token) = session.infer_cache_2.get(&file) {
                if let Some(inference) = session.infer_cache_1.get(&token).cloned() {
                    debug!(target: RESOLVE_TARGET, file, token, "infer cache hit");
                    return Ok(Resolution {
                        token,
                        inference,
                        cached: CacheHit::Other,
                    });
                }
            }

            let entry = database
                .lookup(&relative)
                .ok_or_else(|| ResolveError::UnknownFile { file: file.clone() })?;

            let argv = command::canonicalize(&entry.command).map_err(|source| {
                ResolveError::InvalidCommand {
                    file: file.clone(),
                    source,
                }
            })?;

            let inference = Inference {
                compilation_command: argv,
                compilation_directory: entry.directory.clone(),
                annotation_target: relative_to(&entry.file, &entry.directory),
            };

            let token = session.mint_token();
            session.infer_cache_1.insert(token, inference.clone());
            session.infer_cache_2.insert(file, token);
            Ok(Resolution {
                token,
                inference,
                cached: CacheHit::Miss,
            })
        }

        InferParams::Explicit(mut inference) => {
            if inference.compilation_command.is_empty() {
                return Err(ResolveError::IncompleteInference {
                    field: "compilation_command",
                });
            }
            if inference.compilation_directory.as_os_str().is_empty() {
                return Err(ResolveError::IncompleteInference {
                    field: "compilation_directory",
                });
            }
            if inference.annotation_target.as_os_str().is_empty() {
                return Err(ResolveError::IncompleteInference {
                    field: "annotation_target",
                });
            }

            // Key parity with database-derived inferences: no output args,
            // absolute directory.
            inference.compilation_command =
                command::strip_output_args(inference.compilation_command);
            if inference.compilation_directory.is_relative() {
                inference.compilation_directory =
                    database.project_root().join(&inference.compilation_directory);
            }

            let token = session.mint_token();
            session.infer_cache_1.insert(token, inference.clone());
            Ok(Resolution {
                token,
                inference,
                cached: CacheHit::Miss,
            })
        }
    }
}

/// Renders `path` relative to `base` when it lies underneath it.
fn relative_to(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    fn database(dir: &TempDir) -> CcjDatabase {
        let ccj = dir.path().join("compile_commands.json");
        fs::write(
            &ccj,
            r#"[{"file":"source.cpp","directory":".","command":"g++ -O2 -c source.cpp -o source.o"}]"#,
        )
        .expect("write ccj");
        CcjDatabase::load(&ccj).expect("load ccj")
    }

    #[rstest]
    fn file_miss_mints_token_one() {
        let dir = TempDir::new().expect("tempdir");
        let db = database(&dir);
        let mut session = Session::new();

        let r = resolve(InferParams::File(String::from("source.cpp")), &mut session, &db)
            .expect("resolve");

        assert_eq!(r.token, 1);
        assert_eq!(r.cached, CacheHit::Miss);
        assert_eq!(r.inference.annotation_target, PathBuf::from("source.cpp"));
        assert!(r.inference.compilation_command.ends_with(&[
            String::from("-g1"),
            String::from("-S")
        ]));
    }

    #[rstest]
    fn second_file_infer_reuses_token() {
        let dir = TempDir::new().expect("tempdir");
        let db = database(&dir);
        let mut session = Session::new();

        let first = resolve(InferParams::File(String::from("source.cpp")), &mut session, &db)
            .expect("first");
        let second = resolve(InferParams::File(String::from("source.cpp")), &mut session, &db)
            .expect("second");

        assert_eq!(second.token, first.token);
        assert_eq!(second.cached, CacheHit::Other);
    }

    #[rstest]
    fn token_roundtrip_is_stable() {
        let dir = TempDir::new().expect("tempdir");
        let db = database(&dir);
        let mut session = Session::new();

        let minted = resolve(InferParams::File(String::from("source.cpp")), &mut session, &db)
            .expect("mint");
        let looked_up = resolve(InferParams::Token(minted.token), &mut session, &db)
            .expect("lookup");

        assert_eq!(looked_up.token, minted.token);
        assert_eq!(looked_up.cached, CacheHit::Token);
        assert_eq!(looked_up.inference, minted.inference);
    }

    #[rstest]
    fn stale_token_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let db = database(&dir);
        let mut session = Session::new();

        let result = resolve(InferParams::Token(99), &mut session, &db);

        assert!(matches!(result, Err(ResolveError::StaleToken { token: 99 })));
    }

    #[rstest]
    #[case("../../etc/passwd")]
    #[case("/etc/passwd")]
    fn unsafe_paths_are_rejected(#[case] file: &str) {
        let dir = TempDir::new().expect("tempdir");
        let db = database(&dir);
        let mut session = Session::new();

        let result = resolve(InferParams::File(String::from(file)), &mut session, &db);

        assert!(matches!(result, Err(ResolveError::Path(_))));
    }

    #[rstest]
    fn unknown_file_names_the_file() {
        let dir = TempDir::new().expect("tempdir");
        let db = database(&dir);
        let mut session = Session::new();

        let result = resolve(InferParams::File(String::from("missing.cpp")), &mut session, &db);

        match result {
            Err(ResolveError::UnknownFile { file }) => assert_eq!(file, "missing.cpp"),
            other => panic!("expected UnknownFile, got {other:?}"),
        }
    }

    #[rstest]
    fn explicit_inference_always_mints() {
        let dir = TempDir::new().expect("tempdir");
        let db = database(&dir);
        let mut session = Session::new();

        let inference = Inference {
            compilation_command: vec![
                String::from("g++"),
                String::from("source.cpp"),
                String::from("-g1"),
                String::from("-S"),
            ],
            compilation_directory: dir.path().to_path_buf(),
            annotation_target: PathBuf::from("source.cpp"),
        };

        let first = resolve(InferParams::Explicit(inference.clone()), &mut session, &db)
            .expect("first");
        let second = resolve(InferParams::Explicit(inference), &mut session, &db)
            .expect("second");

        assert_eq!(first.cached, CacheHit::Miss);
        assert_eq!(second.cached, CacheHit::Miss);
        assert_ne!(first.token, second.token);
        assert_eq!(
            first.inference.canonical_key(),
            second.inference.canonical_key()
        );
    }

    #[rstest]
    fn explicit_inference_strips_output_args() {
        let dir = TempDir::new().expect("tempdir");
        let db = database(&dir);
        let mut session = Session::new();

        let inference = Inference {
            compilation_command: vec![
                String::from("g++"),
                String::from("-o"),
                String::from("/tmp/x.s"),
                String::from("source.cpp"),
            ],
            compilation_directory: dir.path().to_path_buf(),
            annotation_target: PathBuf::from("source.cpp"),
        };

        let r = resolve(InferParams::Explicit(inference), &mut session, &db).expect("resolve");

        assert!(!r.inference.compilation_command.iter().any(|a| a == "-o"));
        assert!(!r.inference.compilation_command.iter().any(|a| a == "/tmp/x.s"));
    }

    #[rstest]
    fn explicit_inference_requires_all_fields() {
        let dir = TempDir::new().expect("tempdir");
        let db = database(&dir);
        let mut session = Session::new();

        let inference = Inference {
            compilation_command: Vec::new(),
            compilation_directory: dir.path().to_path_buf(),
            annotation_target: PathBuf::from("source.cpp"),
        };

        let result = resolve(InferParams::Explicit(inference), &mut session, &db);

        assert!(matches!(
            result,
            Err(ResolveError::IncompleteInference { field: "compilation_command" })
        ));
    }
}
