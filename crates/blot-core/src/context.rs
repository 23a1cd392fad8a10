//! Process-wide immutable state shared across sessions.

use std::path::Path;

use blot_ccj::CcjDatabase;

/// Read-only state every session borrows: the compilation database and
/// the paths derived from it. Loaded once at startup, shared by
/// reference; sessions never mutate it.
#[derive(Debug)]
pub struct ServerContext {
    database: CcjDatabase,
}

impl ServerContext {
    /// Wraps a loaded compilation database.
    pub fn new(database: CcjDatabase) -> Self {
        Self { database }
    }

    /// The compilation database.
    pub fn database(&self) -> &CcjDatabase {
        &self.database
    }

    /// Absolute path of the compilation database file.
    pub fn ccj_path(&self) -> &Path {
        self.database.path()
    }

    /// Directory containing the compilation database.
    pub fn project_root(&self) -> &Path {
        self.database.project_root()
    }
}
