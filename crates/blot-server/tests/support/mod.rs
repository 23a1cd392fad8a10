//! Shared fixture plumbing for transport tests.
//!
//! Builds a throwaway project with a shell stand-in for the compiler, so
//! the full pipeline runs without a toolchain. `BLOT_FIXTURE_DIR` can
//! point the tests at a pre-built fixture tree instead.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use blot_ccj::CcjDatabase;
use blot_core::ServerContext;

/// Shell stand-in for the compiler: writes a canned listing to the path
/// after `-o`, with a `.file 0` entry naming the working directory.
pub const FAKE_CC: &str = r#"
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; shift; fi
  shift
done
cat > "$out" <<EOF
	.text
	.file 0 "$PWD" "source.cpp"
	.globl	main
	.type	main, @function
main:
	.loc 0 1 1
	movl	\$42, %eax
	ret
	.cfi_endproc
EOF
"#;

pub struct Fixture {
    _dir: Option<TempDir>,
    pub root: PathBuf,
    pub ctx: Arc<ServerContext>,
}

/// Builds (or reuses, via `BLOT_FIXTURE_DIR`) a project fixture and
/// loads its compilation database.
pub fn fixture() -> Fixture {
    if let Ok(preset) = std::env::var("BLOT_FIXTURE_DIR") {
        let root = PathBuf::from(preset);
        let db = CcjDatabase::load(&root.join("compile_commands.json"))
            .expect("load preset fixture ccj");
        return Fixture {
            _dir: None,
            root,
            ctx: Arc::new(ServerContext::new(db)),
        };
    }

    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("source.cpp"), "int main() { return 42; }\n").expect("source");
    fs::write(dir.path().join("fake-cc.sh"), FAKE_CC).expect("script");
    fs::write(
        dir.path().join("compile_commands.json"),
        r#"[{"file":"source.cpp","directory":".","command":"sh fake-cc.sh -c source.cpp -o source.o"}]"#,
    )
    .expect("ccj");

    let db = CcjDatabase::load(&dir.path().join("compile_commands.json")).expect("load ccj");
    let root = dir.path().to_path_buf();
    Fixture {
        _dir: Some(dir),
        root,
        ctx: Arc::new(ServerContext::new(db)),
    }
}
