#![forbid(unsafe_code)]
#![deny(unused_must_use)]

//! Driver pieces behind the `narrow` binary: the evaluator, the effect
//! trace and diagnostic rendering.

pub mod eval;
pub mod report;
pub mod trace;

use anyhow::{bail, Context, Result};
use narrow_ast::ast::Module;
use narrow_types::TypeChecker;
use std::path::Path;

/// Maximum source file size (1 MB) to prevent memory exhaustion
pub const MAX_SOURCE_SIZE: usize = 1_000_000;

/// Stack for the thread that runs a program; recursion up to
/// [`eval::MAX_CALL_DEPTH`] needs more than the default.
pub const EVAL_STACK_SIZE: usize = 256 * 1024 * 1024;

/// A parsed module that passed the checker.
pub struct Checked {
    pub module: Module,
    pub checker: TypeChecker,
}

/// Read a source file, refusing anything over [`MAX_SOURCE_SIZE`].
pub fn read_source(path: &Path) -> Result<String> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("failed to read file metadata: {}", path.display()))?;
    if metadata.len() > MAX_SOURCE_SIZE as u64 {
        bail!(
            "source file too large: {} bytes (max {} bytes)",
            metadata.len(),
            MAX_SOURCE_SIZE
        );
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Parse and check. Parse and type errors come back inside the
/// `anyhow::Error` and can be downcast for reporting.
pub fn check_source(name: &str, src: &str) -> Result<Checked> {
    let module = narrow_parse::parse_str(name, src)?;
    let mut checker = TypeChecker::new();
    checker.check_module(&module)?;
    Ok(Checked { module, checker })
}
