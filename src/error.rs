use std::path::PathBuf;

use thiserror::Error;

use crate::language::Language;

/// Problems detected before any test runs. Fatal to the run only.
#[derive(Clone, Debug, Error)]
pub enum ConfigError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(Language),
    #[error("invalid run request: {0}")]
    InvalidRequest(String),
    #[error("compiler not available: {0}")]
    CompilerUnavailable(String),
    #[error("failed to set up run workspace: {0}")]
    Workspace(String),
}

/// Infrastructure failures while compiling. Compiler diagnostics (bad
/// source, timeout, class-name mismatch) are carried in-band in
/// `CompilationResult` instead, so they reach the user verbatim.
#[derive(Clone, Debug, Error)]
pub enum CompileError {
    #[error("compiler `{path}` not found")]
    CompilerNotFound { path: PathBuf },
    #[error("no compiler implementation for {0}")]
    Unsupported(Language),
    #[error("io error while compiling {path}: {msg}")]
    Io { path: PathBuf, msg: String },
    #[error("run was cancelled")]
    Cancelled,
}

/// Failures of a single external process invocation. Scoped to one test
/// case; never aborts sibling tests.
#[derive(Clone, Debug, Error)]
pub enum ProcessError {
    #[error("executable not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("failed to spawn `{program}`: {msg}")]
    Spawn { program: String, msg: String },
    #[error("io error while running `{program}`: {msg}")]
    Io { program: String, msg: String },
    #[error("process was cancelled by a stop request")]
    Cancelled,
}
