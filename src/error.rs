//! Crate-wide error type.
//!
//! Mirrors the shape of error handling spec.md §7 asks for: distinct
//! variants per failure kind, enough context (paths, line numbers, node
//! lists) to print a useful diagnostic, and no panics on recoverable
//! conditions.

use std::path::PathBuf;

pub type Result<T, E = MymakeError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum MymakeError {
    #[error("IO error on {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },

    #[error("config error: {message} ({key})")]
    Config { key: String, message: String },

    #[error("{file}:{line}: {message}")]
    Resolution { file: PathBuf, line: usize, message: String },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn { command: String, #[source] source: std::io::Error },

    #[error("failed to wait for child process: {0}")]
    Wait(std::io::Error),

    #[error("dependency cycle among targets: {}", .nodes.join(" -> "))]
    Cycle { nodes: Vec<String> },

    #[error("{file}: pch must be included first in every implementation file")]
    PchOrder { file: PathBuf },

    #[error("target `{0}` has no compile units")]
    EmptyTarget(String),

    #[error("target `{0}` not found")]
    UnknownTarget(String),

    #[error("compile failed for {0}")]
    CompileFailed(PathBuf),

    #[error("link failed for {0}")]
    LinkFailed(PathBuf),

    #[error("{0}")]
    Other(String),
}

impl MymakeError {
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config { key: key.into(), message: message.into() }
    }

    pub fn resolution(file: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::Resolution { file: file.into(), line, message: message.into() }
    }
}
