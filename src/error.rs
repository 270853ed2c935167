//! Error types for the projection engine

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProjectionError>;

#[derive(Error, Debug)]
pub enum ProjectionError {
    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("Parse error in {file}: {message}")]
    Parse { file: PathBuf, message: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid arena header: {0}")]
    ArenaInvalid(String),

    #[error("DB image ({needed} bytes) exceeds arena buffer ({capacity} bytes)")]
    Overflow { needed: u64, capacity: u64 },

    #[error("Corrupt file: {0}")]
    Corruption(String),

    #[error("Arena path too long ({0} bytes, max 255)")]
    PathOverflow(usize),

    #[error("Unsupported language: {0}")]
    Language(String),

    #[error("Selector error: {0}")]
    Selector(String),
}

impl ProjectionError {
    /// Map to the closest POSIX errno for the filesystem adapter.
    pub fn errno(&self) -> i32 {
        match self {
            ProjectionError::NotFound(_) => libc::ENOENT,
            ProjectionError::NotADirectory(_) => libc::ENOTDIR,
            ProjectionError::IsADirectory(_) => libc::EISDIR,
            ProjectionError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            ProjectionError::Overflow { .. } => libc::ENOSPC,
            _ => libc::EIO,
        }
    }
}
