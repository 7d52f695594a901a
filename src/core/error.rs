//! Error taxonomy for vault operations

use std::path::PathBuf;

use thiserror::Error;

/// Typed failure returned by every filesystem-touching vault primitive
#[derive(Debug, Error)]
pub enum VaultError {
    /// The resolved path leaves the vault root
    #[error("path escapes the notes directory: {0}")]
    PathEscape(String),
    /// The path touches a directory listed in the skip set
    #[error("cannot access content in skipped directory: {0}")]
    SkippedDirectory(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Illegal characters, reserved device names, leading or trailing dot
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
    /// Extension or sniffed content not permitted
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("no file provided")]
    MissingUpload,
    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The notes directory candidate failed validation
    #[error("invalid notes directory: {0}")]
    InvalidRoot(String),
    /// The settings collaborator failed to persist a value
    #[error("settings persistence failed: {0:#}")]
    Settings(anyhow::Error),
    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl VaultError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable kind, used by callers mapping errors to responses
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PathEscape(_) => "path_escape",
            Self::SkippedDirectory(_) => "skipped_directory",
            Self::NotFound(_) => "not_found",
            Self::InvalidName(_) => "invalid_name",
            Self::AlreadyExists(_) => "already_exists",
            Self::UnsupportedType(_) => "unsupported_type",
            Self::MissingUpload => "missing_upload",
            Self::TooLarge { .. } => "too_large",
            Self::InvalidConfig(_) => "invalid_config",
            Self::InvalidRoot(_) => "invalid_root",
            Self::Settings(_) => "settings_failure",
            Self::Io { .. } => "io_failure",
        }
    }
}

pub type VaultResult<T> = Result<T, VaultError>;
