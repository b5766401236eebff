use std::{io, path::PathBuf};

use thiserror::Error;

/// Top-level application errors.
#[derive(Debug, Error)]
pub enum VaultError {
    /// No manifest was found in any searched location.
    #[error("secrets.yml not found in {}", display_paths(.searched))]
    ManifestNotFound {
        /// Locations that were checked, in order.
        searched: Vec<PathBuf>,
    },
    /// Manifest parsed but failed validation.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
    /// Settings could not be resolved.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The container rejected the passphrase or is corrupt.
    #[error("decryption failed")]
    DecryptionFailed,
    /// A mutating collaborator call failed.
    #[error("{program} failed: {detail}")]
    CommandFailed {
        /// Program that was invoked.
        program: String,
        /// Trimmed stderr or status description.
        detail: String,
    },
    /// The mapping was created but its device node never appeared.
    #[error("mapped device did not appear: {}", .0.display())]
    DeviceNotReady(PathBuf),
    /// A required executable is not installed.
    #[error("required binary not found: {0}")]
    MissingBinary(String),
    /// The stored passphrase hash uses a scheme this tool cannot verify.
    #[error("unsupported passphrase hash: {0}")]
    UnsupportedHash(String),
    /// Interactive input was unavailable.
    #[error("prompt failed: {0}")]
    Prompt(String),
    /// The per-workspace lock could not be taken.
    #[error("workspace lock unavailable: {}", .0.display())]
    LockUnavailable(PathBuf),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// JSON serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// YAML manifest syntax error.
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    /// TOML settings syntax error.
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    /// UTF-8 conversion error.
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// A typed result used across the crate.
pub type Result<T> = std::result::Result<T, VaultError>;

impl VaultError {
    /// Builds [`VaultError::CommandFailed`] with `detail` folded onto one line.
    pub fn command_failed(program: impl Into<String>, detail: &str) -> Self {
        VaultError::CommandFailed {
            program: program.into(),
            detail: detail.split_whitespace().collect::<Vec<_>>().join(" "),
        }
    }

    /// Returns true for errors raised before any state was mutated.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            VaultError::ManifestNotFound { .. }
                | VaultError::InvalidManifest(_)
                | VaultError::InvalidConfig(_)
                | VaultError::Yaml(_)
                | VaultError::Toml(_)
        )
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(" or ")
}
