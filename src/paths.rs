use std::path::{Path, PathBuf};

/// Shell-sourceable binding file inside the mounted vault.
pub const ENV_FILE_NAME: &str = ".env-infisical";
/// Structured binding list inside the mounted vault.
pub const BINDINGS_FILE_NAME: &str = ".env-bindings.json";

/// Canonical path layout for vault runtime files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultPaths {
    home: PathBuf,
}

impl VaultPaths {
    /// Creates a path layout rooted at the operating user's home.
    pub fn new(home: impl AsRef<Path>) -> Self {
        Self {
            home: home.as_ref().to_path_buf(),
        }
    }

    /// Home directory.
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Persistent directory holding the container image.
    pub fn vault_dir(&self) -> PathBuf {
        self.home.join(".vault_persistent")
    }

    /// Container image.
    pub fn image(&self) -> PathBuf {
        self.vault_dir().join("vault.img")
    }

    /// Image under construction; renamed to [`Self::image`] once usable.
    pub fn partial_image(&self) -> PathBuf {
        self.vault_dir().join("vault.img.partial")
    }

    /// Mount target.
    pub fn secrets_dir(&self) -> PathBuf {
        self.home.join("secrets")
    }

    /// Shell binding file.
    pub fn env_file(&self) -> PathBuf {
        self.secrets_dir().join(ENV_FILE_NAME)
    }

    /// Structured binding file.
    pub fn bindings_file(&self) -> PathBuf {
        self.secrets_dir().join(BINDINGS_FILE_NAME)
    }

    /// Audit log JSONL file.
    pub fn audit_file(&self) -> PathBuf {
        self.vault_dir().join("audit.jsonl")
    }

    /// Lock directory.
    pub fn locks_dir(&self) -> PathBuf {
        self.vault_dir().join("locks")
    }

    /// Advisory lock file guarding the image and the mount target.
    ///
    /// Every workspace under one home shares the image, so they share the lock.
    pub fn lock_file(&self) -> PathBuf {
        self.locks_dir().join("vault.lock")
    }
}
