use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};

use crate::{
    error::Result,
    fs_secure::{create_private_file_if_missing, set_permissions, PRIVATE_FILE_MODE},
};

/// Audit events emitted by the vault lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A new passphrase was chosen for the project.
    PassphraseBootstrapped {
        /// Workspace mapping name.
        mapper: String,
        /// The hash record reached the remote store.
        published: bool,
    },
    /// A new container image was created.
    ContainerCreated {
        /// Workspace mapping name.
        mapper: String,
        /// Image size in MiB.
        size_mib: u64,
    },
    /// An existing container was decrypted.
    ContainerUnlocked {
        /// Workspace mapping name.
        mapper: String,
        /// Trust came from decryption alone.
        offline: bool,
    },
    /// An existing container rejected the passphrase.
    DecryptionFailed {
        /// Workspace mapping name.
        mapper: String,
    },
    /// The vault filesystem was mounted.
    VaultMounted {
        /// Workspace mapping name.
        mapper: String,
        /// Mount target.
        mount_point: PathBuf,
    },
    /// Secrets were written into a freshly mounted vault.
    SecretsSynced {
        /// Workspace mapping name.
        mapper: String,
        /// Bulk export block was written.
        bulk_exported: bool,
        /// Target files written.
        materialized: usize,
        /// Entries skipped because the fetch returned nothing.
        skipped: usize,
    },
    /// The vault was unmounted and its container closed.
    VaultLocked {
        /// Workspace mapping name.
        mapper: String,
        /// A mount was actually removed.
        was_mounted: bool,
    },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct AuditLine {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    event: AuditEvent,
}

/// JSONL append-only audit log writer.
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Opens (creating if needed) the audit log at `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let file_path = path.as_ref().to_path_buf();
        create_private_file_if_missing(&file_path, b"")?;
        set_permissions(&file_path, PRIVATE_FILE_MODE)?;
        Ok(Self { path: file_path })
    }

    /// Appends one event as a JSON line.
    pub fn log(&self, event: AuditEvent) -> Result<()> {
        let line = AuditLine {
            timestamp: Utc::now(),
            event,
        };

        let mut encoded = serde_json::to_vec(&line)?;
        encoded.push(b'\n');
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(&encoded)?;
        Ok(())
    }

    /// Reads back every recorded event, oldest first.
    pub fn events(&self) -> Result<Vec<AuditEvent>> {
        let raw = std::fs::read_to_string(&self.path)?;
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| Ok(serde_json::from_str::<AuditLine>(line)?.event))
            .collect()
    }

    /// Returns the audit file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
