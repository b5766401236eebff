use std::{fs, path::Path};

use crate::{
    error::Result,
    host::{FilesystemService, MountRequest, VAULT_FS_TYPE},
    paths::VaultPaths,
};

/// Mounts and unmounts the unlocked container at the secrets directory.
///
/// The mount state of the secrets directory is the lifecycle's only
/// idempotency key.
pub struct MountSupervisor<'a, H: ?Sized> {
    host: &'a H,
    paths: &'a VaultPaths,
    service_user: &'a str,
}

impl<'a, H: FilesystemService + ?Sized> MountSupervisor<'a, H> {
    /// Constructs a supervisor.
    pub fn new(host: &'a H, paths: &'a VaultPaths, service_user: &'a str) -> Self {
        Self {
            host,
            paths,
            service_user,
        }
    }

    /// True iff the secrets directory is currently a mount point.
    pub fn is_already_provisioned(&self) -> bool {
        match self.host.is_mount_point(&self.paths.secrets_dir()) {
            Ok(mounted) => mounted,
            Err(error) => {
                tracing::warn!(%error, "mount probe failed; assuming not mounted");
                false
            }
        }
    }

    /// Mounts `mapped_device` and hands ownership to the service user.
    pub fn mount(&self, mapped_device: &Path) -> Result<()> {
        let mount_point = self.paths.secrets_dir();
        fs::create_dir_all(&mount_point)?;
        self.host.mount(&MountRequest {
            device: mapped_device.to_path_buf(),
            mount_point: mount_point.clone(),
            fs_type: VAULT_FS_TYPE.to_owned(),
        })?;
        self.host.chown_recursive(&mount_point, self.service_user)?;
        tracing::debug!(mount_point = %mount_point.display(), "vault mounted");
        Ok(())
    }

    /// Force-unmounts the vault; returns false when nothing was mounted.
    pub fn unmount(&self) -> Result<bool> {
        if !self.is_already_provisioned() {
            return Ok(false);
        }
        self.host.unmount(&self.paths.secrets_dir())?;
        Ok(true)
    }
}
