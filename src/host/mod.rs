//! Narrow contracts for the host services a vault depends on.

/// Privileged command execution.
pub mod exec;
/// System implementation backed by losetup, cryptsetup and friends.
pub mod system;

use std::path::{Path, PathBuf};

use crate::{error::Result, identity::MapperName};

pub use exec::{Invocation, InvocationOutput, PrivilegedExecutor, SystemExecutor};
pub use system::{HostBinaries, HostDevices};

/// Filesystem type created inside every container.
pub const VAULT_FS_TYPE: &str = "ext4";

/// Request payload for initializing an encrypted volume.
pub struct FormatRequest<'a> {
    /// Block device to format; prior contents are destroyed.
    pub device: &'a Path,
    /// Master passphrase.
    pub passphrase: &'a str,
}

/// Request payload for opening an encrypted volume.
pub struct OpenRequest<'a> {
    /// Block device holding the encrypted volume.
    pub device: &'a Path,
    /// Name of the plaintext mapping to create.
    pub mapper: &'a MapperName,
    /// Master passphrase.
    pub passphrase: &'a str,
}

/// Request payload for mounting a plaintext device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    /// Device to mount.
    pub device: PathBuf,
    /// Target directory.
    pub mount_point: PathBuf,
    /// Filesystem type.
    pub fs_type: String,
}

/// Attaches image files to loop device nodes.
pub trait LoopbackManager {
    /// Attaches `image` to the first free loop device and returns its node.
    fn attach(&self, image: &Path) -> Result<PathBuf>;
    /// Detaches one loop device.
    fn detach(&self, device: &Path) -> Result<()>;
    /// Loop devices currently backed by `image`.
    fn backing_devices(&self, image: &Path) -> Result<Vec<PathBuf>>;
}

/// Block-encryption service.
pub trait BlockEncryption {
    /// Initializes an encrypted volume on `request.device`.
    fn format(&self, request: &FormatRequest<'_>) -> Result<()>;
    /// Opens the volume and returns the mapped plaintext device node.
    fn open(&self, request: &OpenRequest<'_>) -> Result<PathBuf>;
    /// Closes the mapping; succeeds when nothing is open.
    fn close(&self, mapper: &MapperName) -> Result<()>;
    /// Returns true when the mapping currently exists.
    fn is_open(&self, mapper: &MapperName) -> Result<bool>;
}

/// Filesystem formatter and mounter.
pub trait FilesystemService {
    /// Creates an empty filesystem on `device`.
    fn make_filesystem(&self, device: &Path) -> Result<()>;
    /// Mounts a device.
    fn mount(&self, request: &MountRequest) -> Result<()>;
    /// Force-unmounts a mount point.
    fn unmount(&self, mount_point: &Path) -> Result<()>;
    /// Returns true when `path` is currently a mount point.
    fn is_mount_point(&self, path: &Path) -> Result<bool>;
    /// Recursively assigns `owner:owner` to `path`.
    fn chown_recursive(&self, path: &Path, owner: &str) -> Result<()>;
}

/// Every host service the container manager and mount supervisor need.
pub trait DeviceHost: LoopbackManager + BlockEncryption + FilesystemService {}

impl<T> DeviceHost for T where T: LoopbackManager + BlockEncryption + FilesystemService + ?Sized {}
