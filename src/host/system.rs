use std::{
    fs, io,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use crate::{
    error::{Result, VaultError},
    identity::MapperName,
};

use super::{
    exec::{Invocation, PrivilegedExecutor},
    BlockEncryption, FilesystemService, FormatRequest, LoopbackManager, MountRequest, OpenRequest,
};

const DEVICE_POLL_INTERVAL: Duration = Duration::from_millis(200);
const DEFAULT_DEVICE_WAIT: Duration = Duration::from_secs(4);

/// Binary names used by [`HostDevices`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBinaries {
    /// Loop device manager.
    pub losetup: String,
    /// LUKS front end.
    pub cryptsetup: String,
    /// Filesystem creator.
    pub mkfs: String,
    /// Mounter.
    pub mount: String,
    /// Unmounter.
    pub umount: String,
    /// Ownership changer.
    pub chown: String,
}

impl Default for HostBinaries {
    fn default() -> Self {
        Self {
            losetup: "losetup".to_owned(),
            cryptsetup: "cryptsetup".to_owned(),
            mkfs: "mkfs.ext4".to_owned(),
            mount: "mount".to_owned(),
            umount: "umount".to_owned(),
            chown: "chown".to_owned(),
        }
    }
}

/// System loop/LUKS/ext4 driver.
///
/// Every mutation runs through the injected [`PrivilegedExecutor`]; the
/// mount-point probe is answered in-process.
#[derive(Debug, Clone)]
pub struct HostDevices<E> {
    executor: E,
    binaries: HostBinaries,
    device_wait: Duration,
}

impl<E: PrivilegedExecutor> HostDevices<E> {
    /// Constructs a driver using default binary names.
    pub fn new(executor: E) -> Self {
        Self::with_binaries(executor, HostBinaries::default())
    }

    /// Constructs a driver with custom binaries.
    pub fn with_binaries(executor: E, binaries: HostBinaries) -> Self {
        Self {
            executor,
            binaries,
            device_wait: DEFAULT_DEVICE_WAIT,
        }
    }

    /// Overrides how long [`BlockEncryption::open`] waits for the mapped node.
    pub fn with_device_wait(mut self, device_wait: Duration) -> Self {
        self.device_wait = device_wait;
        self
    }

    fn run_checked(&self, invocation: Invocation<'_>) -> Result<String> {
        let program = invocation.program;
        let output = self.executor.run(&invocation)?.require_success(program)?;
        Ok(output.stdout)
    }

    fn wait_for_device(&self, device: &Path) -> Result<()> {
        let deadline = Instant::now() + self.device_wait;
        loop {
            if device.exists() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(VaultError::DeviceNotReady(device.to_path_buf()));
            }
            thread::sleep(DEVICE_POLL_INTERVAL);
        }
    }
}

impl<E: PrivilegedExecutor> LoopbackManager for HostDevices<E> {
    fn attach(&self, image: &Path) -> Result<PathBuf> {
        let stdout = self.run_checked(Invocation::new(
            &self.binaries.losetup,
            ["-f".into(), "--show".into(), image.as_os_str().to_owned()],
        ))?;
        let device = stdout.trim();
        if device.is_empty() {
            return Err(VaultError::command_failed(
                self.binaries.losetup.as_str(),
                "no loop device reported",
            ));
        }
        Ok(PathBuf::from(device))
    }

    fn detach(&self, device: &Path) -> Result<()> {
        self.run_checked(Invocation::new(
            &self.binaries.losetup,
            ["-d".into(), device.as_os_str().to_owned()],
        ))?;
        Ok(())
    }

    fn backing_devices(&self, image: &Path) -> Result<Vec<PathBuf>> {
        let output = self.executor.run(&Invocation::new(
            &self.binaries.losetup,
            ["-j".into(), image.as_os_str().to_owned()],
        ))?;
        if !output.success() {
            return Ok(Vec::new());
        }
        Ok(parse_losetup_associations(&output.stdout))
    }
}

impl<E: PrivilegedExecutor> BlockEncryption for HostDevices<E> {
    fn format(&self, request: &FormatRequest<'_>) -> Result<()> {
        let invocation = Invocation::new(
            &self.binaries.cryptsetup,
            [
                "luksFormat".into(),
                "--batch-mode".into(),
                "--key-file=-".into(),
                request.device.as_os_str().to_owned(),
            ],
        )
        .with_stdin(request.passphrase.as_bytes());
        self.run_checked(invocation)?;
        Ok(())
    }

    fn open(&self, request: &OpenRequest<'_>) -> Result<PathBuf> {
        let invocation = Invocation::new(
            &self.binaries.cryptsetup,
            [
                "open".into(),
                "--key-file=-".into(),
                request.device.as_os_str().to_owned(),
                request.mapper.as_str().into(),
            ],
        )
        .with_stdin(request.passphrase.as_bytes());
        self.run_checked(invocation)?;

        let mapped = request.mapper.device_path();
        self.wait_for_device(&mapped)?;
        Ok(mapped)
    }

    fn close(&self, mapper: &MapperName) -> Result<()> {
        if !self.is_open(mapper)? {
            return Ok(());
        }
        self.run_checked(Invocation::new(
            &self.binaries.cryptsetup,
            ["close", mapper.as_str()],
        ))?;
        Ok(())
    }

    fn is_open(&self, mapper: &MapperName) -> Result<bool> {
        let output = self.executor.run(&Invocation::new(
            &self.binaries.cryptsetup,
            ["status", mapper.as_str()],
        ))?;
        Ok(output.success())
    }
}

impl<E: PrivilegedExecutor> FilesystemService for HostDevices<E> {
    fn make_filesystem(&self, device: &Path) -> Result<()> {
        self.run_checked(Invocation::new(
            &self.binaries.mkfs,
            ["-q".into(), device.as_os_str().to_owned()],
        ))?;
        Ok(())
    }

    fn mount(&self, request: &MountRequest) -> Result<()> {
        self.run_checked(Invocation::new(
            &self.binaries.mount,
            [
                "-t".into(),
                request.fs_type.clone().into(),
                request.device.as_os_str().to_owned(),
                request.mount_point.as_os_str().to_owned(),
            ],
        ))?;
        Ok(())
    }

    fn unmount(&self, mount_point: &Path) -> Result<()> {
        self.run_checked(Invocation::new(
            &self.binaries.umount,
            ["-f".into(), mount_point.as_os_str().to_owned()],
        ))?;
        Ok(())
    }

    fn is_mount_point(&self, path: &Path) -> Result<bool> {
        Ok(is_mount_point(path)?)
    }

    fn chown_recursive(&self, path: &Path, owner: &str) -> Result<()> {
        self.run_checked(Invocation::new(
            &self.binaries.chown,
            [
                "-R".into(),
                format!("{owner}:{owner}").into(),
                path.as_os_str().to_owned(),
            ],
        ))?;
        Ok(())
    }
}

/// Same-device/same-inode comparison with the parent directory.
pub fn is_mount_point(path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(error) => return Err(error),
    };
    if !metadata.is_dir() {
        return Ok(false);
    }
    let parent = fs::symlink_metadata(path.join(".."))?;
    Ok(metadata.dev() != parent.dev() || metadata.ino() == parent.ino())
}

/// Parses `losetup -j` lines of the form `/dev/loop3: []: (/path/vault.img)`.
pub fn parse_losetup_associations(stdout: &str) -> Vec<PathBuf> {
    stdout
        .lines()
        .filter_map(|line| line.split_once(':').map(|(device, _)| device.trim()))
        .filter(|device| !device.is_empty())
        .map(PathBuf::from)
        .collect()
}
