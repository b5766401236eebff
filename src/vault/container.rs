use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use crate::{
    error::{Result, VaultError},
    fs_secure::ensure_private_dir,
    host::{DeviceHost, FormatRequest, OpenRequest},
    identity::MapperName,
    paths::VaultPaths,
};

const ZERO_CHUNK_BYTES: usize = 1024 * 1024;

/// Transient loop attachment and mapping for one unlock session.
///
/// Dropping an armed session closes the mapping whenever it exists and then
/// detaches the loop device; [`UnlockedContainer::keep`] hands both over to
/// the mount.
pub struct UnlockedContainer<'a, H: DeviceHost + ?Sized> {
    host: &'a H,
    mapper: MapperName,
    loop_device: PathBuf,
    mapped_device: Option<PathBuf>,
    mapping_open: bool,
    created: bool,
    armed: bool,
}

impl<'a, H: DeviceHost + ?Sized> UnlockedContainer<'a, H> {
    fn attached(host: &'a H, mapper: &MapperName, loop_device: PathBuf) -> Self {
        Self {
            host,
            mapper: mapper.clone(),
            loop_device,
            mapped_device: None,
            mapping_open: false,
            created: false,
            armed: true,
        }
    }

    /// Loop device backing the image.
    pub fn loop_device(&self) -> &Path {
        &self.loop_device
    }

    /// Plaintext device ready for mounting.
    pub fn mapped_device(&self) -> &Path {
        self.mapped_device.as_deref().unwrap_or(&self.loop_device)
    }

    /// True when this session created the container.
    pub fn created(&self) -> bool {
        self.created
    }

    /// Leaves the mapping and loop attachment in place.
    pub fn keep(mut self) {
        self.armed = false;
    }

    /// Opens the mapping over the attached loop device.
    ///
    /// On failure the mapping state is queried again: the mapping can exist
    /// even when the device node never showed up.
    fn map(&mut self, passphrase: &str) -> Result<()> {
        let opened = self.host.open(&OpenRequest {
            device: &self.loop_device,
            mapper: &self.mapper,
            passphrase,
        });
        match opened {
            Ok(mapped) => {
                self.mapped_device = Some(mapped);
                self.mapping_open = true;
                Ok(())
            }
            Err(error) => {
                self.mapping_open = self.host.is_open(&self.mapper).unwrap_or_else(|status_error| {
                    tracing::warn!(error = %status_error, mapper = %self.mapper, "mapping status check failed after open");
                    true
                });
                Err(error)
            }
        }
    }
}

impl<H: DeviceHost + ?Sized> Drop for UnlockedContainer<'_, H> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.mapping_open {
            if let Err(error) = self.host.close(&self.mapper) {
                tracing::warn!(%error, mapper = %self.mapper, "closing mapping during cleanup failed");
            }
        }
        if let Err(error) = self.host.detach(&self.loop_device) {
            tracing::warn!(%error, device = %self.loop_device.display(), "detaching loop device during cleanup failed");
        }
    }
}

/// Creates, unlocks and closes one workspace's encrypted container.
pub struct ContainerManager<'a, H: ?Sized> {
    host: &'a H,
    paths: &'a VaultPaths,
    mapper: &'a MapperName,
    image_size_bytes: u64,
}

impl<'a, H: DeviceHost + ?Sized> ContainerManager<'a, H> {
    /// Constructs a container manager.
    pub fn new(
        host: &'a H,
        paths: &'a VaultPaths,
        mapper: &'a MapperName,
        image_size_bytes: u64,
    ) -> Self {
        Self {
            host,
            paths,
            mapper,
            image_size_bytes,
        }
    }

    /// Existence of the image is evidence that a passphrase was chosen.
    pub fn image_exists(&self) -> bool {
        self.paths.image().is_file()
    }

    /// Unlocks the existing container or creates a new one.
    pub fn open(&self, passphrase: &str) -> Result<UnlockedContainer<'a, H>> {
        match self.ensure_container(passphrase)? {
            Some(created) => Ok(created),
            None => self.unlock_container(passphrase),
        }
    }

    /// Creates the container when the image is missing.
    ///
    /// Returns `Ok(None)` without touching anything when the image exists.
    /// The image is built under a temporary name and only renamed into
    /// place after the filesystem exists, so a crash never leaves a
    /// half-formatted `vault.img` behind.
    pub fn ensure_container(&self, passphrase: &str) -> Result<Option<UnlockedContainer<'a, H>>> {
        if self.image_exists() {
            return Ok(None);
        }

        let partial = self.paths.partial_image();
        ensure_private_dir(&self.paths.vault_dir())?;
        self.detach_backing(&partial);
        allocate_zeroed_image(&partial, self.image_size_bytes)?;

        let loop_device = self.host.attach(&partial)?;
        let mut session = UnlockedContainer::attached(self.host, self.mapper, loop_device);
        self.host.format(&FormatRequest {
            device: session.loop_device(),
            passphrase,
        })?;
        session.map(passphrase)?;
        self.host.make_filesystem(session.mapped_device())?;

        fs::rename(&partial, self.paths.image())?;
        session.created = true;
        tracing::debug!(mapper = %self.mapper, "container created");
        Ok(Some(session))
    }

    /// Attaches the existing image and opens its mapping.
    ///
    /// A rejected passphrase detaches the loop device before returning
    /// [`VaultError::DecryptionFailed`]. Only a failed `open` that left no
    /// mapping behind counts as a rejection.
    pub fn unlock_container(&self, passphrase: &str) -> Result<UnlockedContainer<'a, H>> {
        let loop_device = self.host.attach(&self.paths.image())?;
        let mut session = UnlockedContainer::attached(self.host, self.mapper, loop_device);
        match session.map(passphrase) {
            Ok(()) => Ok(session),
            Err(VaultError::CommandFailed { program, detail }) if !session.mapping_open => {
                tracing::debug!(%program, %detail, "open rejected");
                drop(session);
                Err(VaultError::DecryptionFailed)
            }
            Err(error) => Err(error),
        }
    }

    /// Closes a mapping left open by an interrupted session.
    ///
    /// Only meaningful while the vault is not mounted.
    pub fn reconcile_stale(&self) {
        match self.host.is_open(self.mapper) {
            Ok(false) => return,
            Ok(true) => tracing::warn!(mapper = %self.mapper, "closing stale mapping"),
            Err(error) => {
                tracing::warn!(%error, "mapping probe failed");
                return;
            }
        }
        if let Err(error) = self.host.close(self.mapper) {
            tracing::warn!(%error, mapper = %self.mapper, "closing stale mapping failed");
        }
        self.detach_backing(&self.paths.image());
    }

    /// Best-effort teardown: close the mapping, then detach every loop device
    /// backing the image.
    ///
    /// Returns false when a loop device still backs the image afterwards,
    /// which happens while another workspace's mapping holds it.
    pub fn close_container(&self) -> Result<bool> {
        let open = self.host.is_open(self.mapper).unwrap_or_else(|error| {
            tracing::warn!(%error, "mapping probe failed; attempting close anyway");
            true
        });
        if open {
            if let Err(error) = self.host.close(self.mapper) {
                tracing::warn!(%error, mapper = %self.mapper, "closing mapping failed");
            }
        }
        self.detach_backing(&self.paths.image());
        self.detach_backing(&self.paths.partial_image());

        let image = self.paths.image();
        if !image.exists() {
            return Ok(true);
        }
        match self.host.backing_devices(&image) {
            Ok(remaining) if remaining.is_empty() => Ok(true),
            Ok(remaining) => {
                tracing::warn!(devices = ?remaining, image = %image.display(), "image still attached after close");
                Ok(false)
            }
            Err(error) => {
                tracing::warn!(%error, image = %image.display(), "loop association probe failed");
                Ok(true)
            }
        }
    }

    fn detach_backing(&self, image: &Path) {
        if !image.exists() {
            return;
        }
        let devices = match self.host.backing_devices(image) {
            Ok(devices) => devices,
            Err(error) => {
                tracing::warn!(%error, image = %image.display(), "loop association probe failed");
                return;
            }
        };
        for device in devices {
            if let Err(error) = self.host.detach(&device) {
                tracing::warn!(%error, device = %device.display(), "detaching loop device failed");
            }
        }
    }
}

fn allocate_zeroed_image(path: &Path, size_bytes: u64) -> Result<()> {
    let mut file = File::create(path)?;
    let chunk = vec![0_u8; ZERO_CHUNK_BYTES];
    let mut remaining = size_bytes;
    while remaining > 0 {
        let step = remaining.min(ZERO_CHUNK_BYTES as u64) as usize;
        file.write_all(&chunk[..step])?;
        remaining -= step as u64;
    }
    file.sync_all()?;
    Ok(())
}
