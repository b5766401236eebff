use std::path::Path;

use crate::{
    audit::{AuditEvent, AuditLog},
    console::Console,
    error::{Result, VaultError},
    fs_secure::ensure_private_dir,
    host::DeviceHost,
    identity::{mapper_name, MapperName},
    manifest::Manifest,
    passphrase::{PassphraseVerifier, TrustBasis},
    paths::VaultPaths,
    settings::VaultSettings,
    store::SecretStore,
};

use super::{
    container::ContainerManager,
    env::EnvEmitter,
    lock::WorkspaceLock,
    mount::MountSupervisor,
    sync::{SecretSynchronizer, SyncReport},
};

/// What `up` had to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpOutcome {
    /// The vault was already mounted; only bindings were re-emitted.
    AlreadyMounted,
    /// The vault was unlocked (or created), mounted and populated.
    Provisioned {
        /// The container was created during this run.
        created: bool,
        /// How the passphrase was trusted.
        trust: TrustBasis,
        /// Synchronization result.
        sync: SyncReport,
    },
}

/// Result of `up`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpReport {
    /// What happened.
    pub outcome: UpOutcome,
    /// Export lines for the calling shell.
    pub lines: Vec<String>,
}

/// Sequences the vault lifecycle for one workspace.
pub struct VaultLifecycle<'a, H: ?Sized, C: ?Sized> {
    settings: &'a VaultSettings,
    paths: VaultPaths,
    mapper: MapperName,
    host: &'a H,
    console: &'a C,
}

impl<'a, H, C> VaultLifecycle<'a, H, C>
where
    H: DeviceHost + ?Sized,
    C: Console + ?Sized,
{
    /// Binds the lifecycle to the workspace at `cwd`.
    pub fn new(settings: &'a VaultSettings, cwd: &Path, host: &'a H, console: &'a C) -> Self {
        Self {
            settings,
            paths: settings.paths(),
            mapper: mapper_name(cwd),
            host,
            console,
        }
    }

    /// Mapping name for this workspace.
    pub fn mapper(&self) -> &MapperName {
        &self.mapper
    }

    /// Path layout in use.
    pub fn paths(&self) -> &VaultPaths {
        &self.paths
    }

    /// Full bootstrap: verify, unlock or create, mount, sync, emit.
    ///
    /// When the vault is already mounted nothing but the mount probe runs
    /// before the existing bindings are returned.
    pub fn up<S: SecretStore + ?Sized>(&self, manifest: &Manifest, store: &S) -> Result<UpReport> {
        let _lock = self.lock()?;
        let mount = self.mount_supervisor();
        if mount.is_already_provisioned() {
            tracing::debug!(mapper = %self.mapper, "vault already mounted");
            return Ok(UpReport {
                outcome: UpOutcome::AlreadyMounted,
                lines: self.env()?,
            });
        }

        let containers = self.container_manager();
        let container_exists = containers.image_exists();
        let passphrase = PassphraseVerifier::new(store, self.console, &self.settings.hash_secret_name)
            .establish(container_exists)?;

        ensure_private_dir(&self.paths.vault_dir())?;
        let audit = AuditLog::new(self.paths.audit_file())?;
        if let TrustBasis::Bootstrapped { published } = passphrase.basis() {
            audit.log(AuditEvent::PassphraseBootstrapped {
                mapper: self.mapper.to_string(),
                published,
            })?;
        }

        containers.reconcile_stale();
        self.console.progress(if container_exists {
            "Unlocking vault..."
        } else {
            "Creating vault..."
        });
        let session = match containers.open(passphrase.expose()) {
            Ok(session) => session,
            Err(VaultError::DecryptionFailed) => {
                audit.log(AuditEvent::DecryptionFailed {
                    mapper: self.mapper.to_string(),
                })?;
                return Err(VaultError::DecryptionFailed);
            }
            Err(error) => return Err(error),
        };
        let created = session.created();
        audit.log(if created {
            AuditEvent::ContainerCreated {
                mapper: self.mapper.to_string(),
                size_mib: self.settings.image_size_mib,
            }
        } else {
            AuditEvent::ContainerUnlocked {
                mapper: self.mapper.to_string(),
                offline: passphrase.basis() == TrustBasis::Offline,
            }
        })?;

        mount.mount(session.mapped_device())?;
        session.keep();
        audit.log(AuditEvent::VaultMounted {
            mapper: self.mapper.to_string(),
            mount_point: self.paths.secrets_dir(),
        })?;

        let sync = SecretSynchronizer::new(store, self.console, &self.paths).sync(manifest)?;
        audit.log(AuditEvent::SecretsSynced {
            mapper: self.mapper.to_string(),
            bulk_exported: sync.bulk_exported,
            materialized: sync.materialized.len(),
            skipped: sync.skipped.len(),
        })?;
        self.console.progress("Vault secured.");

        Ok(UpReport {
            outcome: UpOutcome::Provisioned {
                created,
                trust: passphrase.basis(),
                sync,
            },
            lines: self.env()?,
        })
    }

    /// Unmounts and closes; returns whether a mount was removed.
    ///
    /// Runs under the same lock as `up` from any workspace of this home.
    pub fn down(&self) -> Result<bool> {
        let _lock = self.lock()?;
        self.console.progress("Locking vault...");
        let was_mounted = self.mount_supervisor().unmount()?;
        if !self.container_manager().close_container()? {
            self.console
                .progress("Vault image is still attached; another workspace mapping may hold it.");
        }

        AuditLog::new(self.paths.audit_file())?.log(AuditEvent::VaultLocked {
            mapper: self.mapper.to_string(),
            was_mounted,
        })?;
        self.console.progress("Vault locked.");
        Ok(was_mounted)
    }

    /// Previously materialized export lines.
    pub fn env(&self) -> Result<Vec<String>> {
        EnvEmitter::new(&self.paths).lines()
    }

    fn lock(&self) -> Result<WorkspaceLock> {
        WorkspaceLock::acquire(&self.paths.lock_file(), self.console)
    }

    fn mount_supervisor(&self) -> MountSupervisor<'_, H> {
        MountSupervisor::new(self.host, &self.paths, &self.settings.service_user)
    }

    fn container_manager(&self) -> ContainerManager<'_, H> {
        ContainerManager::new(
            self.host,
            &self.paths,
            &self.mapper,
            self.settings.image_size_bytes(),
        )
    }
}
