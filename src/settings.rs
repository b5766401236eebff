use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{
    error::{Result, VaultError},
    paths::VaultPaths,
};

/// Fixed workspace root searched after the current directory.
pub const DEFAULT_WORKSPACE_ROOT: &str = "/workspace";
/// Container image size in MiB.
pub const DEFAULT_IMAGE_SIZE_MIB: u64 = 512;
/// Remote secret holding the passphrase hash record.
pub const DEFAULT_HASH_SECRET_NAME: &str = "TAZPOD_PASSPHRASE_HASH";
/// Settings file looked up in the home directory.
pub const SETTINGS_FILE_NAME: &str = ".zt-vault.toml";
/// Explicit settings file override.
pub const CONFIG_ENV_VAR: &str = "ZT_VAULT_CONFIG";
/// Home directory override.
pub const HOME_ENV_VAR: &str = "ZT_VAULT_HOME";
/// Service user override.
pub const USER_ENV_VAR: &str = "ZT_VAULT_USER";
/// Workspace root override.
pub const WORKSPACE_ENV_VAR: &str = "ZT_VAULT_WORKSPACE";

const DEFAULT_DEVICE_WAIT: Duration = Duration::from_secs(4);
const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Where the effective settings file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsSource {
    /// Selected via `ZT_VAULT_CONFIG`.
    Env,
    /// Found at `<home>/.zt-vault.toml`.
    Discovered,
    /// Defaults and environment only.
    None,
}

/// Host layout and tunables shared by every component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultSettings {
    /// Operating user's home directory.
    pub home: PathBuf,
    /// Account that owns the mounted secrets.
    pub service_user: String,
    /// Workspace root searched for the manifest.
    pub workspace_root: PathBuf,
    /// Size of a newly allocated container image.
    pub image_size_mib: u64,
    /// Upper bound on waiting for the mapped device node.
    pub device_wait: Duration,
    /// Prefix privileged commands with `sudo`.
    pub use_sudo: bool,
    /// Remote secret name of the passphrase hash record.
    pub hash_secret_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    home: Option<PathBuf>,
    service_user: Option<String>,
    workspace_root: Option<PathBuf>,
    image_size_mib: Option<u64>,
    device_wait_ms: Option<u64>,
    use_sudo: Option<bool>,
    hash_secret_name: Option<String>,
}

impl VaultSettings {
    /// Constructs settings with defaults for everything but the identity.
    pub fn new(home: impl Into<PathBuf>, service_user: impl Into<String>) -> Self {
        Self {
            home: home.into(),
            service_user: service_user.into(),
            workspace_root: PathBuf::from(DEFAULT_WORKSPACE_ROOT),
            image_size_mib: DEFAULT_IMAGE_SIZE_MIB,
            device_wait: DEFAULT_DEVICE_WAIT,
            use_sudo: true,
            hash_secret_name: DEFAULT_HASH_SECRET_NAME.to_owned(),
        }
    }

    /// Derived on-disk layout.
    pub fn paths(&self) -> VaultPaths {
        VaultPaths::new(&self.home)
    }

    /// Image size in bytes.
    pub fn image_size_bytes(&self) -> u64 {
        self.image_size_mib.saturating_mul(BYTES_PER_MIB)
    }

    /// Resolves settings from the current process environment.
    pub fn from_process_env() -> Result<Self> {
        let is_root = nix::unistd::Uid::effective().is_root();
        let (settings, source) = Self::resolve(|key| std::env::var(key).ok(), is_root)?;
        tracing::debug!(?source, home = %settings.home.display(), "resolved settings");
        Ok(settings)
    }

    /// Resolves defaults, then the settings file, then environment overrides.
    pub fn resolve<F>(lookup: F, is_root: bool) -> Result<(Self, SettingsSource)>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup_non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let home = lookup_non_empty(HOME_ENV_VAR)
            .or_else(|| lookup_non_empty("HOME"))
            .map(PathBuf::from)
            .ok_or_else(|| VaultError::InvalidConfig("HOME is not set".to_owned()))?;
        let user = lookup_non_empty(USER_ENV_VAR)
            .or_else(|| lookup_non_empty("USER"))
            .ok_or_else(|| VaultError::InvalidConfig("USER is not set".to_owned()))?;

        let mut settings = Self::new(home.clone(), user);
        settings.use_sudo = !is_root;

        let (file, source) = match lookup_non_empty(CONFIG_ENV_VAR) {
            Some(raw) => (Some(load_settings_file(Path::new(&raw))?), SettingsSource::Env),
            None => {
                let discovered = home.join(SETTINGS_FILE_NAME);
                if discovered.is_file() {
                    (Some(load_settings_file(&discovered)?), SettingsSource::Discovered)
                } else {
                    (None, SettingsSource::None)
                }
            }
        };
        if let Some(file) = file {
            settings.apply_file(file);
        }

        if let Some(value) = lookup_non_empty(HOME_ENV_VAR) {
            settings.home = PathBuf::from(value);
        }
        if let Some(value) = lookup_non_empty(USER_ENV_VAR) {
            settings.service_user = value;
        }
        if let Some(value) = lookup_non_empty(WORKSPACE_ENV_VAR) {
            settings.workspace_root = PathBuf::from(value);
        }

        settings.validate()?;
        Ok((settings, source))
    }

    fn apply_file(&mut self, file: SettingsFile) {
        if let Some(home) = file.home {
            self.home = home;
        }
        if let Some(user) = file.service_user {
            self.service_user = user;
        }
        if let Some(root) = file.workspace_root {
            self.workspace_root = root;
        }
        if let Some(size) = file.image_size_mib {
            self.image_size_mib = size;
        }
        if let Some(millis) = file.device_wait_ms {
            self.device_wait = Duration::from_millis(millis);
        }
        if let Some(use_sudo) = file.use_sudo {
            self.use_sudo = use_sudo;
        }
        if let Some(name) = file.hash_secret_name {
            self.hash_secret_name = name;
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.home.is_absolute() {
            return Err(VaultError::InvalidConfig(format!(
                "home must be an absolute path: {}",
                self.home.display()
            )));
        }
        if self.service_user.is_empty()
            || self
                .service_user
                .chars()
                .any(|character| character == ':' || character.is_whitespace())
        {
            return Err(VaultError::InvalidConfig(format!(
                "invalid service user `{}`",
                self.service_user
            )));
        }
        if self.image_size_mib == 0 {
            return Err(VaultError::InvalidConfig(
                "image_size_mib must be greater than zero".to_owned(),
            ));
        }
        if self.image_size_mib.checked_mul(BYTES_PER_MIB).is_none() {
            return Err(VaultError::InvalidConfig(format!(
                "image_size_mib is too large: {}",
                self.image_size_mib
            )));
        }
        if self.hash_secret_name.trim().is_empty() {
            return Err(VaultError::InvalidConfig(
                "hash_secret_name cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

fn load_settings_file(path: &Path) -> Result<SettingsFile> {
    let raw = fs::read_to_string(path).map_err(|error| {
        VaultError::InvalidConfig(format!(
            "cannot read settings file {}: {error}",
            path.display()
        ))
    })?;
    Ok(toml::from_str(&raw)?)
}
