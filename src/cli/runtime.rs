use std::path::PathBuf;

use crate::{
    error::{Result, VaultError},
    host::{HostDevices, SystemExecutor},
    identity::{manifest_search_paths, resolve_manifest_path},
    manifest::Manifest,
    settings::VaultSettings,
};

/// Per-invocation inputs resolved from the process environment.
pub(crate) struct CliState {
    pub(crate) settings: VaultSettings,
    pub(crate) cwd: PathBuf,
}

pub(crate) fn load_state() -> Result<CliState> {
    let settings = VaultSettings::from_process_env()?;
    let cwd = std::env::current_dir()?;
    tracing::debug!(user = %settings.service_user, cwd = %cwd.display(), "workspace selected");
    Ok(CliState { settings, cwd })
}

pub(crate) fn load_manifest(state: &CliState) -> Result<Manifest> {
    let workspace_root = &state.settings.workspace_root;
    let path = resolve_manifest_path(&state.cwd, workspace_root).ok_or_else(|| {
        VaultError::ManifestNotFound {
            searched: manifest_search_paths(&state.cwd, workspace_root),
        }
    })?;
    tracing::debug!(path = %path.display(), "manifest located");
    Manifest::load(&path)
}

pub(crate) fn system_host(settings: &VaultSettings) -> HostDevices<SystemExecutor> {
    HostDevices::new(SystemExecutor::new(settings.use_sudo)).with_device_wait(settings.device_wait)
}
