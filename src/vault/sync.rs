use crate::{
    console::Console,
    error::Result,
    fs_secure::write_secret_file,
    manifest::Manifest,
    paths::VaultPaths,
    store::SecretStore,
};

use super::env::{parse_dotenv, write_binding_files, BindingOrigin, EnvBindings};

/// Outcome of one synchronization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// The bulk export produced a block.
    pub bulk_exported: bool,
    /// Logical names written into the vault, in manifest order.
    pub materialized: Vec<String>,
    /// Logical names whose fetch returned nothing or failed.
    pub skipped: Vec<String>,
    /// Every binding persisted by this pass.
    pub bindings: EnvBindings,
}

/// Pulls remote secrets into a freshly mounted vault.
///
/// Individual fetch failures are skipped; only local write failures abort.
pub struct SecretSynchronizer<'a, S: ?Sized, C: ?Sized> {
    store: &'a S,
    console: &'a C,
    paths: &'a VaultPaths,
}

impl<'a, S, C> SecretSynchronizer<'a, S, C>
where
    S: SecretStore + ?Sized,
    C: Console + ?Sized,
{
    /// Constructs a synchronizer.
    pub fn new(store: &'a S, console: &'a C, paths: &'a VaultPaths) -> Self {
        Self {
            store,
            console,
            paths,
        }
    }

    /// Runs the bulk export and per-entry materialization once.
    pub fn sync(&self, manifest: &Manifest) -> Result<SyncReport> {
        self.console.progress("Syncing secrets...");
        let mut report = SyncReport::default();

        let bulk = match self.store.bulk_export() {
            Ok(bulk) => bulk,
            Err(error) => {
                tracing::warn!(%error, "bulk export failed; continuing without it");
                None
            }
        };
        if let Some(raw) = &bulk {
            report.bulk_exported = true;
            report.bindings.bindings.extend(parse_dotenv(raw));
        }

        let root = self.paths.secrets_dir();
        for entry in &manifest.secrets {
            let value = match self.store.get_secret(&entry.name) {
                Ok(Some(value)) if !value.is_empty() => value,
                Ok(_) => {
                    tracing::warn!(secret = %entry.name, "secret not found; skipping");
                    report.skipped.push(entry.name.clone());
                    continue;
                }
                Err(error) => {
                    tracing::warn!(%error, secret = %entry.name, "secret fetch failed; skipping");
                    report.skipped.push(entry.name.clone());
                    continue;
                }
            };

            let target = write_secret_file(&root, &entry.file, value.as_bytes())?;
            if let Some(variable) = &entry.env {
                report.bindings.push(
                    variable,
                    target.to_string_lossy(),
                    BindingOrigin::Entry,
                );
            }
            report.materialized.push(entry.name.clone());
        }

        write_binding_files(self.paths, bulk.as_deref(), &report.bindings)?;
        tracing::debug!(
            materialized = report.materialized.len(),
            skipped = report.skipped.len(),
            "secrets synchronized"
        );
        Ok(report)
    }
}
