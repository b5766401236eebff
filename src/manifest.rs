use std::{
    collections::HashSet,
    fs,
    path::{Component, Path},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, VaultError},
    paths::{BINDINGS_FILE_NAME, ENV_FILE_NAME},
};

/// Remote-store settings section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestConfig {
    /// Remote project identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infisical_project_id: Option<String>,
    /// Remote API URL override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infisical_url: Option<String>,
}

/// One secret to materialize into the vault.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretEntry {
    /// Logical name in the remote store.
    pub name: String,
    /// Target file, relative to the vault root.
    pub file: String,
    /// Variable pointed at the target file, when declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
}

/// Per-workspace declaration of which secrets to materialize and where.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    /// Store settings.
    #[serde(default)]
    pub config: ManifestConfig,
    /// Entries in declaration order.
    #[serde(default)]
    pub secrets: Vec<SecretEntry>,
}

impl Manifest {
    /// Reads and validates a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    /// Parses and validates manifest text.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        // An empty document deserializes as unit, not as an empty mapping.
        let manifest: Manifest = if raw.trim().is_empty() {
            Manifest::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Remote project identifier; presence is checked by [`Self::from_yaml_str`].
    pub fn project_id(&self) -> &str {
        self.config.infisical_project_id.as_deref().unwrap_or_default()
    }

    /// Remote API URL override.
    pub fn api_url(&self) -> Option<&str> {
        self.config
            .infisical_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
    }

    /// Entries that declare an environment variable.
    pub fn env_entries(&self) -> impl Iterator<Item = &SecretEntry> {
        self.secrets.iter().filter(|entry| entry.env.is_some())
    }

    fn validate(&self) -> Result<()> {
        let project_id = self.config.infisical_project_id.as_deref().unwrap_or("");
        if project_id.trim().is_empty() {
            return Err(VaultError::InvalidManifest(
                "config.infisical_project_id is required".to_owned(),
            ));
        }

        let mut targets = HashSet::new();
        for entry in &self.secrets {
            if entry.name.trim().is_empty() {
                return Err(VaultError::InvalidManifest(
                    "secret name cannot be empty".to_owned(),
                ));
            }
            validate_target_file(&entry.file)?;
            if !targets.insert(entry.file.as_str()) {
                return Err(VaultError::InvalidManifest(format!(
                    "duplicate target file `{}`",
                    entry.file
                )));
            }
            if let Some(variable) = &entry.env {
                if !is_env_identifier(variable) {
                    return Err(VaultError::InvalidManifest(format!(
                        "invalid environment variable name `{variable}` for secret `{}`",
                        entry.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Returns true for a portable shell variable name.
pub fn is_env_identifier(value: &str) -> bool {
    let mut characters = value.chars();
    match characters.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    characters.all(|character| character.is_ascii_alphanumeric() || character == '_')
}

fn validate_target_file(file: &str) -> Result<()> {
    if file.is_empty() {
        return Err(VaultError::InvalidManifest(
            "secret file cannot be empty".to_owned(),
        ));
    }
    let path = Path::new(file);
    if path.is_absolute() {
        return Err(VaultError::InvalidManifest(format!(
            "secret file `{file}` must be relative to the vault root"
        )));
    }
    for component in path.components() {
        if !matches!(component, Component::Normal(_)) {
            return Err(VaultError::InvalidManifest(format!(
                "secret file `{file}` cannot use `.` or `..` components"
            )));
        }
    }
    if file == ENV_FILE_NAME || file == BINDINGS_FILE_NAME {
        return Err(VaultError::InvalidManifest(format!(
            "secret file `{file}` is reserved"
        )));
    }
    Ok(())
}
