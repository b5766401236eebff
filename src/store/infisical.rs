use std::{
    io,
    process::{Command, Output, Stdio},
};

use crate::{
    error::{Result, VaultError},
    host::exec::{map_command_execution_error, retry_exec_busy},
    manifest::Manifest,
};

use super::SecretStore;

/// Environment variable the CLI reads for a self-hosted API endpoint.
pub const API_URL_ENV_VAR: &str = "INFISICAL_API_URL";

/// Secret store backed by the `infisical` command-line client.
#[derive(Debug, Clone)]
pub struct InfisicalCli {
    binary: String,
    project_id: String,
    api_url: Option<String>,
}

impl InfisicalCli {
    /// Constructs a client for one project using the default binary.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self::with_binary("infisical", project_id)
    }

    /// Constructs a client with a custom binary path.
    pub fn with_binary(binary: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            project_id: project_id.into(),
            api_url: None,
        }
    }

    /// Builds a client from a manifest's `config` section.
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let client = Self::new(manifest.project_id());
        match manifest.api_url() {
            Some(url) => client.with_api_url(url),
            None => client,
        }
    }

    /// Points the client at a non-default API endpoint.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = Some(api_url.into());
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        if let Some(url) = &self.api_url {
            command.env(API_URL_ENV_VAR, url);
        }
        command
    }

    fn capture(&self, args: &[&str]) -> Result<Output> {
        tracing::debug!(binary = %self.binary, ?args, "querying secret store");
        retry_exec_busy(|| {
            self.command()
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
        })
        .map_err(|error| map_command_execution_error(&self.binary, error))
    }
}

impl SecretStore for InfisicalCli {
    fn get_secret(&self, name: &str) -> Result<Option<String>> {
        let output = self.capture(&[
            "secrets",
            "get",
            name,
            "--projectId",
            &self.project_id,
            "--plain",
        ])?;
        if !output.status.success() {
            return Ok(None);
        }
        let value = String::from_utf8(output.stdout)?;
        let value = value.trim_end_matches(['\r', '\n']);
        Ok((!value.is_empty()).then(|| value.to_owned()))
    }

    fn set_secret_if_absent(&self, name: &str, value: &str) -> Result<bool> {
        if self.get_secret(name)?.is_some() {
            return Ok(false);
        }
        let assignment = format!("{name}={value}");
        let output = self.capture(&[
            "secrets",
            "set",
            &assignment,
            "--projectId",
            &self.project_id,
        ])?;
        if output.status.success() {
            return Ok(true);
        }
        Err(VaultError::command_failed(
            self.binary.as_str(),
            &String::from_utf8_lossy(&output.stderr),
        ))
    }

    fn bulk_export(&self) -> Result<Option<String>> {
        let output = self.capture(&[
            "export",
            "--projectId",
            &self.project_id,
            "--format=dotenv",
            "--silent",
        ])?;
        if !output.status.success() {
            return Ok(None);
        }
        let text = String::from_utf8(output.stdout)?;
        let text = text.trim();
        Ok((!text.is_empty()).then(|| text.to_owned()))
    }

    fn interactive_login(&self) -> Result<()> {
        // The login flow talks to the user; keep it off stdout, which the shell evaluates.
        let status = self
            .command()
            .arg("login")
            .stdin(Stdio::inherit())
            .stdout(Stdio::from(io::stderr()))
            .stderr(Stdio::inherit())
            .status()
            .map_err(|error| map_command_execution_error(&self.binary, error))?;
        if status.success() {
            return Ok(());
        }
        Err(VaultError::command_failed(
            self.binary.as_str(),
            &format!("login exited with {status}"),
        ))
    }
}
