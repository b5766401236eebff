use secrecy::SecretString;

use crate::{
    cli::output,
    error::{Result, VaultError},
};

/// Interactive terminal collaborator.
///
/// Progress goes to standard error so that standard output only ever carries
/// lines a calling shell may evaluate.
pub trait Console {
    /// Reads one hidden line of input.
    fn read_secret(&self, prompt: &str) -> Result<SecretString>;
    /// Reports one human-readable progress line.
    fn progress(&self, message: &str);
}

/// Console bound to the controlling terminal.
#[derive(Debug, Clone, Default)]
pub struct TerminalConsole;

impl TerminalConsole {
    /// Constructs a terminal console.
    pub fn new() -> Self {
        Self
    }
}

impl Console for TerminalConsole {
    fn read_secret(&self, prompt: &str) -> Result<SecretString> {
        // rpassword writes the prompt to the tty, never to stdout.
        rpassword::prompt_password(prompt)
            .map(SecretString::from)
            .map_err(|error| VaultError::Prompt(error.to_string()))
    }

    fn progress(&self, message: &str) {
        if let Err(error) = output::stderr_comment(message) {
            tracing::debug!(%error, "progress line dropped");
        }
    }
}
