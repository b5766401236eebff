mod commands;
pub(crate) mod output;
mod runtime;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::error::{Result, VaultError};

/// Environment variable holding the log filter directive.
pub const LOG_ENV_VAR: &str = "ZT_VAULT_LOG";
const DEFAULT_LOG_FILTER: &str = "warn";
const CLI_AFTER_HELP: &str = r#"Examples:
  eval "$(zt-vault up)"
  eval "$(zt-vault env)"
  zt-vault down

Notes:
  - Progress and diagnostics go to stderr as `# ` comments.
  - The workspace manifest is `secrets.yml` in the current directory or `/workspace`.
"#;

/// Top-level command line parser.
#[derive(Debug, Parser)]
#[command(
    name = "zt-vault",
    version,
    about = "Per-workspace encrypted secrets vault.",
    after_help = CLI_AFTER_HELP
)]
pub struct Cli {
    /// Subcommand.
    #[command(subcommand)]
    pub command: Command,
}

/// Supported CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Unlocks or creates the vault, mounts it and prints export lines.
    Up,
    /// Unmounts the vault and closes its container.
    Down,
    /// Prints previously materialized export lines.
    Env,
}

/// Runs CLI and returns process exit code.
pub fn run(cli: Cli) -> Result<i32> {
    commands::run(cli.command)
}

/// Renders a fatal error as shell-comment lines for stderr.
pub fn render_fatal(error: &VaultError) -> String {
    output::comment_block(&format!("error: {error}"))
}

/// Installs the stderr tracing subscriber.
///
/// Every line is prefixed with `# ` so evaluated output stays inert.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_ansi(false)
        .with_writer(|| output::CommentedStderr)
        .try_init();
}
