use crate::{
    console::TerminalConsole,
    error::{Result, VaultError},
    store::InfisicalCli,
    vault::{UpOutcome, VaultLifecycle},
};

use super::{
    output::{self, OutputStatus},
    runtime, Command,
};

pub(crate) fn run(command: Command) -> Result<i32> {
    let state = runtime::load_state()?;
    let console = TerminalConsole::new();
    let host = runtime::system_host(&state.settings);
    let lifecycle = VaultLifecycle::new(&state.settings, &state.cwd, &host, &console);

    match command {
        Command::Up => {
            let manifest = runtime::load_manifest(&state)?;
            let store = InfisicalCli::from_manifest(&manifest);
            let report = lifecycle.up(&manifest, &store)?;
            if let UpOutcome::Provisioned { sync, .. } = &report.outcome {
                tracing::debug!(
                    materialized = sync.materialized.len(),
                    skipped = sync.skipped.len(),
                    "vault provisioned"
                );
            }
            stdout_lines_or_exit(&report.lines)
        }
        Command::Down => {
            lifecycle.down()?;
            Ok(0)
        }
        Command::Env => stdout_lines_or_exit(&lifecycle.env()?),
    }
}

fn stdout_lines_or_exit(lines: &[String]) -> Result<i32> {
    match output::stdout_lines(lines) {
        Ok(OutputStatus::Written | OutputStatus::BrokenPipe) => Ok(0),
        Err(error) => Err(VaultError::Io(error)),
    }
}
