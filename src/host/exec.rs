use std::{
    ffi::OsString,
    io::{self, Write},
    process::{Command, Stdio},
    thread,
    time::Duration,
};

use crate::error::{Result, VaultError};

const EXEC_BUSY_RETRY_ATTEMPTS: usize = 20;
const EXEC_BUSY_RETRY_DELAY: Duration = Duration::from_millis(10);

/// One privileged command invocation.
pub struct Invocation<'a> {
    /// Program name or path.
    pub program: &'a str,
    /// Arguments.
    pub args: Vec<OsString>,
    /// Bytes fed to standard input; never logged.
    pub stdin: Option<&'a [u8]>,
}

impl<'a> Invocation<'a> {
    /// Builds an invocation without stdin.
    pub fn new<I, A>(program: &'a str, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Self {
            program,
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
        }
    }

    /// Attaches standard input.
    pub fn with_stdin(mut self, stdin: &'a [u8]) -> Self {
        self.stdin = Some(stdin);
        self
    }

    /// Arguments rendered for logs and test assertions.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }
}

/// Captured result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationOutput {
    /// Exit status code.
    pub status_code: i32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl InvocationOutput {
    /// True when the command exited with status 0.
    pub fn success(&self) -> bool {
        self.status_code == 0
    }

    /// Converts a non-zero exit into [`VaultError::CommandFailed`].
    pub fn require_success(self, program: &str) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        if self.stderr.trim().is_empty() {
            let status = format!("exit status {}", self.status_code);
            return Err(VaultError::command_failed(program, &status));
        }
        Err(VaultError::command_failed(program, &self.stderr))
    }
}

/// Capability to run commands that need elevated privileges.
///
/// Loop attach, encryption, mount and ownership changes all go through this
/// seam, so tests can record intended operations without root.
pub trait PrivilegedExecutor {
    /// Runs one invocation to completion and captures its output.
    fn run(&self, invocation: &Invocation<'_>) -> Result<InvocationOutput>;
}

impl<T: PrivilegedExecutor + ?Sized> PrivilegedExecutor for &T {
    fn run(&self, invocation: &Invocation<'_>) -> Result<InvocationOutput> {
        (**self).run(invocation)
    }
}

/// Executor that spawns real processes, optionally through an escalation wrapper.
#[derive(Debug, Clone)]
pub struct SystemExecutor {
    escalation: Option<String>,
}

impl SystemExecutor {
    /// Uses `sudo` when `use_sudo` is set, otherwise runs commands directly.
    pub fn new(use_sudo: bool) -> Self {
        Self {
            escalation: use_sudo.then(|| "sudo".to_owned()),
        }
    }

    /// Runs commands directly, for callers that already hold privileges.
    pub fn direct() -> Self {
        Self { escalation: None }
    }

    /// Wraps every command with a custom escalation binary.
    pub fn with_escalation(binary: impl Into<String>) -> Self {
        Self {
            escalation: Some(binary.into()),
        }
    }
}

impl PrivilegedExecutor for SystemExecutor {
    fn run(&self, invocation: &Invocation<'_>) -> Result<InvocationOutput> {
        tracing::debug!(
            program = invocation.program,
            args = ?invocation.args_lossy(),
            escalated = self.escalation.is_some(),
            "running privileged command"
        );
        let launcher = self.escalation.as_deref().unwrap_or(invocation.program);
        let output = retry_exec_busy(|| {
            let mut command = Command::new(launcher);
            if self.escalation.is_some() {
                command.arg(invocation.program);
            }
            command
                .args(&invocation.args)
                .stdin(if invocation.stdin.is_some() {
                    Stdio::piped()
                } else {
                    Stdio::null()
                })
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            command.spawn()
        })
        .and_then(|mut child| {
            if let (Some(bytes), Some(mut stdin)) = (invocation.stdin, child.stdin.take()) {
                match stdin.write_all(bytes) {
                    Err(error) if error.kind() != io::ErrorKind::BrokenPipe => return Err(error),
                    _ => {}
                }
            }
            child.wait_with_output()
        })
        .map_err(|error| map_command_execution_error(launcher, error))?;

        Ok(InvocationOutput {
            status_code: output.status.code().unwrap_or(1),
            stdout: String::from_utf8(output.stdout)?,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

pub(crate) fn map_command_execution_error(binary: &str, error: io::Error) -> VaultError {
    if error.kind() == io::ErrorKind::NotFound {
        return VaultError::MissingBinary(binary.to_owned());
    }
    VaultError::Io(error)
}

pub(crate) fn retry_exec_busy<T, F>(mut operation: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    let mut last_error = None;
    for attempt in 0..EXEC_BUSY_RETRY_ATTEMPTS {
        match operation() {
            Ok(value) => return Ok(value),
            Err(error) if is_exec_busy_error(&error) && attempt + 1 < EXEC_BUSY_RETRY_ATTEMPTS => {
                last_error = Some(error);
                thread::sleep(EXEC_BUSY_RETRY_DELAY);
            }
            Err(error) => return Err(error),
        }
    }

    Err(last_error.unwrap_or_else(|| io::Error::other("command execution failed")))
}

fn is_exec_busy_error(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::ExecutableFileBusy || error.raw_os_error() == Some(26)
}
