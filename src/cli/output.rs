use std::io::{self, Write};

/// Marker that makes a line inert when evaluated by a POSIX shell.
pub(crate) const SHELL_COMMENT_PREFIX: &str = "# ";

/// Result of writing to an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputStatus {
    /// Write completed.
    Written,
    /// Stream was closed by the reader.
    BrokenPipe,
}

fn map_result(result: io::Result<()>) -> io::Result<OutputStatus> {
    match result {
        Ok(()) => Ok(OutputStatus::Written),
        Err(error) if error.kind() == io::ErrorKind::BrokenPipe => Ok(OutputStatus::BrokenPipe),
        Err(error) => Err(error),
    }
}

/// Writes every line to stdout, newline-terminated, and flushes once.
pub(crate) fn stdout_lines(lines: &[String]) -> io::Result<OutputStatus> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let mut result = Ok(());
    for line in lines {
        result = handle
            .write_all(line.as_bytes())
            .and_then(|_| handle.write_all(b"\n"));
        if result.is_err() {
            break;
        }
    }
    map_result(result.and_then(|_| handle.flush()))
}

/// Prefixes every line of `text` with the comment marker.
pub(crate) fn comment_block(text: &str) -> String {
    let mut block = String::with_capacity(text.len() + SHELL_COMMENT_PREFIX.len());
    for line in text.lines() {
        block.push_str(SHELL_COMMENT_PREFIX);
        block.push_str(line);
        block.push('\n');
    }
    block
}

/// Writes `text` to stderr as shell-comment lines.
pub(crate) fn stderr_comment(text: &str) -> io::Result<OutputStatus> {
    let stderr = io::stderr();
    let mut handle = stderr.lock();
    map_result(
        handle
            .write_all(comment_block(text).as_bytes())
            .and_then(|_| handle.flush()),
    )
}

/// Stderr writer for the tracing subscriber; every line of an event becomes a comment.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CommentedStderr;

impl Write for CommentedStderr {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let block = comment_block(&String::from_utf8_lossy(buf));
        let stderr = io::stderr();
        let mut handle = stderr.lock();
        handle.write_all(block.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}
