use std::io::Write;

use clap::{error::ErrorKind, Parser};

use zt_vault::cli::{init_tracing, render_fatal, run, Cli};

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => error.exit(),
            _ => std::process::exit(1),
        },
    };
    init_tracing();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            let stderr = std::io::stderr();
            let mut handle = stderr.lock();
            let _ = handle.write_all(render_fatal(&error).as_bytes());
            let _ = handle.flush();
            std::process::exit(1);
        }
    }
}
