//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

use std::process::ExitCode;

use transit_cli::CliError;

fn main() -> ExitCode {
    match transit_cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        // Clap renders help, version and usage errors itself.
        Err(CliError::ArgumentParsing(err)) => err.exit(),
        Err(err) => {
            eprintln!("transit-cache: {err}");
            ExitCode::FAILURE
        }
    }
}
