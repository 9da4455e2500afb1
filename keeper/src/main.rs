use std::process::ExitCode;

use clap::Parser;
use pg_auto_keeper::cli::{dispatch, Cli};
use pg_auto_keeper::logging;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = logging::init(cli.verbose, cli.quiet) {
        eprintln!("warning: {err}");
    }

    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "pg_autoctl exiting with error");
            ExitCode::from(err)
        }
    }
}
