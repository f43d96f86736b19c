// Entrypoint for the `mineru` CLI.
// - Keeps `main` small: parse arguments, set up logging and Ctrl+C, then
//   hand over to `app::run`.
// - Errors are printed once here; authentication problems get a hint.

use std::process::ExitCode;

use clap::Parser;
use mineru_cli::{app, cli::Cli, logging, shutdown};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let flag = shutdown::ShutdownFlag::new();
    shutdown::install_handler(&flag);

    match app::run(cli, flag) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            if app::needs_reconfigure(&e) {
                eprintln!("Run `mineru config` to update your API token.");
            }
            ExitCode::FAILURE
        }
    }
}
