#![forbid(unsafe_code)]

//! layerhash — CLI entry point.

use clap::Parser;

mod cli_app;

fn main() {
    let args = cli_app::Cli::parse();
    if let Err(e) = cli_app::run(&args) {
        if !matches!(e, cli_app::CliError::Aborted) {
            eprintln!("layerhash: {e}");
        }
        std::process::exit(e.exit_code());
    }
}
