use std::process::ExitCode;

use clap::Parser;

use layerfe::cli::{self, CliArgs};
use layerfe::logger;

fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Initialize session log (overwrites previous session log)
    logger::init();
    logger::set_echo_stderr(args.verbose);

    cli::run(args)
}
