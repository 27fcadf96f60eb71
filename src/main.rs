use std::process::ExitCode;

use clap::Parser;
use pixelcanvas::{cli, logger};

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();

    // Session log, overwriting the previous one
    let opened = match &args.log {
        Some(path) => logger::init_at(path),
        None => logger::init(),
    };
    if let Err(e) = opened {
        eprintln!("warning: could not open log file: {}", e);
    }
    logger::set_echo_stderr(args.verbose);

    cli::run(args)
}
