//! Transmitter system binary

use clap::Parser;
use std::process::ExitCode;
use testbed::{components::prelude::*, utils::logging};
use tracing::error;

/// Arguments required for starting the program from the command line.
#[derive(Parser, Debug)]
struct Args {
    /// Path to the config file for the Transmitter Component.
    #[arg(short, long)]
    filepath: String,
    /// Print the encoded program instead of sending it to the controller.
    #[arg(long)]
    dry_run: bool,
}

fn run(args: &Args) -> Result<()> {
    let config = TransmitterConfig::from_file(&args.filepath)?;
    if args.dry_run {
        print!("{}", config.codec()?.encode(config.program()));
        return Ok(());
    }

    let mut transmitter = Transmitter::from_config(&config)?;
    transmitter.transmit(config.program())?;
    Ok(())
}

fn main() -> ExitCode {
    logging::init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "transmitter failed");
            ExitCode::FAILURE
        }
    }
}
