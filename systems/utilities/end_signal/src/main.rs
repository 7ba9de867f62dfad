//! End of experiment signal binary

use clap::Parser;
use std::{process::ExitCode, time::Duration};
use testbed::{messages::signal::notify_end_of_experiment, utils::logging};
use tracing::error;

/// Arguments required for starting the program from the command line.
#[derive(Parser, Debug)]
struct Args {
    /// Address of the receiver's termination listener.
    #[arg(short, long, default_value = "127.0.0.1:8011")]
    address: String,
    /// Seconds to wait for the receiver to accept the connection.
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let args = Args::parse();
    match notify_end_of_experiment(&args.address, Duration::from_secs(args.timeout)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, address = %args.address, "could not end the experiment");
            ExitCode::FAILURE
        }
    }
}
