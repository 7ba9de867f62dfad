//! Receiver system binary

use chrono::Utc;
use clap::Parser;
use std::process::ExitCode;
use testbed::{
    components::prelude::*, devices::hardware::serial::SerialDevice, utils::logging,
};
use tracing::error;

/// Arguments required for starting the program from the command line.
#[derive(Parser, Debug)]
struct Args {
    /// Path to the config file for the Receiver Component.
    #[arg(short, long)]
    filepath: String,
}

/// Print one CSV line per cycle until the end of experiment arrives.
///
/// * `config`: receiver parameters.
/// * `render`: turns a sampled value into a CSV field.
fn sample<V, F>(config: &ReceiverConfig, render: F) -> Result<()>
where
    V: SampleValue,
    F: Fn(&V) -> String,
{
    let mut receiver = Receiver::<SerialDevice, V>::from_config(config)?;
    loop {
        let (ended, values) = receiver.next()?;
        let fields: Vec<String> = values.iter().map(&render).collect();
        println!("{},{}", Utc::now().to_rfc3339(), fields.join(","));
        if ended {
            break;
        }
    }
    receiver.shutdown()
}

fn run(args: &Args) -> Result<()> {
    let config = ReceiverConfig::from_file(&args.filepath)?;
    match config.value_format() {
        ValueFormat::Text => sample::<String, _>(&config, |value| value.trim().to_string()),
        ValueFormat::Raw => sample::<Vec<u8>, _>(&config, |value| {
            value.iter().map(|byte| format!("{byte:02x}")).collect()
        }),
    }
}

fn main() -> ExitCode {
    logging::init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "receiver failed");
            ExitCode::FAILURE
        }
    }
}
