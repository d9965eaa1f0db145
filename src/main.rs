// serial-mux - share one serial port between many TCP clients
use anyhow::Context;
use clap::Parser;
use serial_mux::cli::{execute_command, Args};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match execute_command(args).await.context("serial-mux failed") {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
