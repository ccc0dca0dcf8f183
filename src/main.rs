mod backup;
mod cli;
mod config;
mod database;
mod error;
mod log;
mod upload;

use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    log::init();

    let cli = cli::Cli::parse();
    info!("DB Dumper starting...");

    match cli::execute(cli).await {
        Ok(()) => {
            info!("Application exited normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            eprintln!("{}: {}", style("Error").red(), e);
            ExitCode::FAILURE
        }
    }
}
