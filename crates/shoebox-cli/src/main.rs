//! shoebox - offline-first image gallery from the command line

mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::common::{open_session, resolve_data_dir};
use crate::commands::{
    run_add, run_completions, run_list, run_remove, run_status, run_sync, run_watch,
};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                "shoebox=info"
                    .parse()
                    .map_err(|error| CliError::Config(format!("Invalid log directive: {error}")))?,
            ),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let data_dir = resolve_data_dir(cli.data_dir);
    let session = open_session(&data_dir, cli.offline).await?;

    match cli.command {
        Commands::Add { paths } => run_add(&session, paths).await?,
        Commands::List { json } => run_list(&session, json)?,
        Commands::Remove { id } => run_remove(&session, &id).await?,
        Commands::Sync => run_sync(&session).await?,
        Commands::Status { json } => run_status(&session, json)?,
        Commands::Watch => run_watch(&session).await?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}
