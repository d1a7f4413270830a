mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use tfmirror::mirror::server;
use tfmirror::observability;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    observability::init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => server::run(args.address).await?,
    }

    Ok(())
}
