use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "tfmirror")]
#[command(about = "Terraform provider and module mirror", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the mirror HTTP service
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to bind the HTTP server to. Overrides the configured
    /// `server.bind_addr` when given.
    #[arg(long)]
    pub address: Option<SocketAddr>,
}
