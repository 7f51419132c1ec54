//! Shoal CLI entry point
//!
//! Subcommands cover running an API node, addressing local files, and
//! inspecting the durable registry without starting a server.

mod commands;

use clap::Parser;

#[derive(Parser)]
#[command(name = "shoal")]
#[command(about = "A peer-to-peer video distribution node")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    commands::handle_command(cli.command).await?;

    Ok(())
}
