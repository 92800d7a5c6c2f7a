mod adb;
mod cli;
mod cli_cmds;
mod clock;
mod config;
mod init;
mod mirror;
mod utils;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
