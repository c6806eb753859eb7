use anyhow::Result;
use clap::Parser as ClapParser;
use indicatif::MultiProgress;

use cli::command::{Cli, Commands};
use cli::decode::cmd_decode;
use cli::info::cmd_info;

mod byteorder;
mod cli;
mod input;
pub(crate) mod timestamp;
mod wav;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let multi = MultiProgress::new();
    cli::logging::init(&cli, &multi)?;

    let progress = cli.progress.then_some(&multi);
    match &cli.command {
        Commands::Decode(args) => cmd_decode(args, &cli, progress),
        Commands::Info(args) => cmd_info(args, &cli, progress),
    }
}
