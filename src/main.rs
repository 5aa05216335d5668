use anyhow::Result;
use clap::Parser;
use unlocker::Cli;

fn main() -> Result<()> {
    Cli::parse().run()
}
