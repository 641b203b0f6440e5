use std::path::PathBuf;

use clap::Parser;

use character_assembler::{AssemblerConfig, flow};

#[derive(Parser, Debug)]
#[command(name = "character-assembler")]
#[command(about = "Assemble, rig and export characters from catalogued glTF parts")]
struct Cli {
    /// TOML configuration; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: flow::Command,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AssemblerConfig::load_from_file(path)?,
        None => AssemblerConfig::default(),
    };
    flow::run(config, cli.command)
}
