//! hangar - mobile build inspection CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use hangar_cli::cmd;
use hangar_cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Extract { path, icon_out } => cmd::extract::extract(&path, icon_out.as_deref()),
        Commands::Resolve {
            build_id,
            path,
            output_dir,
            os_version,
            abi,
            locale,
            screen_density,
        } => cmd::resolve::resolve(
            build_id,
            path,
            &output_dir,
            os_version,
            abi,
            locale,
            screen_density,
        ),
    }
}
