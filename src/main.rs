use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use folio_store::adapter::inbound::cli::command::Cli;
use folio_store::adapter::inbound::cli::{self, output};
use folio_store::infrastructure::config::Config;
use tracing::debug;

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = Config::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.init_logging();
    debug!(config = %cli.config.display(), "folio starting");

    cli::run(cli, &config)?;
    Ok(())
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    output::configure(output::OutputConfig::new(cli.json, cli.quiet));

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}
