//! CLI module graph.

pub mod command;
pub mod demo;
pub mod history;
pub mod init;
pub mod output;
pub mod search;
pub mod session;
pub mod show;
pub mod traverse;

use crate::error::Result;
use crate::infrastructure::config::Config;

use command::{Cli, Commands};

/// Run one parsed command against `config`.
///
/// # Errors
/// Returns whatever the command's handler returns.
pub fn run(cli: &Cli, config: &Config) -> Result<()> {
    match &cli.command {
        Commands::Init => init::execute(config),
        Commands::Demo => demo::execute(config),
        Commands::Show(args) => show::execute(config, args),
        Commands::History(args) => history::execute(config, args),
        Commands::Search(command) => search::execute(config, command),
        Commands::Traverse(args) => traverse::execute(config, args),
    }
}
