//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;

/// Bitemporal portfolio and position store
#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(version)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    /// JSON output for scripting
    #[arg(long, global = true)]
    pub json: bool,

    /// Decrease output verbosity
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the database and apply migrations
    Init,

    /// Write a sample portfolio with some history
    Demo,

    /// Show a portfolio, node, position or trade
    Show(ShowArgs),

    /// List the stored rows of one object
    History(HistoryArgs),

    /// Search portfolios or positions
    #[command(subcommand)]
    Search(SearchCommand),

    /// Walk a portfolio or node tree in parallel and total its positions
    Traverse(TraverseArgs),
}

/// Instants a read resolves at. Omitted instants mean "latest".
#[derive(Args, Debug, Clone, Default)]
pub struct AsOfArgs {
    /// Version instant (RFC 3339)
    #[arg(long)]
    pub version_as_of: Option<String>,

    /// Correction instant (RFC 3339)
    #[arg(long)]
    pub corrected_to: Option<String>,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Unique id, e.g. DbPrt~1000 or DbPrt~1000~v1700000000000000c1700000000000000
    pub id: String,

    #[command(flatten)]
    pub as_of: AsOfArgs,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Object id, e.g. DbPos~1004
    pub object_id: String,

    /// 1-based page number
    #[arg(long, default_value_t = 1)]
    pub page: usize,

    /// Rows per page
    #[arg(long, default_value_t = 20)]
    pub page_size: usize,
}

#[derive(Subcommand, Debug)]
pub enum SearchCommand {
    /// Portfolios by name
    Portfolios(PortfolioSearchArgs),

    /// Positions by node, security or quantity
    Positions(PositionSearchArgs),
}

#[derive(Args, Debug)]
pub struct PortfolioSearchArgs {
    /// Name pattern; `*` and `?` are wildcards
    #[arg(long)]
    pub name: Option<String>,

    #[command(flatten)]
    pub as_of: AsOfArgs,
}

#[derive(Args, Debug)]
pub struct PositionSearchArgs {
    /// Object id of the owning node
    #[arg(long)]
    pub node: Option<String>,

    /// Security key as SCHEME~VALUE
    #[arg(long)]
    pub security: Option<String>,

    #[arg(long)]
    pub min_quantity: Option<Decimal>,

    #[arg(long)]
    pub max_quantity: Option<Decimal>,

    #[command(flatten)]
    pub as_of: AsOfArgs,
}

#[derive(Args, Debug)]
pub struct TraverseArgs {
    /// Unique id of a portfolio or node
    pub id: String,

    #[command(flatten)]
    pub as_of: AsOfArgs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn show_accepts_instants() {
        let cli = Cli::parse_from([
            "folio",
            "show",
            "DbPrt~1000",
            "--version-as-of",
            "2024-01-01T00:00:00Z",
        ]);
        let Commands::Show(args) = cli.command else {
            panic!("expected show");
        };
        assert_eq!(args.id, "DbPrt~1000");
        assert_eq!(args.as_of.version_as_of.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert!(args.as_of.corrected_to.is_none());
    }

    #[test]
    fn search_positions_parses_quantities() {
        let cli = Cli::parse_from(["folio", "--json", "search", "positions", "--min-quantity", "10.5"]);
        assert!(cli.json);
        let Commands::Search(SearchCommand::Positions(args)) = cli.command else {
            panic!("expected position search");
        };
        assert_eq!(args.min_quantity, Some(Decimal::new(105, 1)));
    }
}
