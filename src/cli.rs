use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use carrental::db::DB_FILE;
use carrental::types::DatasetKind;

#[derive(Debug, Parser)]
#[command(name = "carrental")]
#[command(about = "Browse a vehicle rental database, twenty records at a time.")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// SQLite database file
    #[arg(long, global = true, env = "CARRENTAL_DB", default_value = DB_FILE)]
    pub db: PathBuf,
}

/// Dataset selector for the list command.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DatasetFilter {
    Clients,
    Cars,
    CarClasses,
    RentalAgreements,
    RentalHistory,
    Maintenances,
}

impl From<DatasetFilter> for DatasetKind {
    fn from(f: DatasetFilter) -> Self {
        match f {
            DatasetFilter::Clients => DatasetKind::Client,
            DatasetFilter::Cars => DatasetKind::Car,
            DatasetFilter::CarClasses => DatasetKind::CarClass,
            DatasetFilter::RentalAgreements => DatasetKind::RentalAgreement,
            DatasetFilter::RentalHistory => DatasetKind::RentalHistory,
            DatasetFilter::Maintenances => DatasetKind::Maintenance,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the database schema
    Init,

    /// Fill an empty database with a small demo fleet
    Seed,

    /// Show the first page (20 records) of a dataset
    List {
        /// Dataset to show
        dataset: DatasetFilter,

        /// Newest records first, straight from the database
        #[arg(long)]
        latest: bool,
    },

    /// Row counts per table
    Stats,

    /// Start MCP server over stdio
    Serve,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_with_kebab_case_dataset() {
        let cli = Cli::try_parse_from(["carrental", "list", "car-classes", "--latest"]).unwrap();
        match cli.command {
            Command::List { dataset, latest } => {
                assert_eq!(DatasetKind::from(dataset), DatasetKind::CarClass);
                assert!(latest);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["carrental", "stats", "--json", "--db", "x.db"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.db, PathBuf::from("x.db"));
    }

    #[test]
    fn unknown_dataset_is_rejected() {
        assert!(Cli::try_parse_from(["carrental", "list", "trucks"]).is_err());
    }
}
