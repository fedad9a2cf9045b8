//! CLI definitions for followback.
//!
//! Uses clap for argument parsing with derive macros.

use crate::model::SortKey;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// followback - find accounts that don't follow you back
#[derive(Parser, Debug)]
#[command(name = "followback")]
#[command(version)]
#[command(about = "Find accounts that don't follow you back in a social-network data export")]
#[command(long_about = r#"
followback reads the followers/following lists from an Instagram or X data
export, works out which accounts you follow that don't follow you back, and
keeps the result between runs.

Accounts you don't mind (friends, brands, celebrities) can be whitelisted.
Whitelisted accounts stay in the list but always sort last.

Quick start:
  1. Request your data export (HTML or JSON) and download it
  2. Run: followback analyze /path/to/export.zip
  3. Browse: followback show --sort newest
  4. Whitelist: followback whitelist toggle some_account
"#)]
pub struct Cli {
    /// Path to the database file
    #[arg(long, env = "FOLLOWBACK_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Output format (defaults to the configured format)
    #[arg(long, short = 'f', global = true)]
    pub format: Option<OutputFormat>,

    /// Be verbose (-v debug, -vv trace)
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Be quiet (suppress non-error output)
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze a data export and cache the result
    Analyze(AnalyzeArgs),

    /// Show the cached analysis
    Show(ShowArgs),

    /// Manage the whitelist
    #[command(subcommand)]
    Whitelist(WhitelistCommand),

    /// Forget the cached analysis (the whitelist is kept)
    Reset,

    /// Show or manage configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Export directory, .zip file, or a single followers/following document
    pub archive_path: PathBuf,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Which list to show
    #[arg(long, short = 'l', value_enum, default_value_t = ShowList::NotFollowingBack)]
    pub list: ShowList,

    /// Sort order within the whitelisted and non-whitelisted groups
    #[arg(long, short = 's', value_enum, default_value_t = SortArg::Username)]
    pub sort: SortArg,

    /// Only show usernames containing this text (case-insensitive)
    #[arg(long, short = 'S', default_value = "")]
    pub search: String,

    /// Maximum number of accounts to show
    #[arg(long, short = 'n')]
    pub limit: Option<usize>,

    /// Number of accounts to skip
    #[arg(long, default_value_t = 0)]
    pub offset: usize,
}

#[derive(Subcommand, Debug)]
pub enum WhitelistCommand {
    /// List whitelisted accounts
    List,

    /// Add accounts to the whitelist, or remove them if already present
    Toggle {
        /// Usernames to toggle
        #[arg(required = true)]
        usernames: Vec<String>,
    },

    /// Remove every account from the whitelist
    Clear,

    /// Exchange the whitelist with a remote copy (local entries win)
    Sync(SyncArgs),
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// JSON file standing in for the remote whitelist store
    #[arg(long, short = 'r')]
    pub remote: PathBuf,

    /// Confirm that the remote session is authenticated
    #[arg(long)]
    pub authenticated: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Show current configuration
    #[arg(long)]
    pub show: bool,

    /// Write the default configuration file if none exists
    #[arg(long)]
    pub init: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonPretty,
    Csv,
}

impl OutputFormat {
    /// Parse a configured format name, e.g. `json-pretty`.
    #[must_use]
    pub fn from_config(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name, true).ok()
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShowList {
    #[default]
    NotFollowingBack,
    Followers,
    Following,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortArg {
    #[default]
    Username,
    Newest,
    Oldest,
}

impl From<SortArg> for SortKey {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Username => Self::Username,
            SortArg::Newest => Self::Newest,
            SortArg::Oldest => Self::Oldest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_show_args() {
        let cli = Cli::parse_from(["followback", "show", "--sort", "newest", "-S", "car", "-n", "5"]);
        let Commands::Show(args) = cli.command else {
            panic!("expected show");
        };
        assert_eq!(SortKey::from(args.sort), SortKey::Newest);
        assert_eq!(args.search, "car");
        assert_eq!(args.limit, Some(5));
        assert_eq!(args.list, ShowList::NotFollowingBack);
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["followback", "reset", "--format", "json-pretty", "-vv"]);
        assert_eq!(cli.format, Some(OutputFormat::JsonPretty));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_whitelist_sync() {
        let cli = Cli::parse_from([
            "followback",
            "whitelist",
            "sync",
            "--remote",
            "remote.json",
            "--authenticated",
        ]);
        let Commands::Whitelist(WhitelistCommand::Sync(args)) = cli.command else {
            panic!("expected whitelist sync");
        };
        assert!(args.authenticated);
        assert_eq!(args.remote, PathBuf::from("remote.json"));
    }

    #[test]
    fn test_output_format_from_config() {
        assert_eq!(OutputFormat::from_config("csv"), Some(OutputFormat::Csv));
        assert_eq!(OutputFormat::from_config("JSON-PRETTY"), Some(OutputFormat::JsonPretty));
        assert_eq!(OutputFormat::from_config("yaml"), None);
    }
}
