pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "riverbed")]
#[command(about = "A river-of-news feed aggregator", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/riverbed/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the aggregator with its HTTP and websocket servers (default)
    Run,
    /// Read every subscribed feed once, build changed rivers and exit
    ReadAll,
    /// Rebuild every list's river and exit
    BuildRivers,
    /// Renew the rssCloud subscription of one feed
    Renew {
        /// URL of the feed
        url: String,
    },
    /// Print server stats as JSON
    Stats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_is_default() {
        let cli = Cli::parse_from(["riverbed"]);
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_renew_takes_url_and_global_config() {
        let cli = Cli::parse_from([
            "riverbed",
            "renew",
            "http://example.com/rss.xml",
            "--config",
            "/tmp/riverbed.toml",
        ]);
        match cli.command {
            Some(Commands::Renew { url }) => assert_eq!(url, "http://example.com/rss.xml"),
            _ => panic!("expected renew"),
        }
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/riverbed.toml")));
    }
}
