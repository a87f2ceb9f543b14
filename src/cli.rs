//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::path::PathBuf;

/// Watch-and-compile supervisor for Elm with hot reload
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Watch config file path (default: watchtower.json)
    #[arg(short = 'C', long, default_value = "watchtower.json", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Watch, compile and hot-reload targets
    #[command(visible_alias = "h")]
    Hot {
        /// Substring filters selecting targets. With none, every target
        /// is enabled.
        #[arg(value_name = "FILTER")]
        filters: Vec<String>,

        /// Websocket port to prefer (default: last used, else ephemeral)
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable verbose output for debugging
        #[arg(short = 'V', long)]
        verbose: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hot_with_filters() {
        let cli = Cli::parse_from(["watchtower", "hot", "Html", "Form"]);
        match cli.command {
            Commands::Hot { filters, port, .. } => {
                assert_eq!(filters, ["Html", "Form"]);
                assert_eq!(port, None);
            }
        }
    }

    #[test]
    fn test_custom_config_and_port() {
        let cli = Cli::parse_from(["watchtower", "-C", "other.json", "hot", "--port", "4321"]);
        assert_eq!(cli.config, PathBuf::from("other.json"));
        match cli.command {
            Commands::Hot { port, .. } => assert_eq!(port, Some(4321)),
        }
    }
}
