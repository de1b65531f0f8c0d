//! Command-line surface.

mod config;
mod demo;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use self::config::{ConfigCommand, run_config_command};
pub use self::demo::{DemoReport, run_demo};

#[derive(Parser, Debug)]
#[command(
    name = "marketplace-portal",
    version,
    about = "Ledger state reconciliation and onboarding for marketplace roles"
)]
pub struct Cli {
    /// TOML config file (defaults to ~/.marketplace-portal/config.toml).
    #[arg(long, global = true, env = "PORTAL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect or create the configuration file.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Run the onboarding flow for one role against an in-memory ledger.
    Demo {
        /// broker, exchange, custodian, or investor (defaults to PORTAL_ROLE).
        #[arg(long)]
        role: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_demo_role() {
        let cli = Cli::try_parse_from(["marketplace-portal", "demo", "--role", "broker"])
            .expect("parse");
        match cli.command {
            Command::Demo { role } => assert_eq!(role.as_deref(), Some("broker")),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from([
            "marketplace-portal",
            "config",
            "show",
            "--config",
            "/tmp/portal.toml",
        ])
        .expect("parse");
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/portal.toml")));
        assert!(matches!(cli.command, Command::Config(ConfigCommand::Show)));
    }
}
