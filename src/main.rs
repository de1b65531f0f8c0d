use clap::Parser;

use marketplace_portal::bootstrap;
use marketplace_portal::cli::{Cli, Command, ConfigCommand, run_config_command, run_demo};
use marketplace_portal::config::{Config, LoggingConfig, SessionConfig, WorkflowConfig};
use marketplace_portal::session::MarketRole;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _ = dotenvy::dotenv();
    bootstrap::load_portal_env();
    // `config init` may target a file that does not exist yet.
    let settings_path = match &cli.command {
        Command::Config(ConfigCommand::Init { .. }) => None,
        _ => cli.config.as_deref(),
    };
    let settings = Config::load_settings(settings_path)?;
    bootstrap::init_tracing(&LoggingConfig::resolve(&settings)?);

    match cli.command {
        Command::Config(command) => run_config_command(command, cli.config.as_deref()),
        Command::Demo { role } => {
            let role = match role {
                Some(value) => MarketRole::parse(&value, "--role")?,
                None => SessionConfig::resolve_role(&settings)?,
            };
            run_demo(role, &WorkflowConfig::resolve(&settings)?).await?;
            Ok(())
        }
    }
}
