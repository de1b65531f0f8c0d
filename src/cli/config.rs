//! `marketplace-portal config` - show or initialize configuration.

use std::path::{Path, PathBuf};

use clap::Subcommand;

use crate::config::Config;
use crate::settings::Settings;

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    /// Print the resolved configuration as JSON.
    Show,

    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

pub fn run_config_command(command: ConfigCommand, path: Option<&Path>) -> anyhow::Result<()> {
    match command {
        ConfigCommand::Show => show(path),
        ConfigCommand::Init { force } => {
            let target = path
                .map(PathBuf::from)
                .unwrap_or_else(Settings::default_toml_path);
            init(&target, force)?;
            println!("Wrote {}", target.display());
            Ok(())
        }
    }
}

fn show(path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::from_env_with_toml(path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite",
            path.display()
        );
    }
    Settings::default()
        .save_toml(path)
        .map_err(|e| anyhow::anyhow!(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        init(&path, false).expect("first init");
        assert!(init(&path, false).is_err());
        init(&path, true).expect("forced init");

        let loaded = Settings::load_toml(&path).expect("load").expect("present");
        assert_eq!(loaded, Settings::default());
    }
}
