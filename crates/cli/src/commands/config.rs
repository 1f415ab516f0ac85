//! Config Commands

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use serde::Serialize;
use testpilot_realtime::ClientConfig;

use crate::output::{print_item, print_success, OutputFormat, TableDisplay};
use crate::session::Settings;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration
    Show,
}

/// Flattened view of the effective configuration
#[derive(Debug, Serialize)]
pub struct ConfigDisplay {
    pub path: String,
    #[serde(flatten)]
    pub config: ClientConfig,
}

impl TableDisplay for ConfigDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Server", "Path", "Connect Timeout", "Backoff", "Storage"]
    }

    fn row(&self) -> Vec<String> {
        let reconnect = &self.config.reconnect;
        vec![
            self.config.url.clone(),
            self.config.path.clone(),
            format!("{}ms", self.config.connect_timeout_ms),
            format!(
                "{}ms x{} (max {})",
                reconnect.base_delay_ms, reconnect.multiplier, reconnect.max_attempts
            ),
            self.config.credentials.storage_path.display().to_string(),
        ]
    }
}

pub async fn execute(cmd: ConfigCommands, settings: &Settings, format: OutputFormat) -> Result<()> {
    let path = settings.config_path();

    match cmd {
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            ClientConfig::default()
                .save(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            print_success(&format!("Wrote default config to {}", path.display()));
        }

        ConfigCommands::Show => {
            let config = settings.load_config()?;
            print_item(
                &ConfigDisplay {
                    path: path.display().to_string(),
                    config,
                },
                format,
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            config_path: Some(dir.path().join("nested").join("config.toml")),
            ..Default::default()
        };

        execute(ConfigCommands::Init { force: false }, &settings, OutputFormat::Plain)
            .await
            .unwrap();
        assert!(settings.config_path().exists());

        assert!(execute(ConfigCommands::Init { force: false }, &settings, OutputFormat::Plain)
            .await
            .is_err());
        assert!(execute(ConfigCommands::Init { force: true }, &settings, OutputFormat::Plain)
            .await
            .is_ok());
    }

    #[test]
    fn test_backoff_column() {
        let display = ConfigDisplay {
            path: "config.toml".into(),
            config: ClientConfig::default(),
        };
        assert_eq!(display.row()[3], "1000ms x2 (max 5)");
    }
}
