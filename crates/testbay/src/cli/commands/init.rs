//! Init command

use std::path::PathBuf;

use clap::Args;
use console::style;
use tracing::info;

use testbay_core::config::{WorkspaceConfig, DEFAULT_CONFIG_TEMPLATE, DEFAULT_CONFIG_TOML, DEFAULT_CONFIG_YAML};

use crate::cli::{Cli, RunCommand};
use crate::exit_codes;

/// Write a default workspace configuration
#[derive(Debug, Args)]
pub struct InitCommand {
    /// Force overwrite existing configuration
    #[arg(short, long)]
    pub force: bool,

    /// Write YAML instead of TOML
    #[arg(long)]
    pub yaml: bool,

    /// Output file path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl InitCommand {
    fn config_path(&self, workspace: PathBuf) -> PathBuf {
        match &self.output {
            Some(path) => path.clone(),
            None if self.yaml => workspace.join(DEFAULT_CONFIG_YAML),
            None => workspace.join(DEFAULT_CONFIG_TOML),
        }
    }

    fn content(&self) -> anyhow::Result<String> {
        if self.yaml {
            Ok(serde_yaml::to_string(&WorkspaceConfig::default())?)
        } else {
            Ok(DEFAULT_CONFIG_TEMPLATE.to_string())
        }
    }
}

impl RunCommand for InitCommand {
    fn run(&self, cli: &Cli) -> anyhow::Result<i32> {
        info!(force = self.force, yaml = self.yaml, "executing init command");
        let config_path = self.config_path(cli.workspace_dir()?);

        if config_path.exists() && !self.force {
            anyhow::bail!(
                "Configuration file already exists at {}. Use --force to overwrite.",
                config_path.display()
            );
        }

        std::fs::write(&config_path, self.content()?)?;

        if !cli.quiet {
            println!(
                "{} Created configuration at {}",
                style("✓").green().bold(),
                style(config_path.display()).cyan()
            );
            println!();
            println!("Next steps:");
            println!("  1. Edit {} to match your workspace layout", config_path.display());
            println!("  2. Run {} to see the configured tests", style("testbay list").cyan());
            println!("  3. Run {} to run them", style("testbay test").cyan());
        }

        Ok(exit_codes::SUCCESS)
    }
}
