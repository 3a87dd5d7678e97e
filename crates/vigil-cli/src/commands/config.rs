/// Configuration management command handlers
use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::Path;
use vigil_core::config::{config_path, EngineConfig};

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn handle_config_command(action: ConfigAction) -> Result<()> {
    let path = config_path()?;
    match action {
        ConfigAction::Show => handle_config_show(&path),
        ConfigAction::Init { force } => handle_config_init(&path, force),
    }
}

fn handle_config_show(path: &Path) -> Result<()> {
    let config = EngineConfig::load(path)?;
    let source = if path.exists() {
        path.display().to_string()
    } else {
        "defaults".to_string()
    };

    println!("# Configuration ({source})");
    print!("{}", render(&config)?);
    Ok(())
}

fn handle_config_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        println!(
            "Config already exists at {}. Use --force to overwrite.",
            path.display()
        );
        return Ok(());
    }
    EngineConfig::default().save(path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

/// Render the config as TOML with the API token masked
fn render(config: &EngineConfig) -> Result<String> {
    let mut shown = config.clone();
    if let Some(token) = shown.calendar.api_token.as_mut() {
        let prefix: String = token.chars().take(4).collect();
        *token = format!("{prefix}***");
    }
    toml::to_string_pretty(&shown).context("Failed to render config")
}
