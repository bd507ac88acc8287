use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Write a configuration file with default values")]
    Init {
        #[arg(long, short = 'F', help = "Force overwrite existing config")]
        force: bool,
    },
    #[command(about = "Show the effective configuration")]
    Show,
    #[command(about = "Show the configuration file path")]
    Path,
}

pub async fn handle_config(
    cmd: ConfigCommand,
    explicit: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    match cmd {
        ConfigCommand::Init { force } => handle_init(explicit, force, format),
        ConfigCommand::Show => handle_show(explicit, format),
        ConfigCommand::Path => handle_path(explicit, format),
    }
}

fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => Config::config_path()
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory")),
    }
}

fn handle_init(explicit: Option<&Path>, force: bool, format: OutputFormat) -> Result<()> {
    let path = resolve_path(explicit)?;
    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists at: {}\nUse --force to overwrite.",
            path.display()
        );
    }

    Config::default()
        .save(&path)
        .context("failed to write config")?;
    let formatter = get_formatter(format);
    println!(
        "{}",
        formatter
            .format_message(&format!("Created config at: {}", path.display()))
            .trim_end()
    );
    Ok(())
}

fn handle_show(explicit: Option<&Path>, format: OutputFormat) -> Result<()> {
    let config = Config::load(explicit)?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    match resolve_path(explicit) {
        Ok(path) if path.exists() => println!("# Config: {}", path.display()),
        _ => println!("# Built-in defaults"),
    }
    println!();
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn handle_path(explicit: Option<&Path>, format: OutputFormat) -> Result<()> {
    let path = resolve_path(explicit)?;
    let exists = path.exists();

    if format == OutputFormat::Json {
        let output = serde_json::json!({
            "path": path,
            "exists": exists,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if exists {
        println!("{}", path.display());
    } else {
        println!("{} (not created)", path.display());
    }
    Ok(())
}
