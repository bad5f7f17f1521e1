//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "databind",
    version,
    author = "neur0map",
    about = "Resolve dynamic variables and discovered entities into configuration templates",
    long_about = "databind fetches variables and discovered entities from cached data sources \
                  and substitutes them into configuration templates, producing one resolved \
                  configuration per discovered entity."
)]
pub struct Cli {
    /// Config file path (defaults to ~/.config/databind/config.yaml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the configuration and list its sources
    Check,

    /// Fetch all sources once and resolve a template
    Fetch {
        /// Template file (YAML or JSON)
        #[arg(short, long, value_name = "FILE")]
        template: PathBuf,

        /// Entity name to rewrite with each result's entity rewrites
        #[arg(short, long)]
        entity: Option<String>,
    },

    /// Periodically fetch and resolve a template until interrupted
    Watch {
        /// Template file (YAML or JSON)
        #[arg(short, long, value_name = "FILE")]
        template: PathBuf,

        /// Time between fetch cycles
        #[arg(short, long, default_value = "30s", value_parser = parse_interval)]
        interval: std::time::Duration,
    },
}

fn parse_interval(raw: &str) -> Result<std::time::Duration, String> {
    let interval = crate::config::parse_duration(raw).map_err(|e| e.to_string())?;
    if interval.is_zero() {
        return Err("interval must be greater than zero".to_string());
    }
    Ok(interval)
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
