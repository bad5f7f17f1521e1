use databind::cli::{Cli, Commands};
use databind::config::Config;
use databind::error::{DatabindError, Result};
use databind::{Binder, Sources};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Handle commands
    match cli.command {
        Commands::Check => {
            cmd_check(cli.config)?;
        }
        Commands::Fetch { template, entity } => {
            cmd_fetch(cli.config, &template, entity.as_deref())?;
        }
        Commands::Watch { template, interval } => {
            cmd_watch(cli.config, &template, interval)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "databind=debug" } else { "databind=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_check(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let sources = config.build_sources()?;

    println!("Configuration OK");
    match sources.discovery_ttl() {
        Some(ttl) => println!("  discovery: ttl {}", humantime::format_duration(ttl)),
        None => println!("  discovery: none"),
    }
    for name in sources.variable_names() {
        let ttl = sources.variable_ttl(&name).unwrap_or_default();
        println!("  variable {}: ttl {}", name, humantime::format_duration(ttl));
    }

    Ok(())
}

fn cmd_fetch(
    config_path: Option<PathBuf>,
    template_path: &Path,
    entity: Option<&str>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let sources = config.build_sources()?;
    let template = load_template(template_path)?;

    let binder = Binder::new();
    print_cycle(&binder, &sources, &template, entity)
}

fn cmd_watch(
    config_path: Option<PathBuf>,
    template_path: &Path,
    interval: Duration,
) -> Result<()> {
    let config = load_config(config_path)?;
    let sources = config.build_sources()?;
    let template = load_template(template_path)?;
    let binder = Binder::new();

    tracing::info!(
        "Watching {} every {}",
        template_path.display(),
        humantime::format_duration(interval)
    );

    let rt = tokio::runtime::Runtime::new().map_err(|e| DatabindError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })?;
    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received interrupt, stopping"),
            Err(e) => tracing::error!("Failed to listen for ctrl-c: {}", e),
        }
    };
    rt.block_on(databind::watch::run(interval, shutdown, move || {
        print_cycle(&binder, &sources, &template, None)
    }));
    // An interrupted cycle may still be waiting on a command
    rt.shutdown_background();

    Ok(())
}

/// Fetch every source once and print the resolved template instances as JSON
fn print_cycle(
    binder: &Binder,
    sources: &Sources,
    template: &serde_json::Value,
    entity: Option<&str>,
) -> Result<()> {
    let values = binder.fetch(sources)?;
    let transformed = binder.replace(&values, template)?;

    let json = serde_json::to_string_pretty(&transformed).map_err(|e| DatabindError::Json {
        source: e,
        context: "Failed to serialize resolved templates".to_string(),
    })?;
    println!("{}", json);

    if let Some(entity) = entity {
        for (i, instance) in transformed.iter().enumerate() {
            println!("[{}] entity: {}", i, instance.entity_rewrites.apply(entity));
        }
    }

    Ok(())
}

fn load_template(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| DatabindError::Io {
        source: e,
        context: format!("Failed to read template file: {:?}", path),
    })?;
    // YAML is a superset of JSON, so one parser covers both template formats
    Ok(serde_yaml::from_str(&content)?)
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!("Config file {} not found, using defaults", path.display());
        return Ok(Config::default());
    }

    Config::load(&path)
}
