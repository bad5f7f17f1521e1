//! Configuration management for databind
//!
//! This module handles loading, validation, and assembly of the binder
//! configuration into live [`Sources`].

use crate::binder::{
    system_clock, Clock, Discoverer, Gatherer, Sources, DEFAULT_DISCOVERY_TTL,
    DEFAULT_VARIABLES_TTL,
};
use crate::data::{Discovery, GenericDiscovery, Value};
use crate::error::{DatabindError, Result};
use crate::fetchers::{self, CommandRunner, DiscoveryMatcher};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Timeout of external commands that do not configure one
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Prefix of environment variables overriding configuration values
pub const ENV_PREFIX: &str = "DATABIND_";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// The optional discoverer
    #[serde(default)]
    pub discovery: Option<DiscoveryConfig>,
    /// Named gatherers
    #[serde(default)]
    pub variables: BTreeMap<String, VariableConfig>,
}

/// Discoverer configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryConfig {
    /// Cache TTL, e.g. "1m"
    #[serde(default)]
    pub ttl: Option<String>,
    /// Records may declare their own TTL in `variables.ttl`
    #[serde(default)]
    pub payload_ttl: bool,
    /// Filters on flattened discovery variables; `/re/` values are regexes
    #[serde(default, rename = "match")]
    pub match_rules: BTreeMap<String, String>,
    #[serde(default)]
    pub command: Option<CommandConfig>,
    /// Inline records
    #[serde(default)]
    pub test: Option<Vec<GenericDiscovery>>,
}

/// Gatherer configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VariableConfig {
    /// Cache TTL, e.g. "345s"
    #[serde(default)]
    pub ttl: Option<String>,
    /// The fetched value may declare its own TTL in a `ttl` field
    #[serde(default)]
    pub payload_ttl: bool,
    #[serde(default)]
    pub command: Option<CommandConfig>,
    #[serde(default)]
    pub file: Option<FileConfig>,
    /// Inline value
    #[serde(default)]
    pub test: Option<Value>,
}

/// External command backend
#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    pub exec: Exec,
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Command line: a whitespace separated string or an argument list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Exec {
    Line(String),
    Args(Vec<String>),
}

impl Exec {
    pub fn to_args(&self) -> Vec<String> {
        match self {
            Exec::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            Exec::Args(args) => args.clone(),
        }
    }
}

/// File backend
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub path: PathBuf,
}

/// Kind of backend a source is configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Command,
    File,
    Test,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Command => "command",
            SourceKind::File => "file",
            SourceKind::Test => "test",
        }
    }
}

impl VariableConfig {
    /// Every backend kind this variable configures
    pub fn kinds(&self) -> Vec<SourceKind> {
        let mut kinds = Vec::new();
        if self.command.is_some() {
            kinds.push(SourceKind::Command);
        }
        if self.file.is_some() {
            kinds.push(SourceKind::File);
        }
        if self.test.is_some() {
            kinds.push(SourceKind::Test);
        }
        kinds
    }
}

impl DiscoveryConfig {
    /// Every backend kind this discoverer configures
    pub fn kinds(&self) -> Vec<SourceKind> {
        let mut kinds = Vec::new();
        if self.command.is_some() {
            kinds.push(SourceKind::Command);
        }
        if self.test.is_some() {
            kinds.push(SourceKind::Test);
        }
        kinds
    }
}

/// Parse a duration string such as "345s", "1m" or "1h30m"
pub fn parse_duration(raw: &str) -> std::result::Result<Duration, humantime::DurationError> {
    humantime::parse_duration(raw.trim())
}

fn ttl_or(raw: Option<&str>, default: Duration, path: &str) -> Result<Duration> {
    match raw {
        Some(raw) => parse_duration(raw).map_err(|e| DatabindError::InvalidConfigValue {
            path: path.to_string(),
            message: format!("Invalid duration '{}': {}", raw, e),
        }),
        None => Ok(default),
    }
}

impl Config {
    /// Load configuration from a file; `.toml` files are TOML, anything else YAML
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DatabindError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| DatabindError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content)?,
            _ => Self::from_yaml(&content)?,
        };

        // Apply environment variable overrides
        config.apply_overrides(std::env::vars());

        // Validate configuration
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Parse a YAML document without applying overrides or validation
    pub fn from_yaml(content: &str) -> Result<Self> {
        // an empty document is an empty configuration
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Parse a TOML document without applying overrides or validation
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides in the format DATABIND_SECTION__KEY=value
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix(ENV_PREFIX) {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        let segments: Vec<&str> = path.split("__").collect();
        match segments.as_slice() {
            ["DISCOVERY", "TTL"] => match self.discovery.as_mut() {
                Some(discovery) => discovery.ttl = Some(value.to_string()),
                None => {
                    return Err(DatabindError::InvalidConfigValue {
                        path: path.to_string(),
                        message: "No discovery section is configured".to_string(),
                    })
                }
            },
            ["VARIABLES", name, "TTL"] => {
                // env names are upper case; match variables case-insensitively
                let variable = self
                    .variables
                    .iter_mut()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
                    .ok_or_else(|| DatabindError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Unknown variable '{}'", name),
                    })?;
                variable.ttl = Some(value.to_string());
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Assemble live sources reading the system clock
    pub fn build_sources(&self) -> Result<Sources> {
        self.build_sources_with_clock(system_clock())
    }

    /// Assemble live sources: one gatherer per variable plus the optional discoverer
    pub fn build_sources_with_clock(&self, clock: Clock) -> Result<Sources> {
        let mut sources = Sources::new().with_clock(clock);

        if let Some(discovery) = &self.discovery {
            sources = sources.with_discoverer(build_discoverer(discovery)?);
        }
        for (name, variable) in &self.variables {
            sources = sources.with_variable(name.clone(), build_gatherer(name, variable)?);
        }

        tracing::debug!(
            variables = self.variables.len(),
            discovery = self.discovery.is_some(),
            "Assembled sources"
        );
        Ok(sources)
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            DatabindError::Config("Cannot determine config directory".to_string())
        })?;

        Ok(config_dir.join("databind").join("config.yaml"))
    }
}

fn command_runner(command: &CommandConfig, path: &str) -> Result<CommandRunner> {
    let timeout = ttl_or(
        command.timeout.as_deref(),
        DEFAULT_COMMAND_TIMEOUT,
        &format!("{}.command.timeout", path),
    )?;
    CommandRunner::new(&command.exec.to_args(), command.env.clone(), timeout).map_err(|e| {
        DatabindError::InvalidConfigValue {
            path: format!("{}.command.exec", path),
            message: e.to_string(),
        }
    })
}

fn build_gatherer(name: &str, config: &VariableConfig) -> Result<Gatherer> {
    let path = format!("variables.{}", name);
    let ttl = ttl_or(
        config.ttl.as_deref(),
        DEFAULT_VARIABLES_TTL,
        &format!("{}.ttl", path),
    )?;

    let fetch: Box<dyn Fn() -> anyhow::Result<Value> + Send + Sync> =
        match (&config.command, &config.file, &config.test) {
            (Some(command), None, None) => {
                Box::new(fetchers::command_value(command_runner(command, &path)?))
            }
            (None, Some(file), None) => Box::new(fetchers::file_value(file.path.clone())),
            (None, None, Some(value)) => Box::new(fetchers::inline_value(value.clone())),
            _ => {
                return Err(DatabindError::InvalidConfigValue {
                    path,
                    message: "Exactly one of command, file or test must be set".to_string(),
                })
            }
        };

    Ok(if config.payload_ttl {
        Gatherer::new(ttl, fetchers::declaring_ttl(fetch))
    } else {
        Gatherer::new(ttl, fetch)
    })
}

fn build_discoverer(config: &DiscoveryConfig) -> Result<Discoverer> {
    let ttl = ttl_or(config.ttl.as_deref(), DEFAULT_DISCOVERY_TTL, "discovery.ttl")?;
    let matcher =
        DiscoveryMatcher::new(&config.match_rules).map_err(|e| DatabindError::InvalidConfigValue {
            path: "discovery.match".to_string(),
            message: format!("{:#}", e),
        })?;

    let fetch: Box<dyn Fn() -> anyhow::Result<Vec<Discovery>> + Send + Sync> =
        match (&config.command, &config.test) {
            (Some(command), None) => Box::new(fetchers::command_discoveries(command_runner(
                command,
                "discovery",
            )?)),
            (None, Some(records)) => Box::new(fetchers::inline_discoveries(
                records
                    .iter()
                    .cloned()
                    .map(Discovery::from_generic)
                    .collect(),
            )),
            _ => {
                return Err(DatabindError::InvalidConfigValue {
                    path: "discovery".to_string(),
                    message: "Exactly one of command or test must be set".to_string(),
                })
            }
        };

    let fetch = fetchers::filtered(fetch, matcher);
    Ok(if config.payload_ttl {
        Discoverer::new(ttl, fetchers::discoveries_declaring_ttl(fetch))
    } else {
        Discoverer::new(ttl, fetch)
    })
}
