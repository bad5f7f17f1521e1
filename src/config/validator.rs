use crate::config::{parse_duration, CommandConfig, Config};
use crate::error::{DatabindError, Result, ValidationError};
use crate::fetchers::ValueMatcher;

/// Characters that would make a variable name ambiguous in placeholder paths
const RESERVED_NAME_CHARS: &[char] = &['.', '[', ']', '$', '{', '}'];

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        // Validate the discoverer
        Self::validate_discovery(config, &mut errors);

        // Validate every gatherer
        Self::validate_variables(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DatabindError::ConfigValidation { errors })
        }
    }

    fn validate_discovery(config: &Config, errors: &mut Vec<ValidationError>) {
        let Some(discovery) = &config.discovery else {
            return;
        };

        Self::validate_ttl("discovery.ttl", discovery.ttl.as_deref(), errors);

        let kinds = discovery.kinds();
        if kinds.len() != 1 {
            errors.push(ValidationError::new(
                "discovery",
                format!(
                    "Exactly one of command or test must be set, got {}",
                    Self::describe_kinds(&kinds)
                ),
            ));
        }

        if let Some(command) = &discovery.command {
            Self::validate_command("discovery.command", command, errors);
        }

        for (path, raw) in &discovery.match_rules {
            if let Err(e) = ValueMatcher::parse(raw) {
                errors.push(ValidationError::new(
                    format!("discovery.match.{}", path),
                    format!("{:#}", e),
                ));
            }
        }
    }

    fn validate_variables(config: &Config, errors: &mut Vec<ValidationError>) {
        for (name, variable) in &config.variables {
            let path = format!("variables.{}", name);

            if name.is_empty() || name.contains(RESERVED_NAME_CHARS) {
                errors.push(ValidationError::new(
                    path.clone(),
                    format!(
                        "Variable name must be non-empty and cannot contain any of {:?}",
                        RESERVED_NAME_CHARS
                    ),
                ));
            }

            Self::validate_ttl(&format!("{}.ttl", path), variable.ttl.as_deref(), errors);

            let kinds = variable.kinds();
            if kinds.len() != 1 {
                errors.push(ValidationError::new(
                    path.clone(),
                    format!(
                        "Exactly one of command, file or test must be set, got {}",
                        Self::describe_kinds(&kinds)
                    ),
                ));
            }

            if let Some(command) = &variable.command {
                Self::validate_command(&format!("{}.command", path), command, errors);
            }

            if let Some(file) = &variable.file {
                if file.path.as_os_str().is_empty() {
                    errors.push(ValidationError::new(
                        format!("{}.file.path", path),
                        "File path cannot be empty",
                    ));
                }
            }
        }
    }

    fn validate_command(path: &str, command: &CommandConfig, errors: &mut Vec<ValidationError>) {
        if command.exec.to_args().is_empty() {
            errors.push(ValidationError::new(
                format!("{}.exec", path),
                "Command exec cannot be empty",
            ));
        }
        Self::validate_ttl(&format!("{}.timeout", path), command.timeout.as_deref(), errors);
    }

    fn validate_ttl(path: &str, raw: Option<&str>, errors: &mut Vec<ValidationError>) {
        if let Some(raw) = raw {
            if let Err(e) = parse_duration(raw) {
                errors.push(ValidationError::new(
                    path,
                    format!("Invalid duration format '{}': {}", raw, e),
                ));
            }
        }
    }

    fn describe_kinds(kinds: &[crate::config::SourceKind]) -> String {
        if kinds.is_empty() {
            "none".to_string()
        } else {
            kinds
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}
