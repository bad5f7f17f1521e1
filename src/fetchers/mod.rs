//! Fetch backends for gatherers and discoverers
//!
//! Each constructor returns a fetch function ready to be wrapped by a
//! [`Gatherer`](crate::binder::Gatherer) or [`Discoverer`](crate::binder::Discoverer).
//! Backends bound their own latency; the binder never cancels a fetch.

mod command;
mod matcher;

pub use command::CommandRunner;
pub use matcher::{DiscoveryMatcher, ValueMatcher};

use crate::data::{Discovery, GenericDiscovery, Value};
use anyhow::{bail, Context};
use std::path::PathBuf;

/// Always yields the configured value
pub fn inline_value(value: Value) -> impl Fn() -> anyhow::Result<Value> + Send + Sync {
    move || Ok(value.clone())
}

/// Always yields the configured discovery records
pub fn inline_discoveries(
    records: Vec<Discovery>,
) -> impl Fn() -> anyhow::Result<Vec<Discovery>> + Send + Sync {
    move || Ok(records.clone())
}

/// Reads a JSON, YAML or TOML document, chosen by file extension
pub fn file_value(path: PathBuf) -> impl Fn() -> anyhow::Result<Value> + Send + Sync {
    move || {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let value: Value = match extension.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "toml" => toml::from_str(&content)?,
            "json" | "" => serde_json::from_str(&content)?,
            other => bail!("Unsupported file type .{} for {}", other, path.display()),
        };
        Ok(value)
    }
}

/// Runs a command and parses its stdout as one JSON value
pub fn command_value(runner: CommandRunner) -> impl Fn() -> anyhow::Result<Value> + Send + Sync {
    move || runner.run_json::<Value>()
}

/// Runs a command whose stdout is a JSON array of discovery records
pub fn command_discoveries(
    runner: CommandRunner,
) -> impl Fn() -> anyhow::Result<Vec<Discovery>> + Send + Sync {
    move || {
        let records: Vec<GenericDiscovery> = runner.run_json()?;
        Ok(records.into_iter().map(Discovery::from_generic).collect())
    }
}

/// Marks every fetched value as exposing the self-declared TTL capability
pub fn declaring_ttl<F>(fetch: F) -> impl Fn() -> anyhow::Result<Value> + Send + Sync
where
    F: Fn() -> anyhow::Result<Value> + Send + Sync,
{
    move || fetch().map(Value::with_declared_ttl)
}

/// Marks every fetched discovery record as exposing the self-declared TTL capability
pub fn discoveries_declaring_ttl<F>(
    fetch: F,
) -> impl Fn() -> anyhow::Result<Vec<Discovery>> + Send + Sync
where
    F: Fn() -> anyhow::Result<Vec<Discovery>> + Send + Sync,
{
    move || {
        fetch().map(|records| {
            records
                .into_iter()
                .map(Discovery::with_declared_ttl)
                .collect()
        })
    }
}

/// Drops the discovery records rejected by `matcher`
pub fn filtered<F>(
    fetch: F,
    matcher: DiscoveryMatcher,
) -> impl Fn() -> anyhow::Result<Vec<Discovery>> + Send + Sync
where
    F: Fn() -> anyhow::Result<Vec<Discovery>> + Send + Sync,
{
    move || fetch().map(|records| matcher.filter(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DeclaredTtl, Map};
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_file_value_by_extension() {
        let dir = TempDir::new().unwrap();
        let yaml = dir.path().join("creds.yaml");
        std::fs::write(&yaml, "user: admin\nports: [80, 443]\n").unwrap();
        let toml_path = dir.path().join("creds.toml");
        std::fs::write(&toml_path, "user = \"admin\"\n").unwrap();

        let value = file_value(yaml)().unwrap();
        assert_eq!(value.as_map().unwrap()["user"], Value::from("admin"));
        let value = file_value(toml_path)().unwrap();
        assert_eq!(value.as_map().unwrap()["user"], Value::from("admin"));
    }

    #[test]
    fn test_file_value_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = file_value(dir.path().join("absent.json"))().unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }

    #[test]
    fn test_declaring_ttl_wraps_maps() {
        let payload = Value::from(Map::from([("ttl".to_string(), Value::from("12s"))]));
        let fetch = declaring_ttl(inline_value(payload));
        assert_eq!(fetch().unwrap().declared_ttl(), Ok(Duration::from_secs(12)));
    }

    #[test]
    fn test_filtered_discoveries() {
        let records = vec![
            Discovery::new(
                Map::from([("name".to_string(), Value::from("web"))]),
                BTreeMap::new(),
                Default::default(),
            ),
            Discovery::new(
                Map::from([("name".to_string(), Value::from("db"))]),
                BTreeMap::new(),
                Default::default(),
            ),
        ];
        let rules = BTreeMap::from([("name".to_string(), "db".to_string())]);
        let fetch = filtered(
            inline_discoveries(records),
            DiscoveryMatcher::new(&rules).unwrap(),
        );
        let kept = fetch().unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].variables["name"], Value::from("db"));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_discoveries() {
        let script = r#"echo '[{"variables":{"ip":"10.0.0.1"},"metricAnnotations":{"team":"infra"},"entityRewrites":[]},{"variables":{"ip":"10.0.0.2"}}]'"#;
        let exec = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        let runner = CommandRunner::new(&exec, BTreeMap::new(), Duration::from_secs(5)).unwrap();
        let records = command_discoveries(runner)().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].annotations["team"], "infra");
        assert_eq!(records[1].variables["ip"], Value::from("10.0.0.2"));
    }
}
