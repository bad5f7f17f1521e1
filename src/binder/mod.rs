//! Dynamic variable binder
//!
//! Composes independently cached data sources into per-entity namespaces and
//! resolves configuration templates against them:
//! - [`Sources`] owns the gatherers, the optional discoverer and their caches
//! - [`Binder::fetch`] runs one fetch cycle and yields one [`Match`] per discovered entity
//! - [`Binder::replace`] resolves a template once per match

mod cache;
mod sources;
mod template;

pub use cache::CachedEntry;
pub use sources::{system_clock, Clock, DiscoverFn, Discoverer, GatherFn, Gatherer, Sources};
pub use template::TemplateResolver;

use crate::data::{add_values, Discovery, EntityRewrites, FlatNamespace, StringMap, Transformed};
use crate::error::Result;
use ahash::HashMapExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// TTL of variables that do not configure one
pub const DEFAULT_VARIABLES_TTL: Duration = Duration::from_secs(60 * 60);

/// TTL of the discoverer when it does not configure one
pub const DEFAULT_DISCOVERY_TTL: Duration = Duration::from_secs(60);

/// Resolved namespace of one discovered entity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Match {
    pub namespace: FlatNamespace,
    pub annotations: StringMap,
    pub entity_rewrites: EntityRewrites,
}

/// Outcome of one fetch cycle
#[derive(Debug, Clone, Default)]
pub struct Values {
    shared: FlatNamespace,
    matches: Vec<Match>,
}

impl Values {
    /// Namespace entries contributed by the gatherers
    pub fn shared(&self) -> &FlatNamespace {
        &self.shared
    }

    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Fetches sources and binds their data into templates
#[derive(Debug, Clone, Default)]
pub struct Binder {
    resolver: TemplateResolver,
}

impl Binder {
    pub fn new() -> Self {
        Self {
            resolver: TemplateResolver::new(),
        }
    }

    /// Run one fetch cycle.
    ///
    /// Refreshes every expired source while holding the sources lock. Any
    /// fetch error aborts the cycle; no partial result is returned.
    pub fn fetch(&self, sources: &Sources) -> Result<Values> {
        let _entered = sources.span().enter();
        let now = sources.now();
        let mut state = sources.lock();

        let discoveries = match state.discoverer.as_mut() {
            Some(discoverer) => discoverer.fetch_if_expired(now)?,
            None => vec![Discovery::default()],
        };

        let mut shared = FlatNamespace::new();
        for (name, gatherer) in state.variables.iter_mut() {
            let value = gatherer.fetch_if_expired(name, now)?;
            add_values(&mut shared, name, &value);
        }
        drop(state);

        let matches: Vec<Match> = discoveries
            .into_iter()
            .map(|discovery| {
                let mut namespace = shared.clone();
                for (key, value) in &discovery.variables {
                    add_values(&mut namespace, key, value);
                }
                Match {
                    namespace,
                    annotations: discovery.annotations,
                    entity_rewrites: discovery.entity_rewrites,
                }
            })
            .collect();

        tracing::debug!(
            variables = shared.len(),
            matches = matches.len(),
            "Fetch cycle complete"
        );
        Ok(Values { shared, matches })
    }

    /// Resolve `template` once per match, in match order.
    ///
    /// Fails as a whole if any placeholder cannot be resolved for any match.
    pub fn replace<T>(&self, values: &Values, template: &T) -> Result<Vec<Transformed<T>>>
    where
        T: Serialize + DeserializeOwned,
    {
        values
            .matches
            .iter()
            .map(|m| {
                Ok(Transformed {
                    variables: self.resolver.resolve(&m.namespace, template)?,
                    metric_annotations: m.annotations.clone(),
                    entity_rewrites: m.entity_rewrites.clone(),
                })
            })
            .collect()
    }
}

/// Run one fetch cycle with a default binder
pub fn fetch(sources: &Sources) -> Result<Values> {
    Binder::new().fetch(sources)
}

/// Resolve a template against fetched values with a default binder
pub fn replace<T>(values: &Values, template: &T) -> Result<Vec<Transformed<T>>>
where
    T: Serialize + DeserializeOwned,
{
    Binder::new().replace(values, template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{EntityRewrite, Map, Value};
    use crate::error::DatabindError;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Target {
        address: String,
    }

    fn record(ip: &str) -> Discovery {
        Discovery::new(
            Map::from([("ip".to_string(), Value::from(ip))]),
            StringMap::from([("ip".to_string(), ip.to_string())]),
            EntityRewrites::from(vec![EntityRewrite::replace("${ip}", ip)]),
        )
    }

    #[test]
    fn test_no_discoverer_yields_one_match() {
        let sources = Sources::new().with_variable(
            "host",
            Gatherer::new(DEFAULT_VARIABLES_TTL, || Ok(Value::from("db01"))),
        );
        let values = fetch(&sources).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values.matches()[0].namespace["host"], "db01");
        assert!(values.matches()[0].annotations.is_empty());
    }

    #[test]
    fn test_empty_discovery_yields_no_matches() {
        let sources = Sources::new()
            .with_discoverer(Discoverer::new(DEFAULT_DISCOVERY_TTL, || Ok(vec![])))
            .with_variable(
                "host",
                Gatherer::new(DEFAULT_VARIABLES_TTL, || Ok(Value::from("db01"))),
            );
        let values = fetch(&sources).unwrap();
        assert!(values.is_empty());
        assert_eq!(values.shared()["host"], "db01");

        let template = Target {
            address: "${host}".to_string(),
        };
        assert!(replace(&values, &template).unwrap().is_empty());
    }

    #[test]
    fn test_discovery_overrides_shared_keys() {
        let sources = Sources::new()
            .with_discoverer(Discoverer::new(DEFAULT_DISCOVERY_TTL, || {
                Ok(vec![Discovery::new(
                    Map::from([(
                        "env".to_string(),
                        Value::from(Map::from([("name".to_string(), Value::from("disc"))])),
                    )]),
                    StringMap::new(),
                    EntityRewrites::default(),
                )])
            }))
            .with_variable(
                "env",
                Gatherer::new(DEFAULT_VARIABLES_TTL, || {
                    Ok(Value::from(Map::from([
                        ("name".to_string(), Value::from("shared")),
                        ("zone".to_string(), Value::from("eu")),
                    ])))
                }),
            );
        let values = fetch(&sources).unwrap();
        let ns = &values.matches()[0].namespace;
        assert_eq!(ns["env.name"], "disc");
        assert_eq!(ns["env.zone"], "eu");
        assert_eq!(values.shared()["env.name"], "shared");
    }

    #[test]
    fn test_fan_out_copies_annotations_and_rewrites() {
        let sources = Sources::new().with_discoverer(Discoverer::new(DEFAULT_DISCOVERY_TTL, || {
            Ok(vec![record("10.0.0.1"), record("10.0.0.2")])
        }));
        let values = fetch(&sources).unwrap();
        let template = Target {
            address: "${ip}:80".to_string(),
        };
        let out = replace(&values, &template).unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].variables.address, "10.0.0.1:80");
        assert_eq!(out[1].variables.address, "10.0.0.2:80");
        assert_eq!(out[1].metric_annotations["ip"], "10.0.0.2");
        // rewrites are copied through, not templated
        assert_eq!(out[0].entity_rewrites.0[0].match_, "${ip}");
    }

    #[test]
    fn test_replace_fails_as_a_whole() {
        let sources = Sources::new().with_discoverer(Discoverer::new(DEFAULT_DISCOVERY_TTL, || {
            let mut partial = record("10.0.0.2");
            partial.variables.remove("ip");
            Ok(vec![record("10.0.0.1"), partial])
        }));
        let values = fetch(&sources).unwrap();
        let template = Target {
            address: "${ip}".to_string(),
        };
        let err = replace(&values, &template).unwrap_err();
        assert!(matches!(err, DatabindError::PlaceholderUnresolved { .. }));
    }

    #[test]
    fn test_gatherer_error_aborts_cycle() {
        let sources = Sources::new()
            .with_variable(
                "ok",
                Gatherer::new(DEFAULT_VARIABLES_TTL, || Ok(Value::from("fine"))),
            )
            .with_variable(
                "broken",
                Gatherer::new(DEFAULT_VARIABLES_TTL, || {
                    Err(anyhow::anyhow!("no route to host"))
                }),
            );
        let err = fetch(&sources).unwrap_err();
        assert!(matches!(
            err,
            DatabindError::FetchFailed { ref source_name, .. } if source_name == "broken"
        ));
    }

    #[test]
    fn test_discoverer_error_aborts_cycle() {
        let sources = Sources::new()
            .with_discoverer(Discoverer::new(DEFAULT_DISCOVERY_TTL, || {
                Err(anyhow::anyhow!("docker socket unavailable"))
            }));
        let err = fetch(&sources).unwrap_err();
        assert!(matches!(
            err,
            DatabindError::FetchFailed { ref source_name, .. } if source_name == "discovery"
        ));
    }
}
