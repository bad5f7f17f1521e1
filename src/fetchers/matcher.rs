// Filters deciding which discovered entities are kept

use crate::data::{flatten, Discovery, Value};
use anyhow::Context;
use regex::Regex;
use std::collections::BTreeMap;

/// Expected value of one flattened discovery variable
#[derive(Debug, Clone)]
pub enum ValueMatcher {
    Literal(String),
    Regex(Regex),
}

impl ValueMatcher {
    /// `/expr/` compiles to a regex, anything else matches literally
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
        {
            Some(expr) if raw.len() >= 2 => {
                let regex =
                    Regex::new(expr).with_context(|| format!("Invalid match regex {}", raw))?;
                Ok(ValueMatcher::Regex(regex))
            }
            _ => Ok(ValueMatcher::Literal(raw.to_string())),
        }
    }

    pub fn is_match(&self, value: &str) -> bool {
        match self {
            ValueMatcher::Literal(expected) => expected == value,
            ValueMatcher::Regex(regex) => regex.is_match(value),
        }
    }
}

/// All-of filter over flattened discovery variables
#[derive(Debug, Clone, Default)]
pub struct DiscoveryMatcher {
    rules: Vec<(String, ValueMatcher)>,
}

impl DiscoveryMatcher {
    pub fn new(rules: &BTreeMap<String, String>) -> anyhow::Result<Self> {
        let rules = rules
            .iter()
            .map(|(path, raw)| Ok((path.clone(), ValueMatcher::parse(raw)?)))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// A discovery is kept when every rule's path exists and matches
    pub fn matches(&self, discovery: &Discovery) -> bool {
        if self.rules.is_empty() {
            return true;
        }
        let flat = flatten(&Value::Map(discovery.variables.clone()));
        self.rules.iter().all(|(path, matcher)| {
            flat.get(path)
                .map(|value| matcher.is_match(value))
                .unwrap_or(false)
        })
    }

    /// Keep the matching discoveries, preserving order
    pub fn filter(&self, discoveries: Vec<Discovery>) -> Vec<Discovery> {
        if self.rules.is_empty() {
            return discoveries;
        }
        let before = discoveries.len();
        let kept: Vec<Discovery> = discoveries.into_iter().filter(|d| self.matches(d)).collect();
        tracing::debug!(before, after = kept.len(), "Filtered discoveries");
        kept
    }
}
