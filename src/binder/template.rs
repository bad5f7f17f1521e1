// Placeholder substitution over arbitrary structured templates

use crate::data::FlatNamespace;
use crate::error::{DatabindError, Result};
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::OnceLock;

const PLACEHOLDER_PATTERN: &str = r"\$\{([^${}]+)\}";

/// Compiled once per process and shared by every resolver
fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(PLACEHOLDER_PATTERN).expect("placeholder pattern is valid"))
}

/// Resolves `${path}` placeholders against a flat namespace
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    placeholder: &'static Regex,
}

impl TemplateResolver {
    pub fn new() -> Self {
        Self {
            placeholder: placeholder_regex(),
        }
    }

    /// Resolve every string leaf of `template`, keeping its type.
    ///
    /// Mapping keys are left untouched. Fails on the first placeholder whose
    /// path is missing from the namespace.
    pub fn resolve<T>(&self, namespace: &FlatNamespace, template: &T) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut tree = serde_json::to_value(template).map_err(|e| DatabindError::Template {
            source: e,
            context: "Failed to serialize template".to_string(),
        })?;
        self.resolve_tree(namespace, &mut tree)?;
        serde_json::from_value(tree).map_err(|e| DatabindError::Template {
            source: e,
            context: "Failed to rebuild resolved template".to_string(),
        })
    }

    fn resolve_tree(&self, namespace: &FlatNamespace, node: &mut serde_json::Value) -> Result<()> {
        match node {
            serde_json::Value::String(s) => {
                if let Some(resolved) = self.resolve_str(namespace, s)? {
                    *s = resolved;
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    self.resolve_tree(namespace, item)?;
                }
            }
            serde_json::Value::Object(fields) => {
                for (_, field) in fields.iter_mut() {
                    self.resolve_tree(namespace, field)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Substitute the placeholders of one string. `None` when it has none.
    pub fn resolve_str(&self, namespace: &FlatNamespace, input: &str) -> Result<Option<String>> {
        if !self.placeholder.is_match(input) {
            return Ok(None);
        }
        let mut missing: Option<String> = None;
        let resolved = self.placeholder.replace_all(input, |caps: &Captures| {
            let path = &caps[1];
            match namespace.get(path) {
                Some(value) => value.clone(),
                None => {
                    missing.get_or_insert_with(|| path.to_string());
                    String::new()
                }
            }
        });
        match missing {
            Some(path) => Err(DatabindError::PlaceholderUnresolved { path }),
            None => Ok(Some(resolved.into_owned())),
        }
    }
}

impl Default for TemplateResolver {
    fn default() -> Self {
        Self::new()
    }
}
