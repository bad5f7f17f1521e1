// Entity name rewrites carried by discovery records

use serde::{Deserialize, Serialize};

/// Action performed by an [`EntityRewrite`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewriteAction {
    /// Literal replacement of every occurrence of `match`
    Replace,
    /// Any action this version does not know; applying it is a no-op
    #[serde(other)]
    Unknown,
}

/// A single rewrite rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRewrite {
    pub action: RewriteAction,
    #[serde(rename = "match")]
    pub match_: String,
    pub replace_field: String,
}

impl EntityRewrite {
    pub fn replace(match_: impl Into<String>, replace_field: impl Into<String>) -> Self {
        Self {
            action: RewriteAction::Replace,
            match_: match_.into(),
            replace_field: replace_field.into(),
        }
    }
}

/// Ordered rewrite rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityRewrites(pub Vec<EntityRewrite>);

impl EntityRewrites {
    /// Rewrite an entity name, applying each rule to the result of the previous one
    pub fn apply(&self, entity_name: &str) -> String {
        let mut result = entity_name.to_string();
        for rule in &self.0 {
            if rule.action == RewriteAction::Replace {
                result = result.replace(&rule.match_, &rule.replace_field);
            }
        }
        result
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<EntityRewrite>> for EntityRewrites {
    fn from(rules: Vec<EntityRewrite>) -> Self {
        Self(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_all_occurrences() {
        let rewrites = EntityRewrites::from(vec![EntityRewrite::replace("a", "o")]);
        assert_eq!(rewrites.apply("banana"), "bonono");
    }

    #[test]
    fn test_rules_apply_in_order() {
        let rewrites = EntityRewrites::from(vec![
            EntityRewrite::replace("container:", "docker:"),
            EntityRewrite::replace("docker:abc", "web-1"),
        ]);
        assert_eq!(rewrites.apply("container:abc"), "web-1");
    }

    #[test]
    fn test_replace_is_literal() {
        let rewrites = EntityRewrites::from(vec![EntityRewrite::replace(".*", "x")]);
        assert_eq!(rewrites.apply("a.*b"), "axb");
        assert_eq!(rewrites.apply("ab"), "ab");
    }

    #[test]
    fn test_unknown_action_is_noop() {
        let rewrites: EntityRewrites = serde_json::from_str(
            r#"[{"action":"prepend","match":"a","replaceField":"b"},
                {"action":"replace","match":"c","replaceField":"d"}]"#,
        )
        .unwrap();
        assert_eq!(rewrites.0[0].action, RewriteAction::Unknown);
        assert_eq!(rewrites.apply("abc"), "abd");
    }
}
