use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key/value tag on a node. Values are plain strings or structured JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: Value,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Value::String(value.into()),
        }
    }

    pub fn structured(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// True when the key lives in `namespace`, i.e. starts with `namespace:`.
    pub fn in_namespace(&self, namespace: &str) -> bool {
        self.key
            .strip_prefix(namespace)
            .is_some_and(|rest| rest.starts_with(':'))
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Value::String(text) => write!(f, "({} = {})", self.key, text),
            other => write!(f, "({} = {})", self.key, other),
        }
    }
}

/// How a new attribute batch merges with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateMode {
    /// Replace the whole attribute list.
    #[default]
    Overwrite,
    /// Keep the old entries and add the new ones behind them.
    Append,
    /// Replace every stored entry sharing a key with an incoming one, append the rest.
    Update,
}

/// Merges `incoming` into `stored` according to `mode` and returns the result.
pub fn merge(stored: &[Attribute], incoming: &[Attribute], mode: UpdateMode) -> Vec<Attribute> {
    match mode {
        UpdateMode::Overwrite => incoming.to_vec(),
        UpdateMode::Append => stored.iter().chain(incoming).cloned().collect(),
        UpdateMode::Update => {
            let mut merged = stored.to_vec();
            for attribute in incoming {
                let mut matched = false;
                for existing in merged.iter_mut().filter(|a| a.key == attribute.key) {
                    existing.value = attribute.value.clone();
                    matched = true;
                }
                if !matched {
                    merged.push(attribute.clone());
                }
            }
            merged
        }
    }
}

/// True if every attribute of `filter` occurs in `attributes`.
pub fn contains_all(attributes: &[Attribute], filter: &[Attribute]) -> bool {
    filter.iter().all(|wanted| attributes.contains(wanted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy() -> Vec<Attribute> {
        vec![
            Attribute::new("rsg:agent_policy", "send no Atoms from context osm"),
            Attribute::new("rsg:agent_policy", "send no PointClouds"),
            Attribute::new("name", "robot1"),
        ]
    }

    #[test]
    fn overwrite_replaces_everything() {
        let merged = merge(&policy(), &[Attribute::new("info", "wiped")], UpdateMode::Overwrite);
        assert_eq!(merged, vec![Attribute::new("info", "wiped")]);
    }

    #[test]
    fn append_keeps_duplicates() {
        let merged = merge(&policy(), &[Attribute::new("name", "robot2")], UpdateMode::Append);
        assert_eq!(merged.len(), 4);
        assert_eq!(merged[3], Attribute::new("name", "robot2"));
    }

    #[test]
    fn update_rewrites_all_matches_and_appends_unknown_keys() {
        let merged = merge(
            &policy(),
            &[
                Attribute::new("rsg:agent_policy", "send no Atoms"),
                Attribute::new("hello", "world"),
            ],
            UpdateMode::Update,
        );
        assert_eq!(
            merged,
            vec![
                Attribute::new("rsg:agent_policy", "send no Atoms"),
                Attribute::new("rsg:agent_policy", "send no Atoms"),
                Attribute::new("name", "robot1"),
                Attribute::new("hello", "world"),
            ]
        );
    }

    #[test]
    fn filter_matching_is_subset_check() {
        let attributes = policy();
        assert!(contains_all(&attributes, &[]));
        assert!(contains_all(&attributes, &[Attribute::new("name", "robot1")]));
        assert!(!contains_all(&attributes, &[Attribute::new("name", "robot2")]));
    }

    #[test]
    fn namespace_needs_colon_boundary() {
        assert!(Attribute::new("osm:name", "x").in_namespace("osm"));
        assert!(Attribute::new("osm::Type", "x").in_namespace("osm"));
        assert!(!Attribute::new("osmosis", "x").in_namespace("osm"));
        assert!(!Attribute::new("name", "osm:x").in_namespace("osm"));
    }

    #[test]
    fn structured_values_round_trip_and_display() {
        let attribute = Attribute::structured("sherpa:command", json!({"direction": [0.3, 0.7, 0.0]}));
        let text = serde_json::to_string(&attribute).unwrap();
        let back: Attribute = serde_json::from_str(&text).unwrap();
        assert_eq!(back, attribute);
        assert_eq!(Attribute::new("name", "box").to_string(), "(name = box)");
    }

    #[test]
    fn update_mode_tokens() {
        assert_eq!(serde_json::to_value(UpdateMode::Overwrite).unwrap(), json!("OVERWRITE"));
        let mode: UpdateMode = serde_json::from_value(json!("APPEND")).unwrap();
        assert_eq!(mode, UpdateMode::Append);
    }
}
