//! Entity keys: the join identifier across independently queried series.
//!
//! A key is a primary label value (e.g. a job or agent name) plus an
//! optional secondary value (e.g. a model under that agent). It renders
//! as `primary/secondary`; each component is percent-escaped first, so a
//! label value containing `/` can never be mistaken for a sub-entity.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Delimiter between the primary and secondary key components.
pub const KEY_DELIMITER: char = '/';

/// Errors raised while extracting a key from a series' labels.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("series has no `{0}` label")]
    MissingLabel(String),

    #[error("series has an empty `{0}` label")]
    EmptyValue(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    primary: String,
    secondary: Option<String>,
}

impl EntityKey {
    /// A key with only a primary component.
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: None,
        }
    }

    /// A compound `primary/secondary` key.
    pub fn compound(primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: Some(secondary.into()),
        }
    }

    /// Extract a key from series labels.
    ///
    /// `label` names the primary component and must be the same for every
    /// input of one join. `sub_label`, when given, adds the secondary
    /// component. A missing or empty label is an error; callers skip the
    /// series rather than filing it under a placeholder key.
    pub fn from_labels(
        labels: &BTreeMap<String, String>,
        label: &str,
        sub_label: Option<&str>,
    ) -> Result<Self, KeyError> {
        let primary = required_label(labels, label)?;
        match sub_label {
            Some(sub) => Ok(Self::compound(primary, required_label(labels, sub)?)),
            None => Ok(Self::new(primary)),
        }
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn secondary(&self) -> Option<&str> {
        self.secondary.as_deref()
    }

    /// The primary-only key this key belongs to.
    pub fn parent(&self) -> EntityKey {
        EntityKey::new(self.primary.clone())
    }
}

fn required_label(labels: &BTreeMap<String, String>, name: &str) -> Result<String, KeyError> {
    match labels.get(name) {
        None => Err(KeyError::MissingLabel(name.to_string())),
        Some(v) if v.is_empty() => Err(KeyError::EmptyValue(name.to_string())),
        Some(v) => Ok(v.clone()),
    }
}

fn escape_component(raw: &str, out: &mut fmt::Formatter<'_>) -> fmt::Result {
    for c in raw.chars() {
        match c {
            '%' => out.write_str("%25")?,
            KEY_DELIMITER => out.write_str("%2F")?,
            other => write!(out, "{other}")?,
        }
    }
    Ok(())
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        escape_component(&self.primary, f)?;
        if let Some(sub) = &self.secondary {
            write!(f, "{KEY_DELIMITER}")?;
            escape_component(sub, f)?;
        }
        Ok(())
    }
}

impl Serialize for EntityKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn extracts_primary_key() {
        let key = EntityKey::from_labels(&labels(&[("job", "checkout")]), "job", None).unwrap();
        assert_eq!(key.primary(), "checkout");
        assert_eq!(key.secondary(), None);
        assert_eq!(key.to_string(), "checkout");
    }

    #[test]
    fn extracts_compound_key() {
        let l = labels(&[("agent_name", "planner"), ("model", "gpt-4o")]);
        let key = EntityKey::from_labels(&l, "agent_name", Some("model")).unwrap();
        assert_eq!(key.to_string(), "planner/gpt-4o");
        assert_eq!(key.parent(), EntityKey::new("planner"));
    }

    #[test]
    fn missing_label_is_rejected() {
        let err = EntityKey::from_labels(&labels(&[("service", "x")]), "job", None).unwrap_err();
        assert_eq!(err, KeyError::MissingLabel("job".to_string()));
    }

    #[test]
    fn missing_sub_label_is_rejected() {
        let l = labels(&[("agent_name", "planner")]);
        let err = EntityKey::from_labels(&l, "agent_name", Some("model")).unwrap_err();
        assert_eq!(err, KeyError::MissingLabel("model".to_string()));
    }

    #[test]
    fn empty_label_is_rejected() {
        let err = EntityKey::from_labels(&labels(&[("job", "")]), "job", None).unwrap_err();
        assert_eq!(err, KeyError::EmptyValue("job".to_string()));
    }

    #[test]
    fn delimiter_in_value_does_not_collide_with_sub_entity() {
        let slashed = EntityKey::new("a/b");
        let compound = EntityKey::compound("a", "b");
        assert_ne!(slashed, compound);
        assert_ne!(slashed.to_string(), compound.to_string());
        assert_eq!(slashed.to_string(), "a%2Fb");
        assert_eq!(compound.to_string(), "a/b");
    }

    #[test]
    fn percent_is_escaped_too() {
        // "a%2Fb" as a raw value must not render like the escaped "a/b".
        let literal = EntityKey::new("a%2Fb");
        assert_eq!(literal.to_string(), "a%252Fb");
        assert_ne!(literal.to_string(), EntityKey::new("a/b").to_string());
    }

    #[test]
    fn parent_sorts_before_children() {
        let mut keys = vec![
            EntityKey::compound("planner", "b"),
            EntityKey::new("planner"),
            EntityKey::compound("planner", "a"),
        ];
        keys.sort();
        assert_eq!(keys[0], EntityKey::new("planner"));
        assert_eq!(keys[1], EntityKey::compound("planner", "a"));
    }

    #[test]
    fn serializes_as_rendered_string() {
        let json = serde_json::to_string(&EntityKey::compound("x", "y/z")).unwrap();
        assert_eq!(json, r#""x/y%2Fz""#);
    }
}
