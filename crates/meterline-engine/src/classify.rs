//! Threshold classifier.
//!
//! A pure function of one row and the policy table. Within a rule family
//! the first matching rule wins; families are independent, so an entity
//! collects one flag per matching family and its severity is the highest
//! of them.

use meterline_core::{EntityKey, PolicyTable, Severity};

use crate::join::EntityRow;

/// One entity's classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub key: EntityKey,
    /// Reported severity. Equals the classified severity unless a
    /// debouncer held it back.
    pub severity: Severity,
    /// The classifier's own severity when it differs from `severity`.
    pub raw_severity: Option<Severity>,
    pub flags: Vec<String>,
    pub reasons: Vec<String>,
    pub row: EntityRow,
}

impl Finding {
    /// The severity the classifier assigned, before any debouncing.
    pub fn classified_severity(&self) -> Severity {
        self.raw_severity.unwrap_or(self.severity)
    }

    /// A copy reporting `severity` instead, remembering the classified one.
    pub fn with_reported_severity(self, severity: Severity) -> Finding {
        let raw = self.classified_severity();
        Finding {
            severity,
            raw_severity: (raw != severity).then_some(raw),
            ..self
        }
    }
}

#[derive(Debug, Clone)]
pub struct Classifier {
    policy: PolicyTable,
}

impl Classifier {
    pub fn new(policy: PolicyTable) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PolicyTable {
        &self.policy
    }

    pub fn classify(&self, key: EntityKey, row: EntityRow) -> Finding {
        let mut severity = Severity::Ok;
        let mut flags = Vec::new();
        let mut reasons = Vec::new();

        for family in &self.policy.families {
            let matched = family
                .rules
                .iter()
                .find(|rule| rule.matches(row.get(&rule.field)));
            if let Some(rule) = matched {
                severity = severity.max(rule.severity);
                flags.push(rule.flag.clone());
                reasons.push(rule.message.clone());
            }
        }

        Finding {
            key,
            severity,
            raw_severity: None,
            flags,
            reasons,
            row,
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(PolicyTable::standard())
    }
}
