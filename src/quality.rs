//! # Quality Module
//!
//! Checklist-driven record scoring. The checklist is externally supplied
//! configuration: each check names a field, a validity kind, and a weight.
//! Scoring is deterministic, side-effect-free, and never fails on malformed
//! input — a failing or missing field simply earns nothing and adds an
//! issue string.

use crate::model::{FieldMap, FieldValue};
use serde::{Deserialize, Serialize};

/// The kind of validity a check asserts over its field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckKind {
    /// Field must be present and non-null
    Required,
    /// Field must be present, non-null, and non-empty text
    NonEmpty,
    /// Field must be numeric and fall within [min, max]
    NumericRange { min: f64, max: f64 },
    /// Field must be text equal to one of the listed values
    OneOf { values: Vec<String> },
}

/// One entry of the quality checklist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    /// The payload field this check inspects
    pub field: String,
    /// What the check asserts
    pub kind: CheckKind,
    /// Points earned when the check passes
    pub weight: u32,
}

impl Check {
    pub fn new(field: impl Into<String>, kind: CheckKind, weight: u32) -> Self {
        Self {
            field: field.into(),
            kind,
            weight,
        }
    }

    /// Evaluate this check against a field map.
    /// Returns the issue string on failure.
    fn evaluate(&self, fields: &FieldMap) -> Result<(), String> {
        let value = fields.get(&self.field).filter(|v| !v.is_null());

        match (&self.kind, value) {
            (CheckKind::Required, Some(_)) => Ok(()),
            (CheckKind::Required, None) => {
                Err(format!("{}: required field missing", self.field))
            }
            (CheckKind::NonEmpty, Some(FieldValue::Text(s))) if !s.trim().is_empty() => Ok(()),
            (CheckKind::NonEmpty, Some(_)) => {
                Err(format!("{}: expected non-empty text", self.field))
            }
            (CheckKind::NonEmpty, None) => Err(format!("{}: required field missing", self.field)),
            (CheckKind::NumericRange { min, max }, Some(v)) => match v.as_f64() {
                Some(n) if n >= *min && n <= *max => Ok(()),
                Some(n) => Err(format!(
                    "{}: value {} outside range [{}, {}]",
                    self.field, n, min, max
                )),
                None => Err(format!("{}: expected a numeric value", self.field)),
            },
            (CheckKind::NumericRange { .. }, None) => {
                Err(format!("{}: required field missing", self.field))
            }
            (CheckKind::OneOf { values }, Some(FieldValue::Text(s))) => {
                if values.iter().any(|allowed| allowed == s) {
                    Ok(())
                } else {
                    Err(format!("{}: value '{}' not in allowed set", self.field, s))
                }
            }
            (CheckKind::OneOf { .. }, Some(_)) => {
                Err(format!("{}: expected a text value", self.field))
            }
            (CheckKind::OneOf { .. }, None) => {
                Err(format!("{}: required field missing", self.field))
            }
        }
    }
}

/// The scoring result for one field map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Weighted sum of passing checks, clamped to [0, 100]
    pub score: u8,
    /// One entry per failing check
    pub issues: Vec<String>,
}

/// The externally supplied quality checklist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checklist {
    #[serde(default)]
    pub checks: Vec<Check>,
}

impl Checklist {
    pub fn new(checks: Vec<Check>) -> Self {
        Self { checks }
    }

    /// Score a field map against the checklist.
    ///
    /// Each passing check earns its weight; each failing check earns 0 and
    /// contributes one issue string. Fields not named by any check never
    /// affect the score. The total is clamped to [0, 100].
    pub fn score(&self, fields: &FieldMap) -> QualityReport {
        let mut earned: u32 = 0;
        let mut issues = Vec::new();

        for check in &self.checks {
            match check.evaluate(fields) {
                Ok(()) => earned = earned.saturating_add(check.weight),
                Err(issue) => issues.push(issue),
            }
        }

        QualityReport {
            score: earned.min(100) as u8,
            issues,
        }
    }

    /// Whether a single field's value satisfies every check declared for it.
    ///
    /// Used by the merge engine to decide whether substituting a field value
    /// improves or degrades quality. A field with no declared checks always
    /// passes.
    pub fn field_passes(&self, field: &str, value: &FieldValue) -> bool {
        let mut probe = FieldMap::new();
        probe.insert(field.to_string(), value.clone());

        self.checks
            .iter()
            .filter(|check| check.field == field)
            .all(|check| check.evaluate(&probe).is_ok())
    }
}
