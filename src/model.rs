//! # Data Model
//!
//! Core data structures shared across the reconciliation pipeline:
//! source/batch/master identifiers, field values, landed source records,
//! canonical records, and content hashes for change detection.

use crate::temporal::Instant;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of an upstream source system (e.g., "erp", "crm").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Stable identifier of one ingestion batch, supplied by the extraction process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId(pub String);

impl BatchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BatchId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Derived, rerun-stable identifier for one real-world entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MasterId(pub String);

impl MasterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for MasterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MasterId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of one long-running process instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(pub String);

impl ProcessId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Explicit per-batch context threaded through every pipeline call.
///
/// Every row written during a batch carries this batch id, so a failed
/// batch's partial writes can be identified and rolled forward on retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchContext {
    /// Stable identifier of the running batch
    pub batch_id: BatchId,
    /// The instant used as `valid_from`/`valid_to` for version transitions
    pub batch_time: Instant,
}

impl BatchContext {
    pub fn new(batch_id: impl Into<BatchId>, batch_time: Instant) -> Self {
        Self {
            batch_id: batch_id.into(),
            batch_time,
        }
    }
}

/// A single field value as landed from an upstream source.
///
/// Upstream payloads are flat maps of loosely typed scalars; `Null` is kept
/// distinct from an absent field so merge rules can treat explicit nulls as
/// "no value supplied".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Feed a canonical byte representation of this value into a hasher.
    ///
    /// The encoding is tag-prefixed and length-delimited so distinct values
    /// never collide structurally; it is the basis of rerun-stable content
    /// hashes and derived master ids.
    pub fn hash_into(&self, hasher: &mut blake3::Hasher) {
        match self {
            FieldValue::Null => {
                hasher.update(&[0u8]);
            }
            FieldValue::Bool(b) => {
                hasher.update(&[1u8, *b as u8]);
            }
            FieldValue::Integer(i) => {
                hasher.update(&[2u8]);
                hasher.update(&i.to_be_bytes());
            }
            FieldValue::Float(f) => {
                hasher.update(&[3u8]);
                hasher.update(&f.to_bits().to_be_bytes());
            }
            FieldValue::Text(s) => {
                hasher.update(&[4u8]);
                hasher.update(&(s.len() as u64).to_be_bytes());
                hasher.update(s.as_bytes());
            }
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Float(x) => write!(f, "{}", x),
            FieldValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Integer(i)
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        FieldValue::Float(f)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

/// Flat field map of one record. BTreeMap so iteration order, and therefore
/// merge output and content hashing, is deterministic.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// One ingested row from one upstream source for one entity type.
/// Immutable once landed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Which upstream system produced this record
    pub source_id: SourceId,
    /// System-specific natural identifier, if the source supplied one
    pub business_key: Option<String>,
    /// Flat field map as landed
    pub payload: FieldMap,
    /// Upstream capture timestamp
    pub captured_at: Instant,
    /// The batch this record landed in
    pub batch_id: BatchId,
}

impl SourceRecord {
    pub fn new(
        source_id: impl Into<SourceId>,
        business_key: Option<&str>,
        payload: FieldMap,
        captured_at: Instant,
        batch_id: impl Into<BatchId>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            business_key: business_key.map(|k| k.to_string()),
            payload,
            captured_at,
            batch_id: batch_id.into(),
        }
    }

    /// Non-null value of a payload field, if present.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.payload.get(name).filter(|v| !v.is_null())
    }
}

/// Digest over the tracked subset of a canonical record's fields.
///
/// Two canonical records with equal hashes are treated as the same version;
/// changes confined to untracked fields never open a new history version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Hash the tracked subset of a field map.
    ///
    /// An empty `tracked` list means every field is tracked. Field names are
    /// hashed alongside values, and absent tracked fields contribute a
    /// distinct marker, so field renames and removals change the hash.
    pub fn over(fields: &FieldMap, tracked: &[String]) -> Self {
        let mut hasher = blake3::Hasher::new();

        if tracked.is_empty() {
            for (name, value) in fields {
                Self::hash_field(&mut hasher, name, Some(value));
            }
        } else {
            let mut names: Vec<&String> = tracked.iter().collect();
            names.sort();
            names.dedup();
            for name in names {
                Self::hash_field(&mut hasher, name, fields.get(name));
            }
        }

        Self(*hasher.finalize().as_bytes())
    }

    fn hash_field(hasher: &mut blake3::Hasher, name: &str, value: Option<&FieldValue>) {
        hasher.update(&(name.len() as u64).to_be_bytes());
        hasher.update(name.as_bytes());
        match value {
            Some(v) => {
                hasher.update(&[1u8]);
                v.hash_into(hasher);
            }
            None => {
                hasher.update(&[0u8]);
            }
        }
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// The merged, policy-applied view of one identity group.
/// Derived, recomputed every batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Stable master identifier of the underlying entity
    pub master_id: MasterId,
    /// Reconciled field values
    pub fields: FieldMap,
    /// Which source won each field, for auditability
    pub field_sources: BTreeMap<String, SourceId>,
    /// Checklist score of the reconciled field map
    pub quality_score: u8,
    /// Issue strings accumulated by scoring and merge
    pub quality_issues: Vec<String>,
    /// Digest over the tracked fields, used for change detection
    pub content_hash: ContentHash,
}
