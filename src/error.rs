//! # Error Module
//!
//! Typed failures the engine reports upward. Input-level problems (missing
//! or malformed fields) are never errors — they degrade scores, confidence,
//! and issue lists instead. Errors here are the two fatal classes: policy
//! misconfiguration, scoped to one entity type, and history consistency
//! violations, scoped to one master id.

use crate::model::MasterId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A reconciliation policy is missing or references an unknown rule or
    /// source. Fatal for the named entity type's batch; other entity types
    /// continue.
    #[error("policy error for entity type '{entity_type}': {detail}")]
    Policy { entity_type: String, detail: String },

    /// The versioning invariant would be broken (e.g., two current rows
    /// found at batch start). Fatal for the named master id; history is
    /// never silently repaired.
    #[error("consistency violation for '{master_id}': {detail}")]
    Consistency { master_id: MasterId, detail: String },

    /// A milestone schema is missing or an event names an unknown milestone.
    /// Fatal for the named process type's event; other processes continue.
    #[error("schema error for process type '{process_type}': {detail}")]
    Schema {
        process_type: String,
        detail: String,
    },
}

impl EngineError {
    pub fn policy(entity_type: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Policy {
            entity_type: entity_type.into(),
            detail: detail.into(),
        }
    }

    pub fn consistency(master_id: MasterId, detail: impl Into<String>) -> Self {
        Self::Consistency {
            master_id,
            detail: detail.into(),
        }
    }

    pub fn schema(process_type: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Schema {
            process_type: process_type.into(),
            detail: detail.into(),
        }
    }
}
