//! # History Module
//!
//! Temporal versioning of canonical records. Each master id owns a chain of
//! half-open validity intervals that tiles time with no gaps and no
//! overlaps, with exactly one open, current version. Versions are created
//! and closed as an atomic pair and never deleted.

use crate::error::EngineError;
use crate::model::{BatchContext, BatchId, CanonicalRecord, ContentHash, FieldMap, MasterId};
use crate::temporal::{tiles, Instant, Interval, OPEN};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// One row of an entity's version history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryVersion {
    pub master_id: MasterId,
    /// Field values frozen into this version
    pub version_fields: FieldMap,
    /// Digest over the tracked fields at version time
    pub content_hash: ContentHash,
    /// Start of validity (inclusive)
    pub valid_from: Instant,
    /// End of validity (exclusive; `OPEN` for the active version)
    pub valid_to: Instant,
    pub is_current: bool,
    /// The batch that wrote this row
    pub batch_id: BatchId,
}

impl HistoryVersion {
    /// The validity interval of this version.
    pub fn interval(&self) -> Interval {
        Interval {
            start: self.valid_from,
            end: self.valid_to,
        }
    }
}

/// Effect of applying one canonical record to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyEffect {
    /// Content hash unchanged; nothing written
    NoChange,
    /// First version of a previously unseen master id
    NewEntity,
    /// Current version closed and a new one opened
    NewVersion,
}

/// Historized entity state for one entity type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemporalStore {
    chains: BTreeMap<MasterId, Vec<HistoryVersion>>,
}

impl TemporalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a canonical record, versioning it against the stored history.
    ///
    /// The change-detection guard compares content hashes, so re-applying
    /// an identical batch is a no-op and non-substantive re-deliveries
    /// never grow history. A hash change closes the current version at
    /// `ctx.batch_time` and opens the replacement in the same call, so the
    /// two writes land together or not at all.
    pub fn apply(
        &mut self,
        canonical: &CanonicalRecord,
        ctx: &BatchContext,
    ) -> Result<ApplyEffect, EngineError> {
        let chain = self.chains.entry(canonical.master_id.clone()).or_default();

        let current_count = chain.iter().filter(|v| v.is_current).count();
        if current_count > 1 {
            // External tampering or a prior bug; report, never repair.
            error!(
                master_id = %canonical.master_id,
                current_count,
                "history invariant broken: multiple current versions"
            );
            return Err(EngineError::consistency(
                canonical.master_id.clone(),
                format!("{} current versions found at batch start", current_count),
            ));
        }

        if chain.is_empty() {
            chain.push(HistoryVersion {
                master_id: canonical.master_id.clone(),
                version_fields: canonical.fields.clone(),
                content_hash: canonical.content_hash,
                valid_from: ctx.batch_time,
                valid_to: OPEN,
                is_current: true,
                batch_id: ctx.batch_id.clone(),
            });
            debug!(master_id = %canonical.master_id, "new entity");
            return Ok(ApplyEffect::NewEntity);
        }

        if current_count == 0 {
            return Err(EngineError::consistency(
                canonical.master_id.clone(),
                "history exists but no current version is open",
            ));
        }

        let current_index = chain
            .iter()
            .position(|v| v.is_current)
            .expect("exactly one current version");

        if chain[current_index].content_hash == canonical.content_hash {
            return Ok(ApplyEffect::NoChange);
        }

        let current_from = chain[current_index].valid_from;
        if ctx.batch_time < current_from {
            return Err(EngineError::consistency(
                canonical.master_id.clone(),
                format!(
                    "batch time {} precedes current version's valid_from {}",
                    ctx.batch_time, current_from
                ),
            ));
        }

        if ctx.batch_time == current_from {
            // Superseded at the instant it was opened: rewrite in place
            // rather than closing a zero-width interval.
            let current = &mut chain[current_index];
            current.version_fields = canonical.fields.clone();
            current.content_hash = canonical.content_hash;
            current.batch_id = ctx.batch_id.clone();
            debug!(master_id = %canonical.master_id, "same-instant re-supersede");
            return Ok(ApplyEffect::NewVersion);
        }

        // Close-and-open as one transition: the new version's valid_from
        // equals the prior version's valid_to exactly.
        {
            let current = &mut chain[current_index];
            current.valid_to = ctx.batch_time;
            current.is_current = false;
        }
        chain.push(HistoryVersion {
            master_id: canonical.master_id.clone(),
            version_fields: canonical.fields.clone(),
            content_hash: canonical.content_hash,
            valid_from: ctx.batch_time,
            valid_to: OPEN,
            is_current: true,
            batch_id: ctx.batch_id.clone(),
        });
        debug!(master_id = %canonical.master_id, "new version");
        Ok(ApplyEffect::NewVersion)
    }

    /// The unique version valid at instant `t`, if the master existed then.
    pub fn as_of(&self, master_id: &MasterId, t: Instant) -> Option<&HistoryVersion> {
        self.chains
            .get(master_id)?
            .iter()
            .find(|v| v.valid_from <= t && t < v.valid_to)
    }

    /// The open, current version of a master id.
    pub fn current(&self, master_id: &MasterId) -> Option<&HistoryVersion> {
        self.chains
            .get(master_id)?
            .iter()
            .find(|v| v.is_current)
    }

    /// Full version chain for a master id, oldest first.
    pub fn versions(&self, master_id: &MasterId) -> &[HistoryVersion] {
        self.chains
            .get(master_id)
            .map(|chain| chain.as_slice())
            .unwrap_or(&[])
    }

    /// Current-only projection across all masters.
    pub fn current_projection(&self) -> Vec<&HistoryVersion> {
        self.chains
            .values()
            .flat_map(|chain| chain.iter().filter(|v| v.is_current))
            .collect()
    }

    /// All master ids with history, in stable order.
    pub fn master_ids(&self) -> impl Iterator<Item = &MasterId> {
        self.chains.keys()
    }

    /// Total number of history rows across all masters.
    pub fn version_count(&self) -> usize {
        self.chains.values().map(|chain| chain.len()).sum()
    }

    /// Verify the partition invariant for every master id: exactly one
    /// current version with an open interval, and a chain of intervals that
    /// tiles time with no gaps or overlaps.
    pub fn verify_invariants(&self) -> Result<(), EngineError> {
        for (master_id, chain) in &self.chains {
            let current: Vec<_> = chain.iter().filter(|v| v.is_current).collect();
            if current.len() != 1 {
                return Err(EngineError::consistency(
                    master_id.clone(),
                    format!("expected exactly one current version, found {}", current.len()),
                ));
            }
            if current[0].valid_to != OPEN {
                return Err(EngineError::consistency(
                    master_id.clone(),
                    "current version's valid_to is not open",
                ));
            }
            if chain.iter().any(|v| v.valid_from >= v.valid_to) {
                return Err(EngineError::consistency(
                    master_id.clone(),
                    "empty or inverted validity interval",
                ));
            }
            let intervals: Vec<Interval> = chain.iter().map(|v| v.interval()).collect();
            if !tiles(&intervals) {
                return Err(EngineError::consistency(
                    master_id.clone(),
                    "validity intervals do not tile: gap or overlap detected",
                ));
            }
        }
        Ok(())
    }
}
