//! # Goldenrec
//!
//! A multi-source entity reconciliation and temporal historization engine.
//!
//! Goldenrec decides which records from independently evolving upstream
//! systems describe the same real-world entity, merges their conflicting
//! field values under a configurable precedence policy, versions the
//! resulting canonical record over a gap-free temporal history, and
//! accumulates long-running process milestones into one snapshot row per
//! process instance.

pub mod config;
pub mod error;
pub mod history;
pub mod merge;
pub mod milestones;
pub mod model;
pub mod pipeline;
pub mod quality;
pub mod resolver;
pub mod temporal;

// Re-export main types for convenience
pub use config::{ConfigError, ConfigOverrides, EngineConfig};
pub use error::EngineError;
pub use history::{ApplyEffect, HistoryVersion, TemporalStore};
pub use merge::{ConflictLogEntry, ReconcileRule, ReconciliationPolicy, TieBreak};
pub use milestones::{
    Accumulator, MilestoneDef, MilestoneSchema, ProcessInstance, ProcessStatus, RecordEffect,
    RepeatPolicy,
};
pub use model::{
    BatchContext, BatchId, CanonicalRecord, ContentHash, FieldMap, FieldValue, MasterId,
    ProcessId, SourceId, SourceRecord,
};
pub use pipeline::{BatchReport, EntityTypeOutcome};
pub use quality::{Check, CheckKind, Checklist, QualityReport};
pub use resolver::{IdentityGroup, MatchMethod, MatchingOptions};
pub use temporal::{Instant, Interval, OPEN};

use std::collections::BTreeMap;

/// Main API for reconciliation and historization.
///
/// Owns the externally supplied configuration, one temporal store per
/// entity type, and one milestone accumulator per process type. Batches
/// and milestone events are the only inputs; all outputs are exposed as
/// read-only projections.
pub struct Engine {
    config: EngineConfig,
    histories: BTreeMap<String, TemporalStore>,
    accumulators: BTreeMap<String, Accumulator>,
}

impl Engine {
    /// Create an engine from validated configuration.
    pub fn new(config: EngineConfig) -> Result<Self, config::ConfigError> {
        config.validate()?;

        let mut accumulators = BTreeMap::new();
        for (process_type, schema) in &config.process {
            let accumulator = Accumulator::new(process_type.clone(), schema.clone())
                .map_err(|err| config::ConfigError::new(err.to_string()))?;
            accumulators.insert(process_type.clone(), accumulator);
        }

        Ok(Self {
            config,
            histories: BTreeMap::new(),
            accumulators,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one batch of source records, grouped by entity type.
    pub fn run_batch(
        &mut self,
        ctx: &BatchContext,
        batches: BTreeMap<String, Vec<SourceRecord>>,
    ) -> BatchReport {
        pipeline::run_batch(ctx, batches, &self.config, &mut self.histories)
    }

    /// Record one milestone event for a process type.
    pub fn record_milestone(
        &mut self,
        process_type: &str,
        process_id: ProcessId,
        milestone: &str,
        reached_at: Instant,
        payload: Option<serde_json::Value>,
        ctx: &BatchContext,
    ) -> Result<RecordEffect, EngineError> {
        let accumulator = self.accumulators.get_mut(process_type).ok_or_else(|| {
            EngineError::schema(process_type, "no milestone schema configured")
        })?;
        accumulator.record_milestone(process_id, milestone, reached_at, payload, ctx)
    }

    /// Historized state for one entity type.
    pub fn history(&self, entity_type: &str) -> Option<&TemporalStore> {
        self.histories.get(entity_type)
    }

    /// The milestone accumulator for one process type.
    pub fn processes(&self, process_type: &str) -> Option<&Accumulator> {
        self.accumulators.get(process_type)
    }

    /// One process instance by type and id.
    pub fn process(&self, process_type: &str, process_id: &ProcessId) -> Option<&ProcessInstance> {
        self.accumulators.get(process_type)?.instance(process_id)
    }

    /// Verify the history partition invariant across every entity type.
    pub fn verify_invariants(&self) -> Result<(), EngineError> {
        for store in self.histories.values() {
            store.verify_invariants()?;
        }
        Ok(())
    }
}
