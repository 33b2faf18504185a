//! # Pipeline Module
//!
//! Batch orchestration: score → resolve → merge → version as a strict
//! sequence per entity type, with independent entity types fanned out in
//! parallel. Failures are scoped — a policy error stops only its entity
//! type, and a consistency violation stops only its master id — so one bad
//! configuration never blocks unrelated work.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::history::{ApplyEffect, TemporalStore};
use crate::merge::{self, ConflictLogEntry};
use crate::model::{BatchContext, BatchId, CanonicalRecord, MasterId, SourceRecord};
use crate::resolver;
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, error, instrument, warn};

/// Everything one entity type produced during a batch.
#[derive(Debug)]
pub struct EntityTypeOutcome {
    pub entity_type: String,
    /// Canonical records, recomputed for this batch
    pub canonicals: Vec<CanonicalRecord>,
    /// Append-only conflict log entries emitted by the merge
    pub conflicts: Vec<ConflictLogEntry>,
    /// Versioning effect per master id
    pub effects: Vec<(MasterId, ApplyEffect)>,
    /// Masters matched without a usable key, for manual review
    pub review_queue: Vec<MasterId>,
    /// Per-master consistency violations; history was left untouched
    pub consistency_failures: Vec<EngineError>,
}

impl EntityTypeOutcome {
    fn new(entity_type: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            canonicals: Vec::new(),
            conflicts: Vec::new(),
            effects: Vec::new(),
            review_queue: Vec::new(),
            consistency_failures: Vec::new(),
        }
    }

    /// Count of effects equal to the given kind.
    pub fn effect_count(&self, effect: ApplyEffect) -> usize {
        self.effects.iter().filter(|(_, e)| *e == effect).count()
    }
}

/// A whole-entity-type failure (policy misconfiguration).
#[derive(Debug)]
pub struct EntityTypeFailure {
    pub entity_type: String,
    pub error: EngineError,
}

/// The result of one batch run across all entity types.
#[derive(Debug)]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub outcomes: Vec<EntityTypeOutcome>,
    pub failures: Vec<EntityTypeFailure>,
}

impl BatchReport {
    pub fn outcome(&self, entity_type: &str) -> Option<&EntityTypeOutcome> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.entity_type == entity_type)
    }

    pub fn failure(&self, entity_type: &str) -> Option<&EntityTypeFailure> {
        self.failures
            .iter()
            .find(|failure| failure.entity_type == entity_type)
    }
}

/// Run one batch of source records, grouped by entity type, through the
/// full pipeline.
///
/// Entity types share no identity groups or history rows, so they process
/// in parallel. Within an entity type the stages run as a strict sequence;
/// the scoring/resolution/merge stages are pure, and the only durable
/// writes are the hash-guarded versioning applies, which makes repeated
/// execution of the same batch safe.
#[instrument(skip_all, fields(batch_id = %ctx.batch_id))]
pub fn run_batch(
    ctx: &BatchContext,
    batches: BTreeMap<String, Vec<SourceRecord>>,
    config: &EngineConfig,
    histories: &mut BTreeMap<String, TemporalStore>,
) -> BatchReport {
    for entity_type in batches.keys() {
        histories.entry(entity_type.clone()).or_default();
    }

    let mut pending = batches;
    let mut work: Vec<(String, Vec<SourceRecord>, &mut TemporalStore)> = Vec::new();
    for (entity_type, store) in histories.iter_mut() {
        if let Some(records) = pending.remove(entity_type) {
            work.push((entity_type.clone(), records, store));
        }
    }

    let results: Vec<Result<EntityTypeOutcome, EntityTypeFailure>> = work
        .into_par_iter()
        .map(|(entity_type, records, store)| {
            run_entity_type(ctx, &entity_type, &records, config, store)
        })
        .collect();

    let mut report = BatchReport {
        batch_id: ctx.batch_id.clone(),
        outcomes: Vec::new(),
        failures: Vec::new(),
    };
    for result in results {
        match result {
            Ok(outcome) => report.outcomes.push(outcome),
            Err(failure) => {
                error!(
                    entity_type = %failure.entity_type,
                    error = %failure.error,
                    "entity type failed; other entity types unaffected"
                );
                report.failures.push(failure);
            }
        }
    }
    report
}

fn run_entity_type(
    ctx: &BatchContext,
    entity_type: &str,
    records: &[SourceRecord],
    config: &EngineConfig,
    store: &mut TemporalStore,
) -> Result<EntityTypeOutcome, EntityTypeFailure> {
    let fail = |error: EngineError| EntityTypeFailure {
        entity_type: entity_type.to_string(),
        error,
    };

    let policy = config.policy_for(entity_type).map_err(fail)?;
    policy.validate(entity_type).map_err(fail)?;

    let groups = resolver::resolve(records, policy, &config.matching);
    debug!(
        entity_type,
        records = records.len(),
        groups = groups.len(),
        "resolved identity groups"
    );

    let mut outcome = EntityTypeOutcome::new(entity_type);

    for group in &groups {
        if group.needs_review() {
            warn!(
                entity_type,
                master_id = %group.master_id,
                "no usable business key; flagged for manual review"
            );
            outcome.review_queue.push(group.master_id.clone());
        }

        let (canonical, mut conflicts) = merge::merge(group, policy, &config.quality, ctx);

        match store.apply(&canonical, ctx) {
            Ok(effect) => outcome.effects.push((canonical.master_id.clone(), effect)),
            Err(err) => {
                // Fatal for this master only; the rest of the entity type
                // continues.
                error!(entity_type, error = %err, "versioning rejected");
                outcome.consistency_failures.push(err);
            }
        }

        outcome.conflicts.append(&mut conflicts);
        outcome.canonicals.push(canonical);
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::{ReconcileRule, ReconciliationPolicy, TieBreak};
    use crate::model::{FieldMap, FieldValue};

    fn record(source: &str, key: Option<&str>, rating: i64) -> SourceRecord {
        let mut payload = FieldMap::new();
        payload.insert("rating".to_string(), FieldValue::Integer(rating));
        SourceRecord::new(source, key, payload, 100, "b1")
    }

    fn config_with_supplier() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.policies.insert(
            "supplier".to_string(),
            ReconciliationPolicy {
                primary_source: "erp".into(),
                fallback_source: Some("crm".into()),
                rule: ReconcileRule::MergeFields,
                tie_break: TieBreak::default(),
                tracked_fields: vec![],
            },
        );
        config
    }

    #[test]
    fn test_single_entity_type_end_to_end() {
        let config = config_with_supplier();
        let mut histories = BTreeMap::new();
        let ctx = BatchContext::new("b1", 1_000);

        let mut batches = BTreeMap::new();
        batches.insert(
            "supplier".to_string(),
            vec![record("erp", Some("K1"), 30), record("crm", Some("K1"), 30)],
        );

        let report = run_batch(&ctx, batches, &config, &mut histories);
        assert!(report.failures.is_empty());

        let outcome = report.outcome("supplier").unwrap();
        assert_eq!(outcome.canonicals.len(), 1);
        assert!(outcome.conflicts.is_empty());
        assert_eq!(outcome.effect_count(ApplyEffect::NewEntity), 1);
        assert!(outcome.review_queue.is_empty());
    }

    #[test]
    fn test_bad_entity_type_does_not_block_good_one() {
        // "orders" has no policy configured; "supplier" must still land.
        let config = config_with_supplier();
        let mut histories = BTreeMap::new();
        let ctx = BatchContext::new("b1", 1_000);

        let mut batches = BTreeMap::new();
        batches.insert(
            "supplier".to_string(),
            vec![record("erp", Some("K1"), 30)],
        );
        batches.insert("orders".to_string(), vec![record("erp", Some("O1"), 1)]);

        let report = run_batch(&ctx, batches, &config, &mut histories);

        assert!(report.outcome("supplier").is_some());
        let failure = report.failure("orders").unwrap();
        assert!(matches!(failure.error, EngineError::Policy { .. }));
        // The failed entity type wrote nothing.
        assert_eq!(histories["orders"].version_count(), 0);
        assert_eq!(histories["supplier"].version_count(), 1);
    }

    #[test]
    fn test_keyless_records_flow_through_review_queue() {
        let config = config_with_supplier();
        let mut histories = BTreeMap::new();
        let ctx = BatchContext::new("b1", 1_000);

        let mut batches = BTreeMap::new();
        batches.insert("supplier".to_string(), vec![record("erp", None, 30)]);

        let report = run_batch(&ctx, batches, &config, &mut histories);
        let outcome = report.outcome("supplier").unwrap();

        assert_eq!(outcome.review_queue.len(), 1);
        // Flagged, not dropped: the canonical record still versions.
        assert_eq!(outcome.effect_count(ApplyEffect::NewEntity), 1);
    }

    #[test]
    fn test_rerun_is_no_op() {
        let config = config_with_supplier();
        let mut histories = BTreeMap::new();

        let batches = || {
            let mut batches = BTreeMap::new();
            batches.insert(
                "supplier".to_string(),
                vec![record("erp", Some("K1"), 30), record("crm", Some("K1"), 30)],
            );
            batches
        };

        let ctx = BatchContext::new("b1", 1_000);
        run_batch(&ctx, batches(), &config, &mut histories);
        let report = run_batch(&ctx, batches(), &config, &mut histories);

        let outcome = report.outcome("supplier").unwrap();
        assert_eq!(outcome.effect_count(ApplyEffect::NoChange), 1);
        assert_eq!(histories["supplier"].version_count(), 1);
    }
}
