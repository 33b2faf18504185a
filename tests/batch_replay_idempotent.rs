//! Tests for safe batch replay.
//!
//! The engine coordinates retries entirely through idempotent, hash-guarded
//! writes, so these tests verify:
//!
//! 1. Re-running a batch assigns identical master ids and adds zero
//!    history versions
//! 2. Replay holds across multiple entity types processed in parallel
//! 3. Records with no usable business key degrade gracefully instead of
//!    crashing the pipeline

use goldenrec::{ApplyEffect, Engine, MasterId, ReconcileRule};

mod support;

fn engine() -> Engine {
    Engine::new(support::build_config(ReconcileRule::MergeFields)).unwrap()
}

fn master_ids(report: &goldenrec::BatchReport, entity_type: &str) -> Vec<MasterId> {
    report
        .outcome(entity_type)
        .unwrap()
        .canonicals
        .iter()
        .map(|c| c.master_id.clone())
        .collect()
}

/// Applying the same batch twice produces identical master id assignments
/// and zero additional history versions on the second application.
#[test]
fn replay_is_idempotent() {
    let mut engine = engine();
    let ctx = support::ctx("batch-1", 1_000);

    let batch = || {
        support::supplier_batch(vec![
            support::record(
                "erp",
                Some("K1"),
                &[("name", "Acme".into()), ("rating", 30i64.into())],
                100,
                "batch-1",
            ),
            support::record(
                "crm",
                Some("K1"),
                &[("name", "Acme".into()), ("rating", 30i64.into())],
                110,
                "batch-1",
            ),
        ])
    };

    let first = engine.run_batch(&ctx, batch());
    let second = engine.run_batch(&ctx, batch());

    assert_eq!(master_ids(&first, "supplier"), master_ids(&second, "supplier"));

    let history = engine.history("supplier").unwrap();
    assert_eq!(history.version_count(), 1, "replay added no versions");
    assert_eq!(
        second.outcome("supplier").unwrap().effect_count(ApplyEffect::NoChange),
        1
    );
    engine.verify_invariants().unwrap();
}

/// Replay stays idempotent when several entity types run in the same batch.
#[test]
fn replay_is_idempotent_across_entity_types() {
    let mut config = support::build_config(ReconcileRule::MergeFields);
    config.policies.insert(
        "contact".to_string(),
        goldenrec::ReconciliationPolicy {
            primary_source: "crm".into(),
            fallback_source: None,
            rule: ReconcileRule::SingleSource,
            tie_break: Default::default(),
            tracked_fields: vec![],
        },
    );
    let mut engine = Engine::new(config).unwrap();
    let ctx = support::ctx("batch-1", 1_000);

    let batches = || {
        let mut batches = support::supplier_batch(vec![support::record(
            "erp",
            Some("K1"),
            &[("name", "Acme".into()), ("rating", 30i64.into())],
            100,
            "batch-1",
        )]);
        batches.insert(
            "contact".to_string(),
            vec![support::record(
                "crm",
                Some("C1"),
                &[("name", "Pat".into())],
                100,
                "batch-1",
            )],
        );
        batches
    };

    engine.run_batch(&ctx, batches());
    engine.run_batch(&ctx, batches());

    assert_eq!(engine.history("supplier").unwrap().version_count(), 1);
    assert_eq!(engine.history("contact").unwrap().version_count(), 1);
    engine.verify_invariants().unwrap();
}

/// A source record with null business key on both sides resolves to a
/// review-flagged NONE match at confidence 50, and the pipeline completes.
#[test]
fn null_keys_degrade_without_crashing() {
    let mut engine = engine();
    let ctx = support::ctx("batch-1", 1_000);

    let report = engine.run_batch(
        &ctx,
        support::supplier_batch(vec![
            support::record(
                "erp",
                None,
                &[("name", "Mystery Co".into()), ("rating", 10i64.into())],
                100,
                "batch-1",
            ),
            support::record(
                "crm",
                None,
                &[("name", "Enigma Ltd".into()), ("rating", 20i64.into())],
                110,
                "batch-1",
            ),
        ]),
    );

    assert!(report.failures.is_empty());
    let outcome = report.outcome("supplier").unwrap();
    assert_eq!(outcome.canonicals.len(), 2, "each keyless record is its own group");
    assert_eq!(outcome.review_queue.len(), 2);
    assert_eq!(outcome.effect_count(ApplyEffect::NewEntity), 2);
    engine.verify_invariants().unwrap();
}

/// Keyless master ids are content-derived and therefore rerun-stable.
#[test]
fn keyless_master_ids_stable_across_reruns() {
    let batch = || {
        support::supplier_batch(vec![support::record(
            "erp",
            None,
            &[("name", "Mystery Co".into())],
            100,
            "batch-1",
        )])
    };
    let ctx = support::ctx("batch-1", 1_000);

    let mut engine_a = engine();
    let mut engine_b = engine();
    let report_a = engine_a.run_batch(&ctx, batch());
    let report_b = engine_b.run_batch(&ctx, batch());

    assert_eq!(master_ids(&report_a, "supplier"), master_ids(&report_b, "supplier"));
}
