//! # Basic Pipeline Example
//!
//! Demonstrates the core functionality of goldenrec with a simple example
//! showing identity resolution, policy-driven merging, temporal
//! versioning, and milestone accumulation.

use goldenrec::{
    BatchContext, Check, CheckKind, Engine, EngineConfig, FieldValue, MasterId, MilestoneDef,
    MilestoneSchema, ProcessId, ReconcileRule, ReconciliationPolicy, SourceRecord, TieBreak,
};
use std::collections::BTreeMap;

fn main() -> anyhow::Result<()> {
    println!("=== Goldenrec Basic Pipeline ===\n");

    // Configure one entity type with two sources and a quality checklist.
    let mut config = EngineConfig::default();
    config.policies.insert(
        "supplier".to_string(),
        ReconciliationPolicy {
            primary_source: "erp".into(),
            fallback_source: Some("crm".into()),
            rule: ReconcileRule::MergeFields,
            tie_break: TieBreak::PreferPrimary,
            tracked_fields: vec!["name".to_string(), "rating".to_string()],
        },
    );
    config.quality.checks = vec![
        Check::new("name", CheckKind::Required, 40),
        Check::new(
            "rating",
            CheckKind::NumericRange {
                min: 0.0,
                max: 100.0,
            },
            60,
        ),
    ];
    config.process.insert(
        "onboarding".to_string(),
        MilestoneSchema::new(vec![
            MilestoneDef::new("intake"),
            MilestoneDef::new("assigned"),
            MilestoneDef::terminal("completed"),
        ]),
    );

    let mut engine = Engine::new(config)?;

    // Batch 1: both sources describe supplier K1, disagreeing on rating.
    let ctx = BatchContext::new("batch-1", 1_000);
    let mut batches = BTreeMap::new();
    batches.insert(
        "supplier".to_string(),
        vec![
            record("erp", "K1", &[("name", "Acme".into()), ("rating", 40i64.into())], 100),
            record("crm", "K1", &[("name", "Acme".into()), ("rating", 60i64.into())], 110),
        ],
    );

    let report = engine.run_batch(&ctx, batches);
    let outcome = report.outcome("supplier").expect("supplier outcome");
    println!("Batch 1:");
    for canonical in &outcome.canonicals {
        println!(
            "  {} -> rating {} (quality {})",
            canonical.master_id, canonical.fields["rating"], canonical.quality_score
        );
    }
    for conflict in &outcome.conflicts {
        println!(
            "  conflict on '{}': primary={} fallback={} resolved={}",
            conflict.field_name,
            conflict.primary_value,
            conflict.fallback_value,
            conflict.resolved_value
        );
    }

    // Batch 2: the primary source revises the rating; history versions.
    let ctx = BatchContext::new("batch-2", 2_000);
    let mut batches = BTreeMap::new();
    batches.insert(
        "supplier".to_string(),
        vec![record(
            "erp",
            "K1",
            &[("name", "Acme".into()), ("rating", 50i64.into())],
            150,
        )],
    );
    engine.run_batch(&ctx, batches);

    let history = engine.history("supplier").expect("supplier history");
    let master = MasterId::new("K1");
    println!("\nHistory for {}:", master);
    for version in history.versions(&master) {
        println!(
            "  {} rating={} current={}",
            version.interval(),
            version.version_fields["rating"],
            version.is_current
        );
    }

    // Milestones accumulate on a separate process surface.
    let ctx = BatchContext::new("batch-2", 2_000);
    engine.record_milestone("onboarding", ProcessId::new("P1"), "intake", 1_100, None, &ctx)?;
    engine.record_milestone("onboarding", ProcessId::new("P1"), "assigned", 1_400, None, &ctx)?;

    let schema = engine.processes("onboarding").expect("schema").schema().clone();
    let instance = engine
        .process("onboarding", &ProcessId::new("P1"))
        .expect("instance");
    println!("\nProcess P1 status: {:?}", instance.status(&schema));
    for (name, duration) in instance.durations(&schema) {
        println!("  {} = {:?}", name, duration);
    }

    engine.verify_invariants()?;
    println!("\nHistory invariants verified.");
    Ok(())
}

fn record(
    source: &str,
    key: &str,
    pairs: &[(&str, FieldValue)],
    captured_at: i64,
) -> SourceRecord {
    let payload = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    SourceRecord::new(source, Some(key), payload, captured_at, "demo")
}
