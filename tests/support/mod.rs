//! Shared builders for integration tests.

#![allow(dead_code)]

use goldenrec::{
    BatchContext, Check, CheckKind, EngineConfig, FieldMap, FieldValue, MilestoneDef,
    MilestoneSchema, ReconcileRule, ReconciliationPolicy, SourceRecord, TieBreak,
};
use std::collections::BTreeMap;

/// A supplier policy with erp as primary, crm as fallback, merging field by
/// field, tracking the fields that matter for history.
pub fn supplier_policy(rule: ReconcileRule) -> ReconciliationPolicy {
    ReconciliationPolicy {
        primary_source: "erp".into(),
        fallback_source: Some("crm".into()),
        rule,
        tie_break: TieBreak::default(),
        tracked_fields: vec!["name".to_string(), "rating".to_string()],
    }
}

/// Engine configuration covering the supplier entity type and the
/// onboarding process type.
pub fn build_config(rule: ReconcileRule) -> EngineConfig {
    let mut config = EngineConfig::default();
    config
        .policies
        .insert("supplier".to_string(), supplier_policy(rule));
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
    config
}

pub fn fields(pairs: &[(&str, FieldValue)]) -> FieldMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn record(
    source: &str,
    key: Option<&str>,
    pairs: &[(&str, FieldValue)],
    captured_at: i64,
    batch: &str,
) -> SourceRecord {
    SourceRecord::new(source, key, fields(pairs), captured_at, batch)
}

pub fn supplier_batch(records: Vec<SourceRecord>) -> BTreeMap<String, Vec<SourceRecord>> {
    let mut batches = BTreeMap::new();
    batches.insert("supplier".to_string(), records);
    batches
}

pub fn ctx(batch: &str, time: i64) -> BatchContext {
    BatchContext::new(batch, time)
}
