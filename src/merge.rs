//! # Merge Engine Module
//!
//! Reconciles one identity group into a canonical record under an
//! externally supplied policy, logging every cross-source disagreement.
//! Merging is a pure function of its inputs: the same group, policy, and
//! checklist always produce the same canonical record and conflict set,
//! which is what makes batch replay safe.

use crate::model::{
    BatchContext, BatchId, CanonicalRecord, ContentHash, FieldMap, FieldValue, MasterId, SourceId,
};
use crate::error::EngineError;
use crate::quality::Checklist;
use crate::resolver::IdentityGroup;
use crate::temporal::Instant;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How conflicting field values from multiple sources are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileRule {
    /// Primary source's value when non-null, else fallback's
    PreferPrimary,
    /// Latest captured value wins; nulls never beat non-nulls
    MostRecent,
    /// Prefer-primary field by field, logging conflicts and resolving
    /// disagreements by the configured tie-break
    MergeFields,
    /// Only the declared source contributes; foreign values are ignored
    /// and never logged
    SingleSource,
}

/// Tie-break applied when `MergeFields` sees two non-null, differing values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    PreferPrimary,
    PreferFallback,
}

/// Per-entity-type reconciliation configuration. Read-only reference data,
/// externally supplied; changing it never requires engine changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationPolicy {
    pub primary_source: SourceId,
    #[serde(default)]
    pub fallback_source: Option<SourceId>,
    pub rule: ReconcileRule,
    #[serde(default)]
    pub tie_break: TieBreak,
    /// Fields covered by the content hash. Empty means every field is
    /// tracked. Untracked fields never trigger a new history version.
    #[serde(default)]
    pub tracked_fields: Vec<String>,
}

impl ReconciliationPolicy {
    /// Validate the policy for one entity type. Policy errors are fatal for
    /// that entity type's batch and must not block other entity types.
    pub fn validate(&self, entity_type: &str) -> Result<(), EngineError> {
        if let Some(fallback) = &self.fallback_source {
            if *fallback == self.primary_source {
                return Err(EngineError::policy(
                    entity_type,
                    format!("fallback source '{}' equals primary source", fallback),
                ));
            }
        }
        if self.rule == ReconcileRule::MergeFields && self.fallback_source.is_none() {
            return Err(EngineError::policy(
                entity_type,
                "rule 'merge_fields' requires a fallback_source",
            ));
        }
        Ok(())
    }
}

/// One disagreement between sources on a single field for a single master.
/// Append-only, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictLogEntry {
    pub master_id: MasterId,
    pub field_name: String,
    pub primary_value: FieldValue,
    pub fallback_value: FieldValue,
    pub resolved_value: FieldValue,
    pub resolution_rule: ReconcileRule,
    pub batch_id: BatchId,
}

/// Latest non-null value per field within one side, with its capture time.
fn side_view(group: &IdentityGroup, side: &SourceId) -> BTreeMap<String, (FieldValue, Instant)> {
    let mut view: BTreeMap<String, (FieldValue, Instant)> = BTreeMap::new();

    let mut members: Vec<_> = group
        .members
        .iter()
        .filter(|r| r.source_id == *side)
        .collect();
    members.sort_by_key(|r| r.captured_at);

    for member in members {
        for (name, value) in &member.payload {
            if !value.is_null() {
                view.insert(name.clone(), (value.clone(), member.captured_at));
            }
        }
    }
    view
}

/// Merge one identity group into a canonical record, emitting one conflict
/// entry per field where the two sides supply non-null, unequal values
/// (except under `SingleSource`).
pub fn merge(
    group: &IdentityGroup,
    policy: &ReconciliationPolicy,
    checklist: &Checklist,
    ctx: &BatchContext,
) -> (CanonicalRecord, Vec<ConflictLogEntry>) {
    let primary_view = side_view(group, &policy.primary_source);
    let fallback_view = policy
        .fallback_source
        .as_ref()
        .map(|fallback| side_view(group, fallback))
        .unwrap_or_default();

    let mut fields = FieldMap::new();
    let mut field_sources: BTreeMap<String, SourceId> = BTreeMap::new();
    let mut conflicts = Vec::new();
    let mut merge_issues = Vec::new();

    if policy.rule == ReconcileRule::SingleSource {
        // Only the declared source contributes; nothing to log.
        for (name, (value, _)) in primary_view {
            fields.insert(name.clone(), value);
            field_sources.insert(name, policy.primary_source.clone());
        }
        return finish(group, policy, checklist, ctx, fields, field_sources, conflicts, merge_issues);
    }

    let field_names: BTreeSet<&String> =
        primary_view.keys().chain(fallback_view.keys()).collect();

    for name in field_names {
        let primary = primary_view.get(name);
        let fallback = fallback_view.get(name);

        let (value, source) = match (primary, fallback) {
            (Some((p, _)), None) => (p.clone(), policy.primary_source.clone()),
            (None, Some((f, _))) => (
                f.clone(),
                policy.fallback_source.clone().expect("fallback view is non-empty"),
            ),
            (Some((p, p_at)), Some((f, f_at))) => {
                let fallback_source = policy
                    .fallback_source
                    .clone()
                    .expect("fallback view is non-empty");
                let chosen = resolve_two_sided(
                    policy,
                    checklist,
                    name,
                    (p, *p_at),
                    (f, *f_at),
                    &fallback_source,
                    &mut merge_issues,
                );
                if p != f {
                    conflicts.push(ConflictLogEntry {
                        master_id: group.master_id.clone(),
                        field_name: name.clone(),
                        primary_value: p.clone(),
                        fallback_value: f.clone(),
                        resolved_value: chosen.0.clone(),
                        resolution_rule: policy.rule,
                        batch_id: ctx.batch_id.clone(),
                    });
                }
                chosen
            }
            (None, None) => continue,
        };

        fields.insert(name.clone(), value);
        field_sources.insert(name.clone(), source);
    }

    finish(group, policy, checklist, ctx, fields, field_sources, conflicts, merge_issues)
}

/// Pick a winner when both sides supply a non-null value.
fn resolve_two_sided(
    policy: &ReconciliationPolicy,
    checklist: &Checklist,
    field: &str,
    (primary, primary_at): (&FieldValue, Instant),
    (fallback, fallback_at): (&FieldValue, Instant),
    fallback_source: &SourceId,
    merge_issues: &mut Vec<String>,
) -> (FieldValue, SourceId) {
    let take_primary = (primary.clone(), policy.primary_source.clone());
    let take_fallback = (fallback.clone(), fallback_source.clone());

    match policy.rule {
        ReconcileRule::PreferPrimary => take_primary,
        ReconcileRule::MergeFields => match policy.tie_break {
            TieBreak::PreferPrimary => take_primary,
            TieBreak::PreferFallback => take_fallback,
        },
        ReconcileRule::MostRecent => {
            // Ties go to the primary side.
            if fallback_at > primary_at {
                // Recency wants to substitute the fallback value over the
                // precedence default; the substitution must not degrade
                // quality.
                let candidate_ok = checklist.field_passes(field, fallback);
                let incumbent_ok = checklist.field_passes(field, primary);
                if candidate_ok || !incumbent_ok {
                    take_fallback
                } else {
                    merge_issues.push(format!(
                        "{}: more recent value from '{}' rejected by quality checks",
                        field, fallback_source
                    ));
                    take_primary
                }
            } else {
                take_primary
            }
        }
        ReconcileRule::SingleSource => unreachable!("single_source handled before field loop"),
    }
}

#[allow(clippy::too_many_arguments)]
fn finish(
    group: &IdentityGroup,
    policy: &ReconciliationPolicy,
    checklist: &Checklist,
    _ctx: &BatchContext,
    fields: FieldMap,
    field_sources: BTreeMap<String, SourceId>,
    conflicts: Vec<ConflictLogEntry>,
    merge_issues: Vec<String>,
) -> (CanonicalRecord, Vec<ConflictLogEntry>) {
    let report = checklist.score(&fields);
    let mut quality_issues = report.issues;
    quality_issues.extend(merge_issues);

    let content_hash = ContentHash::over(&fields, &policy.tracked_fields);

    (
        CanonicalRecord {
            master_id: group.master_id.clone(),
            fields,
            field_sources,
            quality_score: report.score,
            quality_issues,
            content_hash,
        },
        conflicts,
    )
}
