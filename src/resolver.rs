//! # Identity Resolver Module
//!
//! Partitions one entity type's batch of source records into identity
//! groups by business-key equality across sources, and derives a
//! rerun-stable master id for each group. The resolver never fails on
//! missing keys — records without a usable key degrade to singleton groups
//! flagged for manual review.

use crate::merge::ReconciliationPolicy;
use crate::model::{MasterId, SourceRecord};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// How an identity group's members were matched together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    /// Both sides present with equal business keys
    Exact,
    /// Only the primary-source side supplied the key
    OneSidedPrimary,
    /// Only the fallback-source side supplied the key
    OneSidedFallback,
    /// Keys matched only after normalization (trim + case fold)
    Fuzzy,
    /// No usable key on either side; flagged for manual review
    None,
}

/// The set of source records believed to represent one real-world entity.
/// Rebuilt per batch; `master_id` stays stable across reruns of the same
/// input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityGroup {
    pub master_id: MasterId,
    pub members: Vec<SourceRecord>,
    /// 0-100 confidence in the grouping
    pub match_confidence: u8,
    pub match_method: MatchMethod,
}

impl IdentityGroup {
    pub fn new(
        master_id: MasterId,
        members: Vec<SourceRecord>,
        match_confidence: u8,
        match_method: MatchMethod,
    ) -> Self {
        Self {
            master_id,
            members,
            match_confidence,
            match_method,
        }
    }

    /// Groups matched without a usable key go to the manual-review surface.
    ///
    /// This is also where business-key collisions between distinct
    /// real-world entities would have to be caught: the resolver cannot
    /// detect them, so review is the only remediation path.
    pub fn needs_review(&self) -> bool {
        self.match_method == MatchMethod::None
    }
}

/// Resolver matching options, externally supplied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingOptions {
    /// Compare business keys after trimming and case folding. A group that
    /// only matches after normalization is reported as `Fuzzy`.
    pub normalize_keys: bool,
}

/// Partition a batch of source records for one entity type into identity
/// groups.
///
/// Any two records whose business keys are non-null and equal (after
/// optional normalization) join one group; records with no key form
/// singleton groups. Output is sorted by master id so reruns of the same
/// input produce identical group lists.
pub fn resolve(
    records: &[SourceRecord],
    policy: &ReconciliationPolicy,
    options: &MatchingOptions,
) -> Vec<IdentityGroup> {
    let mut keyed: HashMap<String, Vec<&SourceRecord>> = HashMap::new();
    let mut unkeyed: Vec<&SourceRecord> = Vec::new();

    for record in records {
        match record.business_key.as_deref() {
            Some(key) if !key.trim().is_empty() => {
                let group_key = if options.normalize_keys {
                    key.trim().to_lowercase()
                } else {
                    key.to_string()
                };
                keyed.entry(group_key).or_default().push(record);
            }
            _ => unkeyed.push(record),
        }
    }

    let mut groups = Vec::with_capacity(keyed.len() + unkeyed.len());

    for (group_key, members) in keyed {
        groups.push(build_keyed_group(&group_key, members, policy, options));
    }

    for record in unkeyed {
        groups.push(IdentityGroup::new(
            master_from_record(record),
            vec![record.clone()],
            50,
            MatchMethod::None,
        ));
    }

    groups.sort_by(|a, b| a.master_id.cmp(&b.master_id));
    groups
}

fn build_keyed_group(
    group_key: &str,
    mut members: Vec<&SourceRecord>,
    policy: &ReconciliationPolicy,
    options: &MatchingOptions,
) -> IdentityGroup {
    members.sort_by(|a, b| {
        (&a.source_id, a.captured_at, &a.business_key)
            .cmp(&(&b.source_id, b.captured_at, &b.business_key))
    });

    let has_primary = members
        .iter()
        .any(|r| r.source_id == policy.primary_source);
    let has_fallback = policy
        .fallback_source
        .as_ref()
        .map(|fallback| members.iter().any(|r| r.source_id == *fallback))
        .unwrap_or(false);

    // Normalization "did work" when the raw keys in the group differ.
    let normalized_match = options.normalize_keys
        && members
            .windows(2)
            .any(|pair| pair[0].business_key != pair[1].business_key);

    let (method, confidence) = match (has_primary, has_fallback) {
        (true, true) if normalized_match => (MatchMethod::Fuzzy, 70),
        (true, true) => (MatchMethod::Exact, 100),
        (true, false) => (MatchMethod::OneSidedPrimary, 90),
        (false, true) => (MatchMethod::OneSidedFallback, 85),
        // Keyed records from sources the policy does not declare: grouped,
        // but flagged for review like unkeyed records.
        (false, false) => (MatchMethod::None, 50),
    };

    let master_id = if has_primary {
        master_from_side(&members, &policy.primary_source)
    } else if has_fallback {
        master_from_side(&members, policy.fallback_source.as_ref().unwrap())
    } else {
        master_from_key(group_key)
    };

    IdentityGroup::new(
        master_id,
        members.into_iter().cloned().collect(),
        confidence,
        method,
    )
}

/// Lexicographically smallest raw key on the winning side, so the choice is
/// stable regardless of member ordering or capture times.
fn master_from_side(members: &[&SourceRecord], side: &crate::model::SourceId) -> MasterId {
    let key = members
        .iter()
        .filter(|r| r.source_id == *side)
        .filter_map(|r| r.business_key.as_deref())
        .min()
        .expect("side has at least one keyed member");
    MasterId::new(key)
}

fn master_from_key(key: &str) -> MasterId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"key:");
    hasher.update(key.as_bytes());
    short_master(hasher)
}

/// Stable content-derived master id for records with no usable key.
fn master_from_record(record: &SourceRecord) -> MasterId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"record:");
    hasher.update(record.source_id.as_str().as_bytes());
    hasher.update(&record.captured_at.to_be_bytes());
    for (name, value) in &record.payload {
        hasher.update(&(name.len() as u64).to_be_bytes());
        hasher.update(name.as_bytes());
        value.hash_into(&mut hasher);
    }
    short_master(hasher)
}

fn short_master(hasher: blake3::Hasher) -> MasterId {
    let digest = hasher.finalize();
    let hex: String = digest.as_bytes()[..8]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();
    MasterId::new(format!("M{}", hex))
}
