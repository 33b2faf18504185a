//! # Milestones Module
//!
//! Accumulating-snapshot tracking of long-running process instances. One
//! mutable record per process id gathers milestone timestamps as events
//! trickle in; durations and status are derived from the populated slots,
//! never stored independently.

use crate::error::EngineError;
use crate::model::{BatchContext, BatchId, ProcessId};
use crate::temporal::Instant;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// What to do when an event arrives for an already-populated slot.
///
/// The two policies give materially different audit semantics, so the
/// choice is explicit per milestone and per deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatPolicy {
    /// First write wins; repeats are ignored
    #[default]
    Ignore,
    /// Last write wins; repeats overwrite the slot
    Overwrite,
}

/// One named milestone slot in a process schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneDef {
    pub name: String,
    /// Reaching a terminal milestone freezes the instance
    #[serde(default)]
    pub terminal: bool,
}

impl MilestoneDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            terminal: false,
        }
    }

    pub fn terminal(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            terminal: true,
        }
    }
}

/// The ordered milestone schema for one process type. Externally supplied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MilestoneSchema {
    pub milestones: Vec<MilestoneDef>,
    /// Per-milestone repeat policy; unlisted milestones default to `Ignore`
    #[serde(default)]
    pub repeat_policies: BTreeMap<String, RepeatPolicy>,
}

impl MilestoneSchema {
    pub fn new(milestones: Vec<MilestoneDef>) -> Self {
        Self {
            milestones,
            repeat_policies: BTreeMap::new(),
        }
    }

    /// Validate the schema for one process type.
    pub fn validate(&self, process_type: &str) -> Result<(), EngineError> {
        if self.milestones.is_empty() {
            return Err(EngineError::schema(process_type, "schema has no milestones"));
        }
        let mut seen = std::collections::HashSet::new();
        for def in &self.milestones {
            if !seen.insert(def.name.as_str()) {
                return Err(EngineError::schema(
                    process_type,
                    format!("duplicate milestone '{}'", def.name),
                ));
            }
        }
        for name in self.repeat_policies.keys() {
            if self.position(name).is_none() {
                return Err(EngineError::schema(
                    process_type,
                    format!("repeat policy for unknown milestone '{}'", name),
                ));
            }
        }
        Ok(())
    }

    /// Position of a milestone in schema order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.milestones.iter().position(|def| def.name == name)
    }

    pub fn is_terminal(&self, name: &str) -> bool {
        self.milestones
            .iter()
            .any(|def| def.name == name && def.terminal)
    }

    pub fn repeat_policy(&self, name: &str) -> RepeatPolicy {
        self.repeat_policies.get(name).copied().unwrap_or_default()
    }
}

/// A populated milestone slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneSlot {
    pub reached_at: Instant,
    pub payload: Option<serde_json::Value>,
    /// The batch that populated (or last overwrote) this slot
    pub batch_id: BatchId,
}

/// Derived process status; always a pure function of the populated slots
/// against the ordered schema, so it can never drift from the data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    NotStarted,
    /// The furthest milestone reached, in schema order
    InProgress { latest: String },
    Completed,
}

/// One accumulating-snapshot row per process instance. Mutated in place as
/// milestones arrive; never versioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub process_id: ProcessId,
    /// Populated milestone slots by name
    pub slots: BTreeMap<String, MilestoneSlot>,
}

impl ProcessInstance {
    fn new(process_id: ProcessId) -> Self {
        Self {
            process_id,
            slots: BTreeMap::new(),
        }
    }

    /// Durations between consecutive schema milestones, keyed
    /// "`from`_to_`to`". A missing endpoint yields None, never zero.
    pub fn durations(&self, schema: &MilestoneSchema) -> BTreeMap<String, Option<i64>> {
        let mut durations = BTreeMap::new();
        for pair in schema.milestones.windows(2) {
            let key = format!("{}_to_{}", pair[0].name, pair[1].name);
            let from = self.slots.get(&pair[0].name).map(|s| s.reached_at);
            let to = self.slots.get(&pair[1].name).map(|s| s.reached_at);
            let duration = match (from, to) {
                (Some(from), Some(to)) => Some(to - from),
                _ => None,
            };
            durations.insert(key, duration);
        }
        durations
    }

    /// Derive status from the populated slots.
    pub fn status(&self, schema: &MilestoneSchema) -> ProcessStatus {
        let terminal_reached = schema
            .milestones
            .iter()
            .any(|def| def.terminal && self.slots.contains_key(&def.name));
        if terminal_reached {
            return ProcessStatus::Completed;
        }

        let latest = schema
            .milestones
            .iter()
            .rev()
            .find(|def| self.slots.contains_key(&def.name));
        match latest {
            Some(def) => ProcessStatus::InProgress {
                latest: def.name.clone(),
            },
            None => ProcessStatus::NotStarted,
        }
    }
}

/// Effect of recording one milestone event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordEffect {
    /// Instance created on its first milestone
    Created,
    /// Existing instance updated in place
    Updated,
    /// Slot already populated under the `Ignore` policy
    IgnoredDuplicate,
    /// Instance already reached a terminal milestone and is read-only
    IgnoredOutOfOrder,
}

/// Accumulator of process instances for one process type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Accumulator {
    process_type: String,
    schema: MilestoneSchema,
    instances: BTreeMap<ProcessId, ProcessInstance>,
}

impl Accumulator {
    pub fn new(process_type: impl Into<String>, schema: MilestoneSchema) -> Result<Self, EngineError> {
        let process_type = process_type.into();
        schema.validate(&process_type)?;
        Ok(Self {
            process_type,
            schema,
            instances: BTreeMap::new(),
        })
    }

    pub fn schema(&self) -> &MilestoneSchema {
        &self.schema
    }

    /// Record one milestone event.
    ///
    /// Instances are created lazily on the first milestone for a process
    /// id. Repeats on a populated slot follow the milestone's configured
    /// repeat policy. Once a terminal milestone is reached the instance is
    /// read-only and further events are ignored as out of order.
    pub fn record_milestone(
        &mut self,
        process_id: ProcessId,
        milestone: &str,
        reached_at: Instant,
        payload: Option<serde_json::Value>,
        ctx: &BatchContext,
    ) -> Result<RecordEffect, EngineError> {
        if self.schema.position(milestone).is_none() {
            return Err(EngineError::schema(
                &self.process_type,
                format!("unknown milestone '{}'", milestone),
            ));
        }

        let slot = MilestoneSlot {
            reached_at,
            payload,
            batch_id: ctx.batch_id.clone(),
        };

        let instance = match self.instances.entry(process_id.clone()) {
            std::collections::btree_map::Entry::Vacant(vacant) => {
                let mut instance = ProcessInstance::new(process_id.clone());
                instance.slots.insert(milestone.to_string(), slot);
                vacant.insert(instance);
                debug!(process_id = %process_id, milestone, "process instance created");
                return Ok(RecordEffect::Created);
            }
            std::collections::btree_map::Entry::Occupied(occupied) => occupied.into_mut(),
        };

        if instance.status(&self.schema) == ProcessStatus::Completed {
            warn!(
                process_id = %process_id,
                milestone,
                "event after terminal milestone ignored"
            );
            return Ok(RecordEffect::IgnoredOutOfOrder);
        }

        if instance.slots.contains_key(milestone) {
            match self.schema.repeat_policy(milestone) {
                RepeatPolicy::Ignore => {
                    debug!(process_id = %process_id, milestone, "duplicate milestone ignored");
                    return Ok(RecordEffect::IgnoredDuplicate);
                }
                RepeatPolicy::Overwrite => {
                    instance.slots.insert(milestone.to_string(), slot);
                    return Ok(RecordEffect::Updated);
                }
            }
        }

        instance.slots.insert(milestone.to_string(), slot);
        Ok(RecordEffect::Updated)
    }

    /// One process instance by id.
    pub fn instance(&self, process_id: &ProcessId) -> Option<&ProcessInstance> {
        self.instances.get(process_id)
    }

    /// One row per process id, in stable order.
    pub fn instances(&self) -> impl Iterator<Item = &ProcessInstance> {
        self.instances.values()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
