// src/plan/instance.rs

//! Runtime records: case instances, plan item instances and the sentry
//! memory they carry.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{PlanItemDef, PlanItemDefId, SentryId};
use crate::types::{CaseState, PlanItemState, PlanItemTransition, VariableMap};

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a case instance.
    CaseInstanceId
);
uuid_id!(
    /// Identifier of a plan item instance.
    PlanItemInstanceId
);

/// Remembered on-part occurrences, per `(sentry, on-part index)`.
///
/// Each on-part is remembered independently; a sentry's on-parts are all
/// satisfied once every index is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentryMemory {
    fired: BTreeSet<(SentryId, usize)>,
}

impl SentryMemory {
    /// Returns true when the on-part was not remembered yet.
    pub fn record(&mut self, sentry: SentryId, on_part: usize) -> bool {
        self.fired.insert((sentry, on_part))
    }

    pub fn has_fired(&self, sentry: SentryId, on_part: usize) -> bool {
        self.fired.contains(&(sentry, on_part))
    }

    /// Forget everything remembered for one sentry.
    pub fn reset(&mut self, sentry: SentryId) {
        self.fired.retain(|(s, _)| *s != sentry);
    }

    pub fn clear(&mut self) {
        self.fired.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
    }
}

/// Link from a child case back to the case task that started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    pub case_id: CaseInstanceId,
    pub plan_item_id: PlanItemInstanceId,
    pub blocking: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseInstance {
    pub id: CaseInstanceId,
    pub definition_key: String,
    pub name: String,
    pub business_key: Option<String>,
    pub state: CaseState,
    pub variables: VariableMap,
    pub parent: Option<ParentLink>,
    /// On-part memory of the case plan model's exit criteria.
    pub sentry_memory: SentryMemory,
    pub exit_criterion_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CaseInstance {
    pub fn new(
        id: CaseInstanceId,
        definition_key: impl Into<String>,
        name: impl Into<String>,
        variables: VariableMap,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            definition_key: definition_key.into(),
            name: name.into(),
            business_key: None,
            state: CaseState::Active,
            variables,
            parent: None,
            sentry_memory: SentryMemory::default(),
            exit_criterion_id: None,
            started_at: now,
            ended_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == CaseState::Active
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItemInstance {
    pub id: PlanItemInstanceId,
    pub case_id: CaseInstanceId,
    pub definition: PlanItemDefId,
    /// Model id of the definition (e.g. `"taskA"`).
    pub definition_id: String,
    pub name: String,
    pub kind: String,
    /// Enclosing stage instance; `None` for children of the case plan model.
    pub stage: Option<PlanItemInstanceId>,
    pub state: PlanItemState,
    pub last_transition: PlanItemTransition,
    pub entry_criterion_id: Option<String>,
    pub exit_criterion_id: Option<String>,
    pub local_variables: VariableMap,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub repetition_counter: u32,
    /// Creation order within the case; ties instances of one definition.
    pub sequence: u64,
    pub sentry_memory: SentryMemory,
    pub created_at: DateTime<Utc>,
    pub available_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl PlanItemInstance {
    pub fn new(
        case_id: CaseInstanceId,
        def: &PlanItemDef,
        stage: Option<PlanItemInstanceId>,
        state: PlanItemState,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PlanItemInstanceId::new(),
            case_id,
            definition: def.index,
            definition_id: def.id.clone(),
            name: def.name.clone(),
            kind: def.kind.type_name().to_string(),
            stage,
            state,
            last_transition: PlanItemTransition::Create,
            entry_criterion_id: None,
            exit_criterion_id: None,
            local_variables: VariableMap::new(),
            reference_type: None,
            reference_id: None,
            repetition_counter: 0,
            sequence: 0,
            sentry_memory: SentryMemory::default(),
            created_at: now,
            available_at: (state == PlanItemState::Available).then_some(now),
            started_at: None,
            ended_at: None,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Record the entry criterion that fired. The first recorded id wins.
    pub fn record_entry_criterion(&mut self, criterion: Option<&str>) {
        if self.entry_criterion_id.is_none() {
            self.entry_criterion_id = criterion.map(str::to_string);
        }
    }

    /// Record the exit criterion that fired. The first recorded id wins.
    pub fn record_exit_criterion(&mut self, criterion: Option<&str>) {
        if self.exit_criterion_id.is_none() {
            self.exit_criterion_id = criterion.map(str::to_string);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentry_memory_is_cumulative_per_on_part() {
        let mut memory = SentryMemory::default();
        assert!(memory.record(SentryId(0), 1));
        assert!(!memory.record(SentryId(0), 1));
        memory.record(SentryId(1), 0);

        assert!(memory.has_fired(SentryId(0), 1));
        assert!(!memory.has_fired(SentryId(0), 0));

        memory.reset(SentryId(0));
        assert!(!memory.has_fired(SentryId(0), 1));
        assert!(memory.has_fired(SentryId(1), 0));
    }

    #[test]
    fn ids_round_trip_through_display() {
        let id = PlanItemInstanceId::new();
        let parsed: PlanItemInstanceId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
