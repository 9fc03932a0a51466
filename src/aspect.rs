use serde::Serialize;
use std::collections::BTreeMap;

use crate::{
    properties::{DataValue, ManagerId},
    state::EntityState,
};

/// Per-entity tracking record.
///
/// Invariant: `entity_manager` is `Some` exactly when `entity_state` is not
/// [EntityState::Detached]. Only [crate::cache::EntityGraph] mutates an aspect.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntityAspect {
    pub(crate) entity_state: EntityState,
    pub(crate) entity_manager: Option<ManagerId>,
    pub(crate) original_values: BTreeMap<String, DataValue>,
    pub(crate) has_temp_key: bool,
}

impl EntityAspect {
    pub fn entity_state(&self) -> EntityState {
        self.entity_state
    }

    pub fn entity_manager(&self) -> Option<ManagerId> {
        self.entity_manager
    }

    /// Values as they were before the first write since the entity was last Unchanged.
    pub fn original_values(&self) -> &BTreeMap<String, DataValue> {
        &self.original_values
    }

    pub fn has_temp_key(&self) -> bool {
        self.has_temp_key
    }

    pub(crate) fn track(&mut self, manager: ManagerId, state: EntityState) {
        self.entity_manager = Some(manager);
        self.entity_state = state;
    }

    pub(crate) fn untrack(&mut self) {
        self.entity_manager = None;
        self.entity_state = EntityState::Detached;
    }

    /// Record `old` as the original value of `property` unless one is already recorded.
    pub(crate) fn remember_original(&mut self, property: &str, old: &DataValue) {
        self.original_values
            .entry(property.to_string())
            .or_insert_with(|| old.clone());
    }
}
