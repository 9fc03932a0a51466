//! The entity lifecycle state machine.
//!
//! Every entity carries exactly one [EntityState]. A free-standing entity is `Detached`; it
//! enters one of the tracked states when a cache attaches it and returns to `Detached` when it is
//! detached, rejected while `Added`, deleted while `Added`, or when its cache is cleared.
//!
//! The transition rules themselves are enforced by [crate::cache::EntityGraph]; this module owns
//! the vocabulary and the pure checks.

use enumset::{EnumSet, EnumSetType};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::{error::CacheError, properties::EntityId};

#[derive(EnumSetType, Debug, Serialize, Deserialize, Hash)]
pub enum EntityState {
    Detached,
    Added,
    Unchanged,
    Modified,
    Deleted,
}

pub type EntityStateSet = EnumSet<EntityState>;

impl EntityState {
    pub fn is_detached(&self) -> bool {
        *self == EntityState::Detached
    }

    pub fn is_added(&self) -> bool {
        *self == EntityState::Added
    }

    pub fn is_unchanged(&self) -> bool {
        *self == EntityState::Unchanged
    }

    pub fn is_modified(&self) -> bool {
        *self == EntityState::Modified
    }

    pub fn is_deleted(&self) -> bool {
        *self == EntityState::Deleted
    }

    /// Added, Modified or Deleted: states a persistence layer has to act on.
    pub fn is_changed(&self) -> bool {
        Self::changed().contains(*self)
    }

    pub fn changed() -> EntityStateSet {
        EntityState::Added | EntityState::Modified | EntityState::Deleted
    }

    pub fn attached() -> EntityStateSet {
        EnumSet::all() - EntityState::Detached
    }

    /// The state an entity moves to when one of its data properties is written.
    pub fn after_write(&self) -> EntityState {
        match self {
            EntityState::Unchanged => EntityState::Modified,
            other => *other,
        }
    }

    /// Reject `operation` when the entity is not tracked by any cache.
    pub(crate) fn require_attached(&self, entity: EntityId, operation: &str) -> Result<(), CacheError> {
        if self.is_detached() {
            return Err(CacheError::detached(entity, operation));
        }
        Ok(())
    }
}

impl Default for EntityState {
    fn default() -> Self {
        EntityState::Detached
    }
}

impl Display for EntityState {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
