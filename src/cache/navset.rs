use serde::Serialize;

use crate::properties::EntityId;

/// The "many" end of one association, owned by the parent entity.
///
/// A set is created with its owner and lives as long as the owner's record, so repeated reads of
/// the same navigation property always return the same set (same [NavigationSet::id]). Members are
/// ordered and unique. Mutation goes through [crate::cache::EntityGraph] (`push`, `insert`,
/// `remove`, `remove_at`, `splice`) so that the members' foreign keys follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavigationSet {
    owner: EntityId,
    association: usize,
    name: String,
    members: Vec<EntityId>,
}

impl NavigationSet {
    pub(crate) fn new(owner: EntityId, association: usize, name: &str) -> Self {
        NavigationSet {
            owner,
            association,
            name: name.to_string(),
            members: vec![],
        }
    }

    /// Stable identity: the owner and the association the set implements.
    pub fn id(&self) -> (EntityId, usize) {
        (self.owner, self.association)
    }

    pub fn owner(&self) -> EntityId {
        self.owner
    }

    /// The navigation property name, or the association name when the parent has no
    /// navigation property for it.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.members.contains(id)
    }

    pub fn get(&self, index: usize) -> Option<EntityId> {
        self.members.get(index).copied()
    }

    pub fn position(&self, id: &EntityId) -> Option<usize> {
        self.members.iter().position(|m| m == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.members.iter().copied()
    }

    pub fn as_slice(&self) -> &[EntityId] {
        &self.members
    }

    /// Returns false if `id` is already a member. `position` is clamped to the length.
    pub(crate) fn insert(&mut self, position: Option<usize>, id: EntityId) -> bool {
        if self.members.contains(&id) {
            return false;
        }
        match position {
            Some(idx) => self.members.insert(idx.min(self.members.len()), id),
            None => self.members.push(id),
        }
        true
    }

    pub(crate) fn remove(&mut self, id: &EntityId) -> bool {
        match self.position(id) {
            Some(idx) => {
                self.members.remove(idx);
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.members.clear();
    }
}
