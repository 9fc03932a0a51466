use std::collections::{BTreeSet, HashMap};

use crate::{
    entitykey::EntityKey,
    keygen::KeyGenerator,
    properties::{EntityId, ManagerId},
};

/// One cache: its identity map, the foreign-key index of its entities and its temp key
/// generator.
///
/// The foreign-key index maps a parent key to every attached `(child, association)` whose
/// foreign key names it, whether or not that parent is loaded. It is how a link completes when
/// the parent arrives after the child.
#[derive(Debug, Clone)]
pub struct EntityManager {
    id: ManagerId,
    identity_map: HashMap<EntityKey, EntityId>,
    references: HashMap<EntityKey, BTreeSet<(EntityId, usize)>>,
    key_generator: KeyGenerator,
}

impl EntityManager {
    pub(crate) fn new(temp_string_prefix: &str) -> Self {
        EntityManager {
            id: ManagerId::new(),
            identity_map: HashMap::new(),
            references: HashMap::new(),
            key_generator: KeyGenerator::new(temp_string_prefix),
        }
    }

    pub fn id(&self) -> ManagerId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.identity_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identity_map.is_empty()
    }

    pub fn find(&self, key: &EntityKey) -> Option<EntityId> {
        self.identity_map.get(key).copied()
    }

    pub fn entities(&self) -> impl Iterator<Item = (&EntityKey, EntityId)> {
        self.identity_map.iter().map(|(k, v)| (k, *v))
    }

    pub fn key_generator(&self) -> &KeyGenerator {
        &self.key_generator
    }

    /// Attached children whose foreign key names `key`.
    pub fn referencing(&self, key: &EntityKey) -> impl Iterator<Item = (EntityId, usize)> + '_ {
        self.references
            .get(key)
            .into_iter()
            .flat_map(|refs| refs.iter().copied())
    }

    pub(crate) fn key_generator_mut(&mut self) -> &mut KeyGenerator {
        &mut self.key_generator
    }

    pub(crate) fn insert(&mut self, key: EntityKey, id: EntityId) -> Option<EntityId> {
        self.identity_map.insert(key, id)
    }

    pub(crate) fn remove(&mut self, key: &EntityKey) -> Option<EntityId> {
        self.identity_map.remove(key)
    }

    pub(crate) fn add_reference(&mut self, key: EntityKey, reference: (EntityId, usize)) -> bool {
        self.references.entry(key).or_default().insert(reference)
    }

    pub(crate) fn remove_reference(&mut self, key: &EntityKey, reference: &(EntityId, usize)) -> bool {
        let Some(refs) = self.references.get_mut(key) else {
            return false;
        };
        let removed = refs.remove(reference);
        if refs.is_empty() {
            self.references.remove(key);
        }
        removed
    }

    pub(crate) fn reset(&mut self) {
        self.identity_map.clear();
        self.references.clear();
        self.key_generator.clear();
    }
}
