use std::collections::BTreeMap;

use crate::{
    aspect::EntityAspect,
    cache::navset::NavigationSet,
    entitykey::EntityKey,
    metadata::EntityType,
    properties::{DataValue, EntityId},
};

/// Arena slot for one entity.
///
/// Every association the entity takes part in has a slot here whether or not the schema exposes
/// a navigation property for it: `parents` holds the resolved "one" end for associations where
/// this entity is the child, `children` holds the set for associations where it is the parent.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EntityRecord {
    pub(crate) id: EntityId,
    pub(crate) entity_type: usize,
    pub(crate) values: Vec<DataValue>,
    pub(crate) parents: BTreeMap<usize, EntityId>,
    pub(crate) children: BTreeMap<usize, NavigationSet>,
    pub(crate) aspect: EntityAspect,
}

impl EntityRecord {
    pub(crate) fn key(&self, entity_type: &EntityType) -> EntityKey {
        EntityKey::new(
            entity_type.name.clone(),
            entity_type
                .key_properties
                .iter()
                .map(|idx| self.values[*idx].clone()),
        )
    }

    /// Every entity this one is linked to, parents first.
    pub(crate) fn neighbours(&self) -> Vec<EntityId> {
        let mut found: Vec<EntityId> = self.parents.values().copied().collect();
        for set in self.children.values() {
            found.extend(set.iter());
        }
        found
    }
}
