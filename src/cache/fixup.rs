//! The relationship fixup engine.
//!
//! A relationship has three views: the child's foreign key values, the child's link to its
//! parent and the parent's [crate::cache::NavigationSet]. Every entry point here changes one view
//! and brings the other two along:
//!
//! - [EntityGraph::relink] moves a link and, when asked, writes the child's foreign key.
//! - [EntityGraph::write_data] writes a value; a foreign key re-resolves its link through the
//!   identity map, a key property re-indexes the entity and re-points its children.
//! - [EntityGraph::attach_graph] walks the detached neighbourhood of an entity with a worklist,
//!   links every newly attached entity to its attached parents by foreign key and completes
//!   links of attached children that were waiting for it.
//!
//! Foreign keys written by [EntityGraph::relink] are guarded per `(child, association)` edge so
//! that the write does not bounce back into FK-to-navigation fixup for the same edge.

use std::collections::{HashSet, VecDeque};

use crate::{
    cache::EntityGraph,
    entitykey::EntityKey,
    error::CacheError,
    event::{EntityAction, EntityEvent},
    metadata::AutoGeneratedKeyType,
    properties::{DataValue, EntityId, ManagerId},
    state::EntityState,
};

/// How [EntityGraph::relink] treats the edge it moves.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Relink {
    /// Write the child's foreign key from the new parent's key.
    pub(crate) sync_fk: bool,
    /// Foreign key writes mark the child Modified.
    pub(crate) track: bool,
    /// Insert position in the new parent's set.
    pub(crate) position: Option<usize>,
    /// Owner whose set event the caller raises itself.
    pub(crate) quiet: Option<EntityId>,
}

impl Relink {
    /// A link change requested by the caller: the foreign key follows and is tracked.
    pub(crate) fn user() -> Self {
        Relink {
            sync_fk: true,
            track: true,
            ..Default::default()
        }
    }
}

impl EntityGraph {
    /// Point `child`'s link for `association` at `new_parent`, keeping both sets in agreement.
    pub(crate) fn relink(
        &mut self,
        association: usize,
        child: EntityId,
        new_parent: Option<EntityId>,
        opts: Relink,
    ) -> Result<(), CacheError> {
        let metadata = self.metadata.clone();
        let assoc = metadata.association(association);
        let old_parent = self.record(child)?.parents.get(&association).copied();

        if old_parent != new_parent {
            if let Some(old) = old_parent {
                if self.contains(old) {
                    let removed = self
                        .record_mut(old)?
                        .children
                        .get_mut(&association)
                        .is_some_and(|set| set.remove(&child));
                    if removed && opts.quiet != Some(old) {
                        self.emit_collection(old, association, vec![], vec![child])?;
                    }
                }
            }

            let record = self.record_mut(child)?;
            match new_parent {
                Some(parent) => record.parents.insert(association, parent),
                None => record.parents.remove(&association),
            };
            if let Some(nav) = assoc.resolved.child_navigation {
                let name = &metadata
                    .type_at(assoc.resolved.child_type)
                    .navigation_properties[nav]
                    .name;
                self.emit(EntityEvent::property(child, name, old_parent, new_parent));
            }

            if let Some(parent) = new_parent {
                let inserted = self
                    .record_mut(parent)?
                    .children
                    .get_mut(&association)
                    .is_some_and(|set| set.insert(opts.position, child));
                if inserted && opts.quiet != Some(parent) {
                    self.emit_collection(parent, association, vec![child], vec![])?;
                }
            }
            tracing::trace!(
                "[EntityGraph::relink] {}: {child} {old_parent:?} -> {new_parent:?}",
                assoc.name
            );
        }

        if opts.sync_fk {
            self.sync_foreign_key(association, child, new_parent, opts.track)?;
        }
        Ok(())
    }

    /// Copy `parent`'s key into `child`'s foreign key. Without a parent, nullable foreign key
    /// properties become null and required ones keep their value.
    pub(crate) fn sync_foreign_key(
        &mut self,
        association: usize,
        child: EntityId,
        parent: Option<EntityId>,
        track: bool,
    ) -> Result<(), CacheError> {
        let metadata = self.metadata.clone();
        let assoc = metadata.association(association);
        let child_type = metadata.type_at(assoc.resolved.child_type);
        let values: Vec<Option<DataValue>> = match parent {
            Some(parent) => self
                .entity_key(parent)?
                .values()
                .iter()
                .cloned()
                .map(Some)
                .collect(),
            None => assoc
                .resolved
                .foreign_keys
                .iter()
                .map(|fk| child_type.data_properties[*fk].is_nullable.then_some(DataValue::Null))
                .collect(),
        };

        let fresh = self.fixup_guard.insert((child, association));
        let result = assoc
            .resolved
            .foreign_keys
            .iter()
            .zip(values)
            .try_for_each(|(fk, value)| match value {
                Some(value) => self.write_data(child, *fk, value, track).map(|_| ()),
                None => Ok(()),
            });
        if fresh {
            self.fixup_guard.remove(&(child, association));
        }
        result
    }

    /// Write one data property. Returns false for a no-op write.
    ///
    /// With `track`, a write to an Unchanged entity makes it Modified and the first-seen value is
    /// kept as the original. Untracked writes are used for attach-time foreign key syncs, temp
    /// keys and restoring originals.
    pub(crate) fn write_data(
        &mut self,
        id: EntityId,
        property_idx: usize,
        value: DataValue,
        track: bool,
    ) -> Result<bool, CacheError> {
        let metadata = self.metadata.clone();
        let record = self.record(id)?;
        let entity_type = metadata.type_at(record.entity_type);
        let property = &entity_type.data_properties[property_idx];
        if !property.data_type.accepts(&value) {
            return Err(CacheError::invalid_value(
                &entity_type.name,
                &property.name,
                format!("{value} is not a valid {}", property.data_type),
            ));
        }
        if value.is_null() && !property.is_nullable {
            return Err(CacheError::invalid_value(
                &entity_type.name,
                &property.name,
                "property is not nullable",
            ));
        }
        let old = record.values[property_idx].clone();
        if old == value {
            return Ok(false);
        }
        let state = record.aspect.entity_state;
        let manager = record.aspect.entity_manager;
        let fk_associations = entity_type
            .foreign_key_associations
            .get(&property_idx)
            .cloned()
            .unwrap_or_default();

        if property.is_part_of_key {
            if let Some(mid) = manager {
                let old_key = record.key(entity_type);
                let new_key = EntityKey::new(
                    entity_type.name.clone(),
                    entity_type.key_properties.iter().map(|k| {
                        if *k == property_idx {
                            value.clone()
                        } else {
                            record.values[*k].clone()
                        }
                    }),
                );
                if let Some(other) = self.manager(mid)?.find(&new_key) {
                    if other != id {
                        return Err(CacheError::DuplicateKey { key: new_key });
                    }
                }
                self.index_remove(mid, &old_key)?;
                self.index_insert(mid, new_key, id)?;
                self.retire_temp_key(mid, &old_key)?;
            }
        }

        let mut old_fks = vec![];
        if manager.is_some() {
            for association in fk_associations.iter() {
                old_fks.push((*association, self.foreign_key(id, *association)?));
            }
        }

        let mut state_changed = false;
        let record = self.record_mut(id)?;
        record.values[property_idx] = value.clone();
        if track && matches!(state, EntityState::Unchanged | EntityState::Modified | EntityState::Deleted) {
            record.aspect.remember_original(&property.name, &old);
            if state.is_unchanged() {
                record.aspect.entity_state = state.after_write();
                state_changed = true;
            }
        }
        self.emit(EntityEvent::data(id, &property.name, old, value));

        if let Some(mid) = manager {
            if state_changed {
                self.emit(EntityEvent::EntityChanged {
                    manager: mid,
                    entity: Some(id),
                    action: EntityAction::EntityStateChange,
                });
            }
            for (association, old_fk) in old_fks {
                if let Some(key) = old_fk {
                    self.reference_remove(mid, &key, (id, association))?;
                }
                if let Some(key) = self.foreign_key(id, association)? {
                    self.reference_insert(mid, key, (id, association))?;
                }
            }
        }

        if property.is_part_of_key {
            self.propagate_key(id, track)?;
            if let Some(mid) = manager {
                self.resolve_pending_children(mid, id)?;
            }
        }

        for association in fk_associations {
            if !self.fixup_guard.contains(&(id, association)) {
                self.fixup_foreign_key(id, association)?;
            }
        }
        Ok(true)
    }

    /// The parent key named by `child`'s foreign key for `association`, or `None` when any part
    /// is null. A default value (`0`, nil Guid, `""`) is a real key.
    pub(crate) fn foreign_key(
        &self,
        child: EntityId,
        association: usize,
    ) -> Result<Option<EntityKey>, CacheError> {
        let record = self.record(child)?;
        let assoc = self.metadata.association(association);
        let parent_type = self.metadata.type_at(assoc.resolved.parent_type);
        let mut values = Vec::with_capacity(assoc.resolved.foreign_keys.len());
        for fk in assoc.resolved.foreign_keys.iter() {
            let value = &record.values[*fk];
            if value.is_null() {
                return Ok(None);
            }
            values.push(value.clone());
        }
        Ok(Some(EntityKey::new(parent_type.name.clone(), values)))
    }

    /// An entity of `mid` with `key` that can take part in links (not Deleted).
    fn live_entity(&self, mid: ManagerId, key: &EntityKey) -> Result<Option<EntityId>, CacheError> {
        match self.manager(mid)?.find(key) {
            Some(id) if !self.record(id)?.aspect.entity_state.is_deleted() => Ok(Some(id)),
            _ => Ok(None),
        }
    }

    /// Re-resolve `child`'s link for `association` after its foreign key changed.
    fn fixup_foreign_key(&mut self, child: EntityId, association: usize) -> Result<(), CacheError> {
        let record = self.record(child)?;
        let current = record.parents.get(&association).copied();
        let state = record.aspect.entity_state;
        let manager = record.aspect.entity_manager;
        let target_key = self.foreign_key(child, association)?;
        match manager {
            Some(mid) => {
                if state.is_deleted() {
                    return Ok(());
                }
                let target = match &target_key {
                    Some(key) => self.live_entity(mid, key)?,
                    None => None,
                };
                if target != current {
                    self.relink(association, child, target, Relink::default())?;
                }
            }
            // Without a cache there is nothing to look up; only a link that no longer matches
            // is dropped.
            None => {
                if let Some(parent) = current {
                    if target_key != Some(self.entity_key(parent)?) {
                        self.relink(association, child, None, Relink::default())?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Re-point the foreign keys of every child in `parent`'s sets at its current key.
    fn propagate_key(&mut self, parent: EntityId, track: bool) -> Result<(), CacheError> {
        let record = self.record(parent)?;
        let sets: Vec<(usize, Vec<EntityId>)> = record
            .children
            .iter()
            .map(|(association, set)| (*association, set.as_slice().to_vec()))
            .collect();
        for (association, members) in sets {
            for child in members {
                self.sync_foreign_key(association, child, Some(parent), track)?;
            }
        }
        Ok(())
    }

    /// Link attached children whose foreign key already names `parent`'s key.
    fn resolve_pending_children(&mut self, mid: ManagerId, parent: EntityId) -> Result<(), CacheError> {
        if self.record(parent)?.aspect.entity_state.is_deleted() {
            return Ok(());
        }
        let key = self.entity_key(parent)?;
        let pending: Vec<(EntityId, usize)> = self.manager(mid)?.referencing(&key).collect();
        for (child, association) in pending {
            let record = self.record(child)?;
            if record.aspect.entity_state.is_deleted()
                || record.parents.get(&association) == Some(&parent)
            {
                continue;
            }
            tracing::trace!("[EntityGraph::resolve_pending_children] {key} <- {child}");
            self.relink(association, child, Some(parent), Relink::default())?;
        }
        Ok(())
    }

    /// Re-resolve every link of `id` from foreign keys, in both directions.
    pub(crate) fn relink_by_foreign_keys(&mut self, mid: ManagerId, id: EntityId) -> Result<(), CacheError> {
        let metadata = self.metadata.clone();
        let entity_type = metadata.type_at(self.record(id)?.entity_type);
        for association in entity_type.child_associations.iter() {
            self.fixup_foreign_key(id, *association)?;
        }
        self.resolve_pending_children(mid, id)
    }

    /// Drop every link of `id` on both ends. Foreign keys are left alone.
    pub(crate) fn drop_links(&mut self, id: EntityId) -> Result<(), CacheError> {
        let record = self.record(id)?;
        let parents: Vec<usize> = record.parents.keys().copied().collect();
        let sets: Vec<(usize, Vec<EntityId>)> = record
            .children
            .iter()
            .map(|(association, set)| (*association, set.as_slice().to_vec()))
            .collect();
        for association in parents {
            self.relink(association, id, None, Relink::default())?;
        }
        for (association, members) in sets {
            if members.is_empty() {
                continue;
            }
            let quiet = Relink {
                quiet: Some(id),
                ..Default::default()
            };
            for child in members.iter() {
                self.relink(association, *child, None, quiet)?;
            }
            self.emit_collection(id, association, vec![], members)?;
        }
        Ok(())
    }

    /// Make sure `a` and `b` can be linked: both in one cache, or the untracked one pulled into
    /// the other's cache as Added.
    pub(crate) fn reconcile(&mut self, a: EntityId, b: EntityId) -> Result<(), CacheError> {
        let manager_a = self.record(a)?.aspect.entity_manager;
        let manager_b = self.record(b)?.aspect.entity_manager;
        match (manager_a, manager_b) {
            (Some(x), Some(y)) if x != y => Err(CacheError::CrossCacheAttach {
                entity: b,
                owner: y,
                target: x,
            }),
            (Some(x), None) => self.attach_graph(x, b, EntityState::Added),
            (None, Some(y)) => self.attach_graph(y, a, EntityState::Added),
            _ => Ok(()),
        }
    }

    /// Link `child` into `owner`'s set at `position`, attaching whichever side is untracked.
    pub(crate) fn adopt(
        &mut self,
        owner: EntityId,
        association: usize,
        child: EntityId,
        position: usize,
    ) -> Result<(), CacheError> {
        self.reconcile(owner, child)?;
        self.relink(
            association,
            child,
            Some(owner),
            Relink {
                position: Some(position),
                quiet: Some(owner),
                ..Relink::user()
            },
        )
    }

    /// Unlink `child` from `owner`'s set; nullable foreign keys are cleared.
    pub(crate) fn release(
        &mut self,
        owner: EntityId,
        association: usize,
        child: EntityId,
    ) -> Result<(), CacheError> {
        self.relink(
            association,
            child,
            None,
            Relink {
                quiet: Some(owner),
                ..Relink::user()
            },
        )
    }

    pub(crate) fn assign_temp_key(&mut self, mid: ManagerId, id: EntityId) -> Result<DataValue, CacheError> {
        let metadata = self.metadata.clone();
        let entity_type = metadata.type_at(self.record(id)?.entity_type);
        let value = self.manager_mut(mid)?.key_generator_mut().generate(entity_type)?;
        self.log_temp_key(mid, EntityKey::new(entity_type.name.clone(), [value.clone()]));
        if let Some(key) = entity_type.key_properties.first() {
            self.write_data(id, *key, value.clone(), false)?;
        }
        self.record_mut(id)?.aspect.has_temp_key = true;
        Ok(value)
    }

    /// Attach `root` and its detached neighbourhood. Each entity is visited once.
    pub(crate) fn attach_graph(
        &mut self,
        mid: ManagerId,
        root: EntityId,
        state: EntityState,
    ) -> Result<(), CacheError> {
        if state.is_detached() {
            return Err(CacheError::InvalidStateTransition {
                entity: root,
                from: self.record(root)?.aspect.entity_state,
                operation: "attach with state Detached".to_string(),
            });
        }
        self.manager(mid)?;
        let mut queue = VecDeque::from([root]);
        let mut visited = HashSet::new();
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            match self.record(id)?.aspect.entity_manager {
                Some(owner) if owner == mid => continue,
                Some(owner) => {
                    return Err(CacheError::CrossCacheAttach {
                        entity: id,
                        owner,
                        target: mid,
                    })
                }
                None => {}
            }
            self.attach_one(mid, id, state)?;
            for neighbour in self.record(id)?.neighbours() {
                if !visited.contains(&neighbour) {
                    queue.push_back(neighbour);
                }
            }
        }
        Ok(())
    }

    fn attach_one(&mut self, mid: ManagerId, id: EntityId, state: EntityState) -> Result<(), CacheError> {
        let metadata = self.metadata.clone();
        let entity_type = metadata.type_at(self.record(id)?.entity_type);

        if state.is_added() {
            let record = self.record(id)?;
            let empty = entity_type
                .key_properties
                .iter()
                .filter(|k| entity_type.data_properties[**k].is_empty_value(&record.values[**k]))
                .count();
            if empty > 0 {
                if entity_type.auto_generated_key_type != AutoGeneratedKeyType::None {
                    self.assign_temp_key(mid, id)?;
                } else if empty == entity_type.key_properties.len() {
                    return Err(CacheError::MissingKey {
                        entity_type: entity_type.name.clone(),
                    });
                }
            }
        }

        let key = self.entity_key(id)?;
        if let Some(other) = self.manager(mid)?.find(&key) {
            if other != id {
                return Err(CacheError::DuplicateKey { key });
            }
        }
        tracing::debug!("[EntityGraph::attach_one] {key} as {state}");
        self.index_insert(mid, key, id)?;
        self.record_mut(id)?.aspect.track(mid, state);
        self.emit(EntityEvent::EntityChanged {
            manager: mid,
            entity: Some(id),
            action: EntityAction::Attach,
        });

        for association in entity_type.child_associations.iter().copied() {
            if let Some(key) = self.foreign_key(id, association)? {
                self.reference_insert(mid, key, (id, association))?;
            }
        }
        for association in entity_type.child_associations.iter().copied() {
            let linked = self.record(id)?.parents.get(&association).copied();
            match linked {
                Some(parent) => self.sync_foreign_key(association, id, Some(parent), false)?,
                None if !state.is_deleted() => {
                    if let Some(key) = self.foreign_key(id, association)? {
                        if let Some(parent) = self.live_entity(mid, &key)? {
                            self.relink(association, id, Some(parent), Relink::default())?;
                        }
                    }
                }
                None => {}
            }
        }
        for association in entity_type.parent_associations.iter().copied() {
            let members = self.members_of(id, association)?.as_slice().to_vec();
            for child in members {
                self.sync_foreign_key(association, child, Some(id), false)?;
            }
        }
        self.resolve_pending_children(mid, id)
    }

    /// Returns false if `id` was not attached.
    pub(crate) fn detach_one(&mut self, id: EntityId) -> Result<bool, CacheError> {
        let Some(mid) = self.record(id)?.aspect.entity_manager else {
            return Ok(false);
        };
        self.drop_links(id)?;
        let metadata = self.metadata.clone();
        let entity_type = metadata.type_at(self.record(id)?.entity_type);
        for association in entity_type.child_associations.iter().copied() {
            if let Some(key) = self.foreign_key(id, association)? {
                self.reference_remove(mid, &key, (id, association))?;
            }
        }
        let key = self.entity_key(id)?;
        if self.manager(mid)?.find(&key) == Some(id) {
            self.index_remove(mid, &key)?;
        }
        self.record_mut(id)?.aspect.untrack();
        tracing::debug!("[EntityGraph::detach_one] {key} from {mid}");
        self.emit(EntityEvent::EntityChanged {
            manager: mid,
            entity: Some(id),
            action: EntityAction::Detach,
        });
        Ok(true)
    }
}
