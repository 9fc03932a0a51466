use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    aspect::EntityAspect,
    cache::{
        fixup::Relink, journal::Journal, manager::EntityManager, navset::NavigationSet,
        record::EntityRecord,
    },
    config::CacheConfig,
    entitykey::EntityKey,
    error::CacheError,
    event::{CollectionChange, EntityAction, EntityEvent, EventBus, EventFilter},
    metadata::{EntityType, MetadataStore, PropertyRef},
    properties::{DataValue, EntityId, ManagerId, PropertyValue},
    state::{EntityState, EntityStateSet},
};

/// Runs once on every newly created entity of one type, before it can be attached. Writes it
/// makes are not tracked as changes.
pub type EntityInitializer =
    Arc<dyn Fn(&mut EntityGraph, EntityId) -> Result<(), CacheError> + Send + Sync>;

/// The arena that owns every entity record, attached or free-standing, and every cache
/// ([EntityManager]) those records can be attached to.
///
/// Entities are addressed by [EntityId]. Navigation links are stored as ids on both ends, and
/// every mutation that changes one end of a relationship (a foreign key, a scalar navigation, a
/// navigation set) brings the other views of that relationship back into agreement before it
/// returns. Mutations are atomic: an `Err` leaves the graph exactly as it was and publishes no
/// events.
pub struct EntityGraph {
    pub(crate) metadata: Arc<MetadataStore>,
    pub(crate) config: CacheConfig,
    pub(crate) records: BTreeMap<EntityId, EntityRecord>,
    pub(crate) managers: BTreeMap<ManagerId, EntityManager>,
    pub(crate) events: EventBus,
    pub(crate) journal: Option<Journal>,
    /// `(child, association)` edges whose foreign key is being written by the fixup engine
    /// itself; FK-to-navigation fixup is skipped for them.
    pub(crate) fixup_guard: BTreeSet<(EntityId, usize)>,
    initializers: BTreeMap<usize, EntityInitializer>,
}

impl fmt::Debug for EntityGraph {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EntityGraph")
            .field("config", &self.config)
            .field("records", &self.records.len())
            .field("managers", &self.managers.keys().collect::<Vec<_>>())
            .field("subscribers", &self.events.subscriber_count())
            .field("initializers", &self.initializers.len())
            .finish_non_exhaustive()
    }
}

impl EntityGraph {
    pub fn new(metadata: Arc<MetadataStore>) -> Self {
        EntityGraph::with_config(metadata, CacheConfig::default())
    }

    pub fn with_config(metadata: Arc<MetadataStore>, config: CacheConfig) -> Self {
        EntityGraph {
            metadata,
            config,
            records: BTreeMap::new(),
            managers: BTreeMap::new(),
            events: EventBus::default(),
            journal: None,
            fixup_guard: BTreeSet::new(),
            initializers: BTreeMap::new(),
        }
    }

    pub fn metadata(&self) -> &Arc<MetadataStore> {
        &self.metadata
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Create an empty cache.
    pub fn new_manager(&mut self) -> ManagerId {
        let manager = EntityManager::new(&self.config.temp_string_prefix);
        let id = manager.id();
        tracing::debug!("[EntityGraph::new_manager] {id}");
        self.managers.insert(id, manager);
        id
    }

    pub fn managers(&self) -> impl Iterator<Item = ManagerId> + '_ {
        self.managers.keys().copied()
    }

    pub fn manager(&self, mid: ManagerId) -> Result<&EntityManager, CacheError> {
        self.managers
            .get(&mid)
            .ok_or(CacheError::UnknownManager(mid))
    }

    pub fn subscribe(&mut self, filter: EventFilter) -> UnboundedReceiver<EntityEvent> {
        self.events.subscribe(filter)
    }

    /// Install the construction hook for `entity_type`, replacing any previous one.
    pub fn register_initializer<F>(&mut self, entity_type: &str, init: F) -> Result<(), CacheError>
    where
        F: Fn(&mut EntityGraph, EntityId) -> Result<(), CacheError> + Send + Sync + 'static,
    {
        let type_idx = self.metadata.type_index(entity_type)?;
        self.initializers.insert(type_idx, Arc::new(init));
        Ok(())
    }

    // ----------------------------------------------------------------------------------------
    // Entities
    // ----------------------------------------------------------------------------------------

    /// Create a free-standing (Detached) entity. Properties not named in `values` start at their
    /// default value.
    pub fn create_entity(
        &mut self,
        entity_type: &str,
        values: Vec<(&str, DataValue)>,
    ) -> Result<EntityId, CacheError> {
        let record = self.build_record(entity_type, values)?;
        self.mutate(|g| {
            let id = record.id;
            g.insert_record(record);
            g.initialize(id)?;
            Ok(id)
        })
    }

    /// Create an entity and attach it to `mid` in `state`. `EntityState::Detached` only creates
    /// it.
    pub fn create_attached(
        &mut self,
        mid: ManagerId,
        entity_type: &str,
        values: Vec<(&str, DataValue)>,
        state: EntityState,
    ) -> Result<EntityId, CacheError> {
        self.manager(mid)?;
        let record = self.build_record(entity_type, values)?;
        self.mutate(|g| {
            let id = record.id;
            g.insert_record(record);
            g.initialize(id)?;
            if !state.is_detached() {
                g.attach_graph(mid, id, state)?;
            }
            Ok(id)
        })
    }

    /// Attach `id`, and every detached entity reachable from it through navigation links, to
    /// `mid` in `state`.
    ///
    /// Attaching an entity the cache already tracks is a no-op. Fails with `CrossCacheAttach`
    /// when any entity of the neighbourhood belongs to another cache, `DuplicateKey` when a key
    /// is already taken, and `MissingKey` when an entity added without auto-generated keys has
    /// no key at all. On failure nothing is attached.
    #[tracing::instrument(skip(self))]
    pub fn attach_entity(
        &mut self,
        mid: ManagerId,
        id: EntityId,
        state: EntityState,
    ) -> Result<(), CacheError> {
        self.mutate(|g| g.attach_graph(mid, id, state))
    }

    pub fn add_entity(&mut self, mid: ManagerId, id: EntityId) -> Result<(), CacheError> {
        self.attach_entity(mid, id, EntityState::Added)
    }

    /// Returns false if the entity was not attached.
    #[tracing::instrument(skip(self))]
    pub fn detach_entity(&mut self, id: EntityId) -> Result<bool, CacheError> {
        self.mutate(|g| g.detach_one(id))
    }

    /// Detach every entity of `mid` at once. Links between them are dropped, their data is
    /// left alone, and a single `Clear` event replaces the per-entity events.
    #[tracing::instrument(skip(self))]
    pub fn clear(&mut self, mid: ManagerId) -> Result<(), CacheError> {
        self.mutate(|g| {
            g.snapshot_manager(mid)?;
            let members: Vec<EntityId> = g.manager(mid)?.entities().map(|(_, id)| id).collect();
            for id in members.iter() {
                let record = g.record_mut(*id)?;
                record.parents.clear();
                for set in record.children.values_mut() {
                    set.clear();
                }
                record.aspect.untrack();
            }
            g.manager_mut(mid)?.reset();
            tracing::debug!("[EntityGraph::clear] detached {} entities", members.len());
            g.emit(EntityEvent::EntityChanged {
                manager: mid,
                entity: None,
                action: EntityAction::Clear,
            });
            Ok(())
        })
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn entity_type(&self, id: EntityId) -> Result<&EntityType, CacheError> {
        let record = self.record(id)?;
        Ok(self.metadata.type_at(record.entity_type))
    }

    // ----------------------------------------------------------------------------------------
    // Lookup
    // ----------------------------------------------------------------------------------------

    pub fn entity_key(&self, id: EntityId) -> Result<EntityKey, CacheError> {
        let record = self.record(id)?;
        Ok(record.key(self.metadata.type_at(record.entity_type)))
    }

    pub fn find_entity_by_key(&self, mid: ManagerId, key: &EntityKey) -> Option<EntityId> {
        self.managers.get(&mid).and_then(|m| m.find(key))
    }

    pub fn get_entity_by_key(
        &self,
        mid: ManagerId,
        entity_type: &str,
        values: Vec<DataValue>,
    ) -> Result<Option<EntityId>, CacheError> {
        let manager = self.manager(mid)?;
        let key_len = self.metadata.entity_type(entity_type)?.key_properties.len();
        if values.len() != key_len {
            return Err(CacheError::invalid_value(
                entity_type,
                "key",
                format!("expected {key_len} key values, got {}", values.len()),
            ));
        }
        Ok(manager.find(&EntityKey::new(entity_type, values)))
    }

    /// Entities of `mid` whose state is in `states`, restricted to `entity_types` unless it is
    /// empty. Sorted by id.
    pub fn get_entities(
        &self,
        mid: ManagerId,
        entity_types: &[&str],
        states: EntityStateSet,
    ) -> Result<Vec<EntityId>, CacheError> {
        let manager = self.manager(mid)?;
        let types = entity_types
            .iter()
            .map(|name| self.metadata.type_index(name))
            .collect::<Result<BTreeSet<usize>, CacheError>>()?;
        let mut found = vec![];
        for (_, id) in manager.entities() {
            let record = self.record(id)?;
            if (types.is_empty() || types.contains(&record.entity_type))
                && states.contains(record.aspect.entity_state)
            {
                found.push(id);
            }
        }
        found.sort();
        Ok(found)
    }

    pub fn get_changes(&self, mid: ManagerId) -> Result<Vec<EntityId>, CacheError> {
        self.get_entities(mid, &[], EntityState::changed())
    }

    pub fn has_changes(&self, mid: ManagerId) -> Result<bool, CacheError> {
        Ok(!self.get_changes(mid)?.is_empty())
    }

    // ----------------------------------------------------------------------------------------
    // Properties
    // ----------------------------------------------------------------------------------------

    pub fn get_property(&self, id: EntityId, name: &str) -> Result<PropertyValue, CacheError> {
        let record = self.record(id)?;
        let entity_type = self.metadata.type_at(record.entity_type);
        match entity_type.resolve(name)? {
            PropertyRef::Data(idx) => Ok(PropertyValue::Data(record.values[idx].clone())),
            PropertyRef::Navigation(idx) => {
                let navigation = &entity_type.navigation_properties[idx];
                if navigation.is_scalar {
                    Ok(PropertyValue::Entity(
                        record.parents.get(&navigation.association).copied(),
                    ))
                } else {
                    Ok(PropertyValue::Collection(
                        self.collection(id, name)?.as_slice().to_vec(),
                    ))
                }
            }
        }
    }

    /// Generic write. Collection navigation properties cannot be assigned.
    pub fn set_property(
        &mut self,
        id: EntityId,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), CacheError> {
        let metadata = self.metadata.clone();
        let entity_type = metadata.type_at(self.record(id)?.entity_type);
        match (entity_type.resolve(name)?, value) {
            (PropertyRef::Data(_), PropertyValue::Data(value)) => self.set_value(id, name, value),
            (PropertyRef::Navigation(idx), value) => {
                if !entity_type.navigation_properties[idx].is_scalar {
                    return Err(CacheError::IllegalNavigationAssignment {
                        entity_type: entity_type.name.clone(),
                        property: name.to_string(),
                    });
                }
                match value {
                    PropertyValue::Entity(target) => self.set_reference(id, name, target),
                    other => Err(CacheError::invalid_value(
                        &entity_type.name,
                        name,
                        format!("expected an entity reference, got {other}"),
                    )),
                }
            }
            (PropertyRef::Data(_), other) => Err(CacheError::invalid_value(
                &entity_type.name,
                name,
                format!("expected a data value, got {other}"),
            )),
        }
    }

    pub fn get_value(&self, id: EntityId, name: &str) -> Result<DataValue, CacheError> {
        let idx = self.data_index(id, name)?;
        Ok(self.record(id)?.values[idx].clone())
    }

    /// Write a data property. Foreign keys re-resolve their navigation, key properties re-index
    /// the entity and re-point its children.
    pub fn set_value(
        &mut self,
        id: EntityId,
        name: &str,
        value: impl Into<DataValue>,
    ) -> Result<(), CacheError> {
        let idx = self.data_index(id, name)?;
        let value = value.into();
        self.mutate(|g| g.write_data(id, idx, value, true).map(|_| ()))
    }

    pub fn get_reference(&self, id: EntityId, name: &str) -> Result<Option<EntityId>, CacheError> {
        let association = self.scalar_association(id, name)?;
        Ok(self.record(id)?.parents.get(&association).copied())
    }

    /// Point a scalar navigation at `target` (or clear it). The foreign key follows; the
    /// previous and new parent sets are updated. An untracked side is first attached to the
    /// other side's cache as Added.
    pub fn set_reference(
        &mut self,
        id: EntityId,
        name: &str,
        target: Option<EntityId>,
    ) -> Result<(), CacheError> {
        let association = self.scalar_association(id, name)?;
        if let Some(parent) = target {
            self.check_member_type(parent, association, true)?;
        }
        self.mutate(|g| {
            if let Some(parent) = target {
                g.reconcile(id, parent)?;
            }
            g.relink(association, id, target, Relink::user())
        })
    }

    // ----------------------------------------------------------------------------------------
    // Navigation sets
    // ----------------------------------------------------------------------------------------

    pub fn collection(&self, id: EntityId, name: &str) -> Result<&NavigationSet, CacheError> {
        let association = self.collection_association(id, name)?;
        self.members_of(id, association)
    }

    /// Append `child`. Returns false, and changes nothing, if it is already a member.
    pub fn push(&mut self, owner: EntityId, name: &str, child: EntityId) -> Result<bool, CacheError> {
        let len = self.collection(owner, name)?.len();
        self.insert(owner, name, len, child)
    }

    pub fn insert(
        &mut self,
        owner: EntityId,
        name: &str,
        index: usize,
        child: EntityId,
    ) -> Result<bool, CacheError> {
        let association = self.collection_association(owner, name)?;
        let set = self.members_of(owner, association)?;
        if index > set.len() {
            return Err(CacheError::IndexOutOfRange {
                property: name.to_string(),
                index,
                len: set.len(),
            });
        }
        if set.contains(&child) {
            return Ok(false);
        }
        self.check_member_type(child, association, false)?;
        self.mutate(|g| {
            g.adopt(owner, association, child, index)?;
            g.emit_collection(owner, association, vec![child], vec![])?;
            Ok(true)
        })
    }

    /// Returns false if `child` is not a member.
    pub fn remove(&mut self, owner: EntityId, name: &str, child: EntityId) -> Result<bool, CacheError> {
        let association = self.collection_association(owner, name)?;
        if !self.members_of(owner, association)?.contains(&child) {
            return Ok(false);
        }
        self.mutate(|g| {
            g.release(owner, association, child)?;
            g.emit_collection(owner, association, vec![], vec![child])?;
            Ok(true)
        })
    }

    pub fn remove_at(&mut self, owner: EntityId, name: &str, index: usize) -> Result<EntityId, CacheError> {
        let set = self.collection(owner, name)?;
        let child = set.get(index).ok_or_else(|| CacheError::IndexOutOfRange {
            property: name.to_string(),
            index,
            len: set.len(),
        })?;
        self.remove(owner, name, child)?;
        Ok(child)
    }

    /// Remove up to `delete_count` members starting at `start`, then insert `items` there.
    /// Items that are already members are skipped. Returns the removed members; one
    /// collection event reports both lists.
    pub fn splice(
        &mut self,
        owner: EntityId,
        name: &str,
        start: usize,
        delete_count: usize,
        items: Vec<EntityId>,
    ) -> Result<Vec<EntityId>, CacheError> {
        let association = self.collection_association(owner, name)?;
        let set = self.members_of(owner, association)?;
        if start > set.len() {
            return Err(CacheError::IndexOutOfRange {
                property: name.to_string(),
                index: start,
                len: set.len(),
            });
        }
        let end = start.saturating_add(delete_count).min(set.len());
        let removed = set.as_slice()[start..end].to_vec();
        for item in items.iter() {
            self.check_member_type(*item, association, false)?;
        }
        self.mutate(|g| {
            for child in removed.iter() {
                g.release(owner, association, *child)?;
            }
            let mut added = vec![];
            let mut position = start;
            for item in items {
                if g.members_of(owner, association)?.contains(&item) {
                    continue;
                }
                g.adopt(owner, association, item, position)?;
                position += 1;
                added.push(item);
            }
            if !added.is_empty() || !removed.is_empty() {
                g.emit_collection(owner, association, added, removed.clone())?;
            }
            Ok(removed)
        })
    }

    // ----------------------------------------------------------------------------------------
    // Aspect and state
    // ----------------------------------------------------------------------------------------

    pub fn aspect(&self, id: EntityId) -> Result<&EntityAspect, CacheError> {
        Ok(&self.record(id)?.aspect)
    }

    pub fn entity_state(&self, id: EntityId) -> Result<EntityState, CacheError> {
        Ok(self.record(id)?.aspect.entity_state)
    }

    /// Mark for deletion. A never-persisted (Added) entity is detached instead. A Deleted
    /// entity stays in the identity map and keeps its foreign keys, but its links are dropped.
    pub fn set_deleted(&mut self, id: EntityId) -> Result<(), CacheError> {
        self.mutate(|g| {
            let aspect = &g.record(id)?.aspect;
            let state = aspect.entity_state;
            state.require_attached(id, "setDeleted")?;
            let Some(mid) = aspect.entity_manager else {
                return Err(CacheError::detached(id, "setDeleted"));
            };
            match state {
                EntityState::Added => g.detach_one(id).map(|_| ()),
                EntityState::Deleted => Ok(()),
                _ => {
                    g.drop_links(id)?;
                    g.set_state(mid, id, EntityState::Deleted)
                }
            }
        })
    }

    pub fn set_modified(&mut self, id: EntityId) -> Result<(), CacheError> {
        self.mutate(|g| {
            let aspect = &g.record(id)?.aspect;
            let state = aspect.entity_state;
            state.require_attached(id, "setModified")?;
            let Some(mid) = aspect.entity_manager else {
                return Err(CacheError::detached(id, "setModified"));
            };
            let was_deleted = state.is_deleted();
            g.set_state(mid, id, EntityState::Modified)?;
            if was_deleted {
                g.relink_by_foreign_keys(mid, id)?;
            }
            Ok(())
        })
    }

    /// Mark as matching the store: original values and the temp key flag are cleared. A
    /// Deleted entity is re-linked through its foreign keys.
    pub fn set_unchanged(&mut self, id: EntityId) -> Result<(), CacheError> {
        self.mutate(|g| {
            let aspect = &g.record(id)?.aspect;
            let state = aspect.entity_state;
            state.require_attached(id, "setUnchanged")?;
            let Some(mid) = aspect.entity_manager else {
                return Err(CacheError::detached(id, "setUnchanged"));
            };
            let was_deleted = state.is_deleted();
            g.settle(id)?;
            g.set_state(mid, id, EntityState::Unchanged)?;
            if was_deleted {
                g.relink_by_foreign_keys(mid, id)?;
            }
            Ok(())
        })
    }

    pub fn set_detached(&mut self, id: EntityId) -> Result<(), CacheError> {
        self.detach_entity(id).map(|_| ())
    }

    /// The pending change was persisted: Added and Modified become Unchanged, Deleted leaves the
    /// cache.
    pub fn accept_changes(&mut self, id: EntityId) -> Result<(), CacheError> {
        self.mutate(|g| g.accept_one(id))
    }

    /// Undo pending changes: an Added entity leaves the cache, a Modified or Deleted one gets
    /// its original values back and becomes Unchanged.
    pub fn reject_changes(&mut self, id: EntityId) -> Result<(), CacheError> {
        self.mutate(|g| g.reject_one(id))
    }

    pub fn accept_all_changes(&mut self, mid: ManagerId) -> Result<(), CacheError> {
        let changes = self.get_changes(mid)?;
        tracing::debug!("[EntityGraph::accept_all_changes] {} entities", changes.len());
        self.mutate(|g| changes.into_iter().try_for_each(|id| g.accept_one(id)))
    }

    pub fn reject_all_changes(&mut self, mid: ManagerId) -> Result<(), CacheError> {
        let changes = self.get_changes(mid)?;
        tracing::debug!("[EntityGraph::reject_all_changes] {} entities", changes.len());
        self.mutate(|g| changes.into_iter().try_for_each(|id| g.reject_one(id)))
    }

    /// Give `id` a placeholder value for its single key property, unique across the process,
    /// and flag it as a temp key. Composite keys are refused before anything is written.
    pub fn generate_temp_key_value(
        &mut self,
        mid: ManagerId,
        id: EntityId,
    ) -> Result<DataValue, CacheError> {
        self.manager(mid)?;
        self.mutate(|g| g.assign_temp_key(mid, id))
    }

    // ----------------------------------------------------------------------------------------
    // Diagnostics
    // ----------------------------------------------------------------------------------------

    /// Check every structural invariant and describe each violation.
    pub fn built_in_test(&self) -> Vec<String> {
        let mut errors = vec![];
        for (id, record) in self.records.iter() {
            let aspect = &record.aspect;
            if aspect.entity_state.is_detached() != aspect.entity_manager.is_none() {
                errors.push(format!(
                    "[EntityGraph::built_in_test] {id} is {} but manager is {:?}",
                    aspect.entity_state, aspect.entity_manager
                ));
            }
            if let Some(mid) = aspect.entity_manager {
                let key = record.key(self.metadata.type_at(record.entity_type));
                if self.find_entity_by_key(mid, &key) != Some(*id) {
                    errors.push(format!(
                        "[EntityGraph::built_in_test] {id} is not indexed under its key {key}"
                    ));
                }
            }
            for (association, parent) in record.parents.iter() {
                let Some(parent_record) = self.records.get(parent) else {
                    errors.push(format!(
                        "[EntityGraph::built_in_test] {id} links to unknown parent {parent}"
                    ));
                    continue;
                };
                if parent_record.aspect.entity_manager != aspect.entity_manager {
                    errors.push(format!(
                        "[EntityGraph::built_in_test] {id} and its parent {parent} are in different caches"
                    ));
                }
                if !parent_record
                    .children
                    .get(association)
                    .is_some_and(|set| set.contains(id))
                {
                    errors.push(format!(
                        "[EntityGraph::built_in_test] {parent} does not list its child {id}"
                    ));
                }
                if aspect.entity_manager.is_some() {
                    let fk = self.foreign_key(*id, *association).ok().flatten();
                    let parent_key =
                        parent_record.key(self.metadata.type_at(parent_record.entity_type));
                    if fk.as_ref().is_some_and(|fk| *fk != parent_key) {
                        errors.push(format!(
                            "[EntityGraph::built_in_test] {id} links to {parent_key} but its foreign key names {fk:?}"
                        ));
                    }
                }
            }
            for (association, set) in record.children.iter() {
                for child in set.iter() {
                    if self
                        .records
                        .get(&child)
                        .and_then(|c| c.parents.get(association))
                        != Some(id)
                    {
                        errors.push(format!(
                            "[EntityGraph::built_in_test] {id}.{} lists {child} which does not link back",
                            set.name()
                        ));
                    }
                }
            }
        }
        for (mid, manager) in self.managers.iter() {
            for (key, id) in manager.entities() {
                if self.records.get(&id).and_then(|r| r.aspect.entity_manager) != Some(*mid) {
                    errors.push(format!(
                        "[EntityGraph::built_in_test] {mid} indexes {key} -> {id} which it does not own"
                    ));
                }
            }
        }
        errors
    }

    // ----------------------------------------------------------------------------------------
    // Internal helpers
    // ----------------------------------------------------------------------------------------

    pub(crate) fn record(&self, id: EntityId) -> Result<&EntityRecord, CacheError> {
        self.records.get(&id).ok_or(CacheError::UnknownEntity(id))
    }

    fn initialize(&mut self, id: EntityId) -> Result<(), CacheError> {
        let type_idx = self.record(id)?.entity_type;
        if let Some(init) = self.initializers.get(&type_idx).cloned() {
            init(self, id)?;
        }
        Ok(())
    }

    fn build_record(
        &self,
        entity_type: &str,
        values: Vec<(&str, DataValue)>,
    ) -> Result<EntityRecord, CacheError> {
        let type_idx = self.metadata.type_index(entity_type)?;
        let entity_type = self.metadata.type_at(type_idx);
        let mut initial = entity_type.initial_values();
        for (name, value) in values {
            let idx = match entity_type.resolve(name)? {
                PropertyRef::Data(idx) => idx,
                PropertyRef::Navigation(_) => {
                    return Err(CacheError::invalid_value(
                        &entity_type.name,
                        name,
                        "navigation properties cannot be initialized with data",
                    ))
                }
            };
            let property = &entity_type.data_properties[idx];
            if !property.data_type.accepts(&value) || (value.is_null() && !property.is_nullable) {
                return Err(CacheError::invalid_value(
                    &entity_type.name,
                    name,
                    format!("{value} is not a valid {}", property.data_type),
                ));
            }
            initial[idx] = value;
        }
        let id = EntityId::next();
        let children = entity_type
            .parent_associations
            .iter()
            .map(|a| {
                let association = self.metadata.association(*a);
                let name = association
                    .parent_navigation
                    .as_deref()
                    .unwrap_or(&association.name);
                (*a, NavigationSet::new(id, *a, name))
            })
            .collect();
        Ok(EntityRecord {
            id,
            entity_type: type_idx,
            values: initial,
            parents: BTreeMap::new(),
            children,
            aspect: EntityAspect::default(),
        })
    }

    fn data_index(&self, id: EntityId, name: &str) -> Result<usize, CacheError> {
        let entity_type = self.entity_type(id)?;
        match entity_type.resolve(name)? {
            PropertyRef::Data(idx) => Ok(idx),
            PropertyRef::Navigation(_) => Err(CacheError::invalid_value(
                &entity_type.name,
                name,
                "is a navigation property",
            )),
        }
    }

    fn scalar_association(&self, id: EntityId, name: &str) -> Result<usize, CacheError> {
        let entity_type = self.entity_type(id)?;
        match entity_type.resolve(name)? {
            PropertyRef::Navigation(idx) if entity_type.navigation_properties[idx].is_scalar => {
                Ok(entity_type.navigation_properties[idx].association)
            }
            PropertyRef::Navigation(_) => Err(CacheError::IllegalNavigationAssignment {
                entity_type: entity_type.name.clone(),
                property: name.to_string(),
            }),
            PropertyRef::Data(_) => Err(CacheError::invalid_value(
                &entity_type.name,
                name,
                "is not a navigation property",
            )),
        }
    }

    fn collection_association(&self, id: EntityId, name: &str) -> Result<usize, CacheError> {
        let entity_type = self.entity_type(id)?;
        match entity_type.resolve(name)? {
            PropertyRef::Navigation(idx) if !entity_type.navigation_properties[idx].is_scalar => {
                Ok(entity_type.navigation_properties[idx].association)
            }
            _ => Err(CacheError::invalid_value(
                &entity_type.name,
                name,
                "is not a collection navigation property",
            )),
        }
    }

    pub(crate) fn members_of(
        &self,
        owner: EntityId,
        association: usize,
    ) -> Result<&NavigationSet, CacheError> {
        let record = self.record(owner)?;
        record.children.get(&association).ok_or_else(|| {
            CacheError::Metadata(format!(
                "{owner} has no navigation set for association '{}'",
                self.metadata.association(association).name
            ))
        })
    }

    /// `id` must be of the association's parent type (`as_parent`) or child type.
    fn check_member_type(
        &self,
        id: EntityId,
        association: usize,
        as_parent: bool,
    ) -> Result<(), CacheError> {
        let association = self.metadata.association(association);
        let expected = if as_parent {
            association.resolved.parent_type
        } else {
            association.resolved.child_type
        };
        let record = self.record(id)?;
        if record.entity_type != expected {
            let found = &self.metadata.type_at(record.entity_type).name;
            return Err(CacheError::invalid_value(
                &association.name,
                if as_parent {
                    &association.parent_type
                } else {
                    &association.child_type
                },
                format!("{id} is a '{found}'"),
            ));
        }
        Ok(())
    }

    pub(crate) fn emit_collection(
        &mut self,
        owner: EntityId,
        association: usize,
        added: Vec<EntityId>,
        removed: Vec<EntityId>,
    ) -> Result<(), CacheError> {
        let navigation = self.members_of(owner, association)?.name().to_string();
        self.emit(EntityEvent::CollectionChanged(CollectionChange {
            owner,
            navigation,
            added,
            removed,
        }));
        Ok(())
    }

    pub(crate) fn set_state(
        &mut self,
        mid: ManagerId,
        id: EntityId,
        state: EntityState,
    ) -> Result<(), CacheError> {
        let aspect = &mut self.record_mut(id)?.aspect;
        if aspect.entity_state == state {
            return Ok(());
        }
        aspect.entity_state = state;
        self.emit(EntityEvent::EntityChanged {
            manager: mid,
            entity: Some(id),
            action: EntityAction::EntityStateChange,
        });
        Ok(())
    }

    /// Forget original values and the temp key.
    fn settle(&mut self, id: EntityId) -> Result<(), CacheError> {
        let aspect = &self.record(id)?.aspect;
        if let (true, Some(mid)) = (aspect.has_temp_key, aspect.entity_manager) {
            let key = self.entity_key(id)?;
            self.retire_temp_key(mid, &key)?;
        }
        let aspect = &mut self.record_mut(id)?.aspect;
        aspect.original_values.clear();
        aspect.has_temp_key = false;
        Ok(())
    }

    fn accept_one(&mut self, id: EntityId) -> Result<(), CacheError> {
        let aspect = &self.record(id)?.aspect;
        let state = aspect.entity_state;
        let Some(mid) = aspect.entity_manager else {
            return Err(CacheError::detached(id, "acceptChanges"));
        };
        match state {
            EntityState::Unchanged | EntityState::Detached => return Ok(()),
            EntityState::Added | EntityState::Modified => {
                self.settle(id)?;
                self.set_state(mid, id, EntityState::Unchanged)?;
            }
            EntityState::Deleted => {
                self.settle(id)?;
                self.detach_one(id)?;
            }
        }
        self.emit(EntityEvent::EntityChanged {
            manager: mid,
            entity: Some(id),
            action: EntityAction::AcceptChanges,
        });
        Ok(())
    }

    fn reject_one(&mut self, id: EntityId) -> Result<(), CacheError> {
        let aspect = &self.record(id)?.aspect;
        let state = aspect.entity_state;
        let manager = aspect.entity_manager;
        match state {
            EntityState::Unchanged => return Ok(()),
            EntityState::Added => {
                self.detach_one(id)?;
            }
            EntityState::Modified | EntityState::Deleted | EntityState::Detached => {
                self.restore_originals(id)?;
                if let Some(mid) = manager {
                    self.settle(id)?;
                    self.set_state(mid, id, EntityState::Unchanged)?;
                    self.relink_by_foreign_keys(mid, id)?;
                }
            }
        }
        if let Some(mid) = manager {
            self.emit(EntityEvent::EntityChanged {
                manager: mid,
                entity: Some(id),
                action: EntityAction::RejectChanges,
            });
        }
        Ok(())
    }

    fn restore_originals(&mut self, id: EntityId) -> Result<(), CacheError> {
        let metadata = self.metadata.clone();
        let record = self.record(id)?;
        let entity_type = metadata.type_at(record.entity_type);
        let originals: Vec<(usize, DataValue)> = record
            .aspect
            .original_values
            .iter()
            .filter_map(|(name, value)| match entity_type.property(name) {
                Some(PropertyRef::Data(idx)) => Some((idx, value.clone())),
                _ => None,
            })
            .collect();
        for (idx, value) in originals {
            self.write_data(id, idx, value, false)?;
        }
        self.record_mut(id)?.aspect.original_values.clear();
        Ok(())
    }
}
