//! All-or-nothing mutations.
//!
//! Every public mutating operation of [EntityGraph] runs through [EntityGraph::mutate]. While a
//! journal is open, the first write to a record snapshots it and every identity-map or
//! foreign-key index edit logs its inverse. Events are buffered. If the operation fails the log is
//! replayed backwards and the events are dropped, so a failed attach or a fixup cascade that hits
//! a duplicate key leaves no trace. If it succeeds the events are published in order.

use std::collections::HashSet;

use crate::{
    cache::{manager::EntityManager, record::EntityRecord, EntityGraph},
    entitykey::EntityKey,
    error::CacheError,
    event::EntityEvent,
    properties::{EntityId, ManagerId},
};

#[derive(Debug)]
enum Undo {
    /// `None`: the record did not exist before the mutation.
    Record(EntityId, Option<Box<EntityRecord>>),
    Indexed(ManagerId, EntityKey),
    Unindexed(ManagerId, EntityKey, EntityId),
    Referenced(ManagerId, EntityKey, (EntityId, usize)),
    Unreferenced(ManagerId, EntityKey, (EntityId, usize)),
    TempKey(ManagerId, EntityKey),
    TempKeyRetired(ManagerId, EntityKey),
    Manager(Box<EntityManager>),
}

#[derive(Debug, Default)]
pub(crate) struct Journal {
    undo: Vec<Undo>,
    touched: HashSet<EntityId>,
    events: Vec<(Option<ManagerId>, EntityEvent)>,
}

impl EntityGraph {
    /// Run `op` atomically. Calls made while a journal is already open join it.
    pub(crate) fn mutate<T, F>(&mut self, op: F) -> Result<T, CacheError>
    where
        F: FnOnce(&mut EntityGraph) -> Result<T, CacheError>,
    {
        if self.journal.is_some() {
            return op(self);
        }
        self.journal = Some(Journal::default());
        let result = op(self);
        let journal = self.journal.take().unwrap_or_default();
        self.fixup_guard.clear();
        match result {
            Ok(value) => {
                if self.config.emit_events {
                    self.events.publish(journal.events);
                }
                Ok(value)
            }
            Err(e) => {
                tracing::debug!(
                    "[EntityGraph::mutate] rolling back {} journal entries: {e}",
                    journal.undo.len()
                );
                self.rollback(journal);
                Err(e)
            }
        }
    }

    fn rollback(&mut self, journal: Journal) {
        for undo in journal.undo.into_iter().rev() {
            match undo {
                Undo::Record(id, Some(record)) => {
                    self.records.insert(id, *record);
                }
                Undo::Record(id, None) => {
                    self.records.remove(&id);
                }
                Undo::Indexed(mid, key) => {
                    if let Some(manager) = self.managers.get_mut(&mid) {
                        manager.remove(&key);
                    }
                }
                Undo::Unindexed(mid, key, id) => {
                    if let Some(manager) = self.managers.get_mut(&mid) {
                        manager.insert(key, id);
                    }
                }
                Undo::Referenced(mid, key, reference) => {
                    if let Some(manager) = self.managers.get_mut(&mid) {
                        manager.remove_reference(&key, &reference);
                    }
                }
                Undo::Unreferenced(mid, key, reference) => {
                    if let Some(manager) = self.managers.get_mut(&mid) {
                        manager.add_reference(key, reference);
                    }
                }
                Undo::TempKey(mid, key) => {
                    if let Some(manager) = self.managers.get_mut(&mid) {
                        manager.key_generator_mut().forget(&key);
                    }
                }
                Undo::TempKeyRetired(mid, key) => {
                    if let Some(manager) = self.managers.get_mut(&mid) {
                        manager.key_generator_mut().remember(key);
                    }
                }
                Undo::Manager(manager) => {
                    self.managers.insert(manager.id(), *manager);
                }
            }
        }
    }

    fn log(&mut self, undo: Undo) {
        if let Some(journal) = self.journal.as_mut() {
            journal.undo.push(undo);
        }
    }

    /// Mutable access to a record, snapshotting it on its first write in this journal.
    pub(crate) fn record_mut(&mut self, id: EntityId) -> Result<&mut EntityRecord, CacheError> {
        let Some(record) = self.records.get(&id) else {
            return Err(CacheError::UnknownEntity(id));
        };
        if let Some(journal) = self.journal.as_mut() {
            if journal.touched.insert(id) {
                journal
                    .undo
                    .push(Undo::Record(id, Some(Box::new(record.clone()))));
            }
        }
        self.records
            .get_mut(&id)
            .ok_or(CacheError::UnknownEntity(id))
    }

    pub(crate) fn insert_record(&mut self, record: EntityRecord) {
        let id = record.id;
        if let Some(journal) = self.journal.as_mut() {
            journal.touched.insert(id);
            journal.undo.push(Undo::Record(id, None));
        }
        self.records.insert(id, record);
    }

    pub(crate) fn manager_mut(&mut self, mid: ManagerId) -> Result<&mut EntityManager, CacheError> {
        self.managers
            .get_mut(&mid)
            .ok_or(CacheError::UnknownManager(mid))
    }

    pub(crate) fn index_insert(
        &mut self,
        mid: ManagerId,
        key: EntityKey,
        id: EntityId,
    ) -> Result<(), CacheError> {
        let previous = self.manager_mut(mid)?.insert(key.clone(), id);
        match previous {
            Some(prev) => self.log(Undo::Unindexed(mid, key, prev)),
            None => self.log(Undo::Indexed(mid, key)),
        }
        Ok(())
    }

    pub(crate) fn index_remove(&mut self, mid: ManagerId, key: &EntityKey) -> Result<(), CacheError> {
        if let Some(prev) = self.manager_mut(mid)?.remove(key) {
            self.log(Undo::Unindexed(mid, key.clone(), prev));
        }
        Ok(())
    }

    pub(crate) fn reference_insert(
        &mut self,
        mid: ManagerId,
        key: EntityKey,
        reference: (EntityId, usize),
    ) -> Result<(), CacheError> {
        if self.manager_mut(mid)?.add_reference(key.clone(), reference) {
            self.log(Undo::Referenced(mid, key, reference));
        }
        Ok(())
    }

    pub(crate) fn reference_remove(
        &mut self,
        mid: ManagerId,
        key: &EntityKey,
        reference: (EntityId, usize),
    ) -> Result<(), CacheError> {
        if self.manager_mut(mid)?.remove_reference(key, &reference) {
            self.log(Undo::Unreferenced(mid, key.clone(), reference));
        }
        Ok(())
    }

    pub(crate) fn log_temp_key(&mut self, mid: ManagerId, key: EntityKey) {
        self.log(Undo::TempKey(mid, key));
    }

    /// Drop `key` from the cache's temp keys once it no longer stands in for a real key.
    pub(crate) fn retire_temp_key(&mut self, mid: ManagerId, key: &EntityKey) -> Result<(), CacheError> {
        if self.manager_mut(mid)?.key_generator_mut().forget(key) {
            self.log(Undo::TempKeyRetired(mid, key.clone()));
        }
        Ok(())
    }

    /// Snapshot a whole cache ahead of a bulk edit.
    pub(crate) fn snapshot_manager(&mut self, mid: ManagerId) -> Result<(), CacheError> {
        let snapshot = self
            .managers
            .get(&mid)
            .cloned()
            .ok_or(CacheError::UnknownManager(mid))?;
        self.log(Undo::Manager(Box::new(snapshot)));
        Ok(())
    }

    /// Buffer an event until the open mutation completes. The event is tagged with the cache its
    /// subject belongs to right now.
    pub(crate) fn emit(&mut self, event: EntityEvent) {
        let manager = match &event {
            EntityEvent::EntityChanged { manager, .. } => Some(*manager),
            other => other
                .entity()
                .and_then(|id| self.records.get(&id))
                .and_then(|record| record.aspect.entity_manager),
        };
        match self.journal.as_mut() {
            Some(journal) => journal.events.push((manager, event)),
            None => {
                if self.config.emit_events {
                    self.events.publish(vec![(manager, event)]);
                }
            }
        }
    }
}
