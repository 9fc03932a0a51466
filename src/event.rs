use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::properties::{DataValue, EntityId, ManagerId, PropertyValue};

/// A data or scalar navigation property changed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyChange {
    pub entity: EntityId,
    pub property: String,
    pub old_value: PropertyValue,
    pub new_value: PropertyValue,
}

/// One mutation of one navigation set. Both lists may be non-empty (splice).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionChange {
    pub owner: EntityId,
    pub navigation: String,
    pub added: Vec<EntityId>,
    pub removed: Vec<EntityId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityAction {
    Attach,
    Detach,
    EntityStateChange,
    AcceptChanges,
    RejectChanges,
    /// A whole cache was cleared; carries no entity.
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityEvent {
    PropertyChanged(PropertyChange),
    CollectionChanged(CollectionChange),
    EntityChanged {
        manager: ManagerId,
        entity: Option<EntityId>,
        action: EntityAction,
    },
}

impl EntityEvent {
    pub(crate) fn property(
        entity: EntityId,
        property: &str,
        old_value: impl Into<PropertyValue>,
        new_value: impl Into<PropertyValue>,
    ) -> Self {
        EntityEvent::PropertyChanged(PropertyChange {
            entity,
            property: property.to_string(),
            old_value: old_value.into(),
            new_value: new_value.into(),
        })
    }

    pub(crate) fn data(entity: EntityId, property: &str, old: DataValue, new: DataValue) -> Self {
        EntityEvent::property(entity, property, old, new)
    }

    /// The entity the event is about. For collection events this is the set's owner.
    pub fn entity(&self) -> Option<EntityId> {
        match self {
            EntityEvent::PropertyChanged(change) => Some(change.entity),
            EntityEvent::CollectionChanged(change) => Some(change.owner),
            EntityEvent::EntityChanged { entity, .. } => *entity,
        }
    }
}

impl Display for EntityEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            EntityEvent::PropertyChanged(c) => write!(
                f,
                "PropertyChanged({}.{}: {} -> {})",
                c.entity, c.property, c.old_value, c.new_value
            ),
            EntityEvent::CollectionChanged(c) => write!(
                f,
                "CollectionChanged({}.{}: +{} -{})",
                c.owner,
                c.navigation,
                c.added.len(),
                c.removed.len()
            ),
            EntityEvent::EntityChanged {
                manager,
                entity,
                action,
            } => match entity {
                Some(id) => write!(f, "EntityChanged({manager}, {id}, {action:?})"),
                None => write!(f, "EntityChanged({manager}, {action:?})"),
            },
        }
    }
}

/// Selects which events a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventFilter {
    All,
    /// Property events of the entity, events of its collections and its lifecycle events.
    Entity(EntityId),
    Collection { owner: EntityId, navigation: String },
    /// Everything raised while the subject was tracked by this cache.
    Manager(ManagerId),
}

impl EventFilter {
    fn matches(&self, manager: Option<ManagerId>, event: &EntityEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Entity(id) => event.entity() == Some(*id),
            EventFilter::Collection { owner, navigation } => matches!(
                event,
                EntityEvent::CollectionChanged(c) if c.owner == *owner && &c.navigation == navigation
            ),
            EventFilter::Manager(id) => manager == Some(*id),
        }
    }
}

/// Fan-out of published events to filtered subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<(EventFilter, UnboundedSender<EntityEvent>)>,
}

impl EventBus {
    pub fn subscribe(&mut self, filter: EventFilter) -> UnboundedReceiver<EntityEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.push((filter, tx));
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver `events` in order. `manager` is the cache the subject belonged to when the event
    /// was raised.
    pub(crate) fn publish(&mut self, events: Vec<(Option<ManagerId>, EntityEvent)>) {
        if self.subscribers.is_empty() {
            return;
        }
        for (manager, event) in events.into_iter() {
            tracing::trace!("[EventBus::publish] {event}");
            self.subscribers.retain(|(filter, tx)| {
                if tx.is_closed() {
                    return false;
                }
                if filter.matches(manager, &event) {
                    return tx.send(event.clone()).is_ok();
                }
                true
            });
        }
    }
}
