//! # entity-cache
//!
//! An in-process entity cache that keeps foreign keys and navigation properties consistent while
//! entities are created, linked, mutated and removed.
//!
//! ## Overview
//!
//! Entities are typed, schema-described records. Their properties are either data (including
//! key and foreign key values) or navigation links to other entities. A relationship can be
//! observed three ways: the child's foreign key, the child's scalar navigation and the parent's
//! navigation set. entity-cache guarantees that the three never disagree, that every entity is in
//! exactly one lifecycle state, and that an entity belongs to at most one cache.
//!
//! ### Key Features
//!
//! - **Identity map**: at most one entity per key per cache, with O(1) key lookup
//! - **Relationship fixup**: writes to either side of a relationship update the other, whatever
//!   the order in which the two ends arrive
//! - **Transitive attach**: attaching one entity pulls its detached neighbourhood into the cache
//! - **Temp keys**: placeholder keys for new entities, propagated to children when replaced
//! - **Change tracking**: Added / Unchanged / Modified / Deleted with original values, accept and
//!   reject
//! - **Atomic mutations**: a failed operation leaves the graph untouched
//! - **Notifications**: property, collection and lifecycle events on filtered channels
//!
//! ## Architecture
//!
//! - **[`metadata`]**: entity types, data properties and associations (`MetadataStore`)
//! - **[`cache`]**: `EntityGraph` (the arena and every operation), `EntityManager`,
//!   `NavigationSet`, the fixup engine
//! - **[`properties`]**: identifiers and values (`EntityId`, `DataValue`, `PropertyValue`)
//! - **[`state`]**, **[`aspect`]**: the lifecycle state machine and the per-entity tracking record
//! - **[`keygen`]**: temp key generation
//! - **[`event`]**: change notifications
//! - **[`config`]**: cache configuration and its TOML provider
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use entity_cache::{
//!     cache::EntityGraph,
//!     event::EventFilter,
//!     metadata::{Association, AutoGeneratedKeyType, EntityTypeBuilder, MetadataStore},
//!     properties::{DataType, DataValue, Uuid},
//!     state::EntityState,
//! };
//!
//! let metadata = MetadataStore::builder()
//!     .entity_type(
//!         EntityTypeBuilder::new("Customer")
//!             .key("customerID", DataType::Guid)
//!             .auto_generated(AutoGeneratedKeyType::KeyGenerator)
//!             .nullable("companyName", DataType::String),
//!     )
//!     .entity_type(
//!         EntityTypeBuilder::new("Order")
//!             .key("orderID", DataType::Int32)
//!             .auto_generated(AutoGeneratedKeyType::Identity)
//!             .nullable("customerID", DataType::Guid),
//!     )
//!     .association(
//!         Association::new("Customer_Orders", "Customer", "Order", ["customerID"])
//!             .parent_navigation("orders")
//!             .child_navigation("customer"),
//!     )
//!     .build()?;
//!
//! let mut graph = EntityGraph::new(Arc::new(metadata));
//! let cache = graph.new_manager();
//! let mut events = graph.subscribe(EventFilter::All);
//!
//! // An order that references a customer that has not been loaded yet.
//! let customer_id = Uuid::new_v4();
//! let order = graph.create_entity(
//!     "Order",
//!     vec![("orderID", 1.into()), ("customerID", customer_id.into())],
//! )?;
//! graph.attach_entity(cache, order, EntityState::Unchanged)?;
//! assert_eq!(graph.get_reference(order, "customer")?, None);
//!
//! // The customer arrives later and the link completes by itself.
//! let customer = graph.create_entity("Customer", vec![("customerID", customer_id.into())])?;
//! graph.attach_entity(cache, customer, EntityState::Unchanged)?;
//! assert_eq!(graph.get_reference(order, "customer")?, Some(customer));
//! assert_eq!(graph.collection(customer, "orders")?.as_slice(), &[order]);
//! assert_eq!(graph.entity_state(order)?, EntityState::Unchanged);
//!
//! graph.set_value(customer, "companyName", "Acme")?;
//! assert_eq!(graph.entity_state(customer)?, EntityState::Modified);
//! graph.reject_changes(customer)?;
//! assert_eq!(graph.get_value(customer, "companyName")?, DataValue::Null);
//! assert!(events.try_recv().is_ok());
//! # Ok::<(), entity_cache::error::CacheError>(())
//! ```
//!
//! ## Concurrency
//!
//! Every operation is synchronous and runs to completion. An [`cache::EntityGraph`] expects a
//! single writer; share it across threads behind a lock held for the whole operation.

pub mod aspect;
pub mod cache;
pub mod config;
pub mod entitykey;
pub mod error;
pub mod event;
pub mod keygen;
pub mod metadata;
pub mod properties;
pub mod state;
#[cfg(test)]
mod tests;

pub use error::*;
