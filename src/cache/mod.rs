//! cache module: the entity graph, its caches and the relationship fixup engine.
//!
//! # Module Organization
//!
//! - [`base`]: [EntityGraph], the arena and its public operations
//! - [`fixup`]: keeping foreign keys, links and navigation sets in agreement
//! - [`journal`]: all-or-nothing mutations and buffered events
//! - [`manager`]: [EntityManager], one cache's identity map and foreign-key index
//! - [`navset`]: [NavigationSet]
//! - [`relations`]: [RelationGraph] snapshots
//!
//! ```rust
//! use std::sync::Arc;
//! use entity_cache::{
//!     cache::EntityGraph,
//!     metadata::{Association, AutoGeneratedKeyType, EntityTypeBuilder, MetadataStore},
//!     properties::DataType,
//!     state::EntityState,
//! };
//!
//! let metadata = MetadataStore::builder()
//!     .entity_type(
//!         EntityTypeBuilder::new("Customer")
//!             .key("customerID", DataType::Int32)
//!             .auto_generated(AutoGeneratedKeyType::Identity),
//!     )
//!     .entity_type(
//!         EntityTypeBuilder::new("Order")
//!             .key("orderID", DataType::Int32)
//!             .auto_generated(AutoGeneratedKeyType::Identity)
//!             .nullable("customerID", DataType::Int32),
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
//! let customer = graph.create_attached(cache, "Customer", vec![], EntityState::Added)?;
//! let order = graph.create_entity("Order", vec![])?;
//! graph.push(customer, "orders", order)?;
//!
//! assert_eq!(graph.get_reference(order, "customer")?, Some(customer));
//! assert_eq!(graph.entity_state(order)?, EntityState::Added);
//! assert_eq!(
//!     graph.get_value(order, "customerID")?,
//!     graph.get_value(customer, "customerID")?
//! );
//! # Ok::<(), entity_cache::error::CacheError>(())
//! ```

mod base;
mod fixup;
mod journal;
mod manager;
mod navset;
mod record;
mod relations;

#[cfg(test)]
mod tests;

pub use base::{EntityGraph, EntityInitializer};
pub use manager::EntityManager;
pub use navset::NavigationSet;
pub use relations::RelationGraph;
